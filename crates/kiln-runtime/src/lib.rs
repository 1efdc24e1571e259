//! Kiln Runtime - orchestrates discovery, compilation and activation.
//!
//! A [`ModuleHost`] owns a single activation authority task. Full reloads
//! bump a generation, tear down every active module in reverse order,
//! rediscover workspaces, resolve dependency order and queue compiles on a
//! bounded worker pool. Compile results flow back to the authority, which
//! activates modules as their dependencies come up and discards anything
//! stamped with an older generation.
//!
//! ```text
//! reload_all ─► discover ─► resolve ─► compile (parallel)
//!                                          │
//!                authority ◄── Compiled ───┘
//!                    │
//!                    ├─ deps active?  ─► load ─► context ─► instantiate ─► enable
//!                    └─ otherwise     ─► pending (retried to a fixpoint)
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

mod activation;
mod authority;
pub mod config;
pub mod error;
pub mod host;
pub mod resolver;
pub mod watcher;

pub use config::{DEFAULT_LEAK_SCAN_DELAY, DEFAULT_MAX_PARALLEL, HostConfig};
pub use error::{
    DependencyError, LifecycleError, MAX_REPORTED_DIAGNOSTICS, ModuleError, ResourceLeakWarning,
    RuntimeError, RuntimeResult,
};
pub use host::{
    CANCELLED_MESSAGE, HostSnapshot, ModuleFailure, ModuleHost, ReloadCallback, ReloadOutcome,
    ReloadSummary,
};
pub use resolver::{BlockedDependency, MissingDependency, Resolution, resolve};
pub use watcher::{WatchEvent, WatcherConfig, WorkspaceWatcher, reload_on_change};
