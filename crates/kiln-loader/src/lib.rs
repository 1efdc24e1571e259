//! Kiln Loader - loads compiled artifacts behind an isolation boundary.
//!
//! Every import of every unit in an artifact is resolved against an ordered
//! [`SymbolPolicy`]: denied host-internal prefixes fail the load, the
//! module's own generated namespace resolves child-first from the artifact,
//! and everything else resolves parent-first from the [`HostSurface`].
//! Resolution walks the artifact from its entry unit, so a denied symbol
//! reachable only through another unit is still caught.
//!
//! The boundary is best-effort symbol filtering, not a sandbox against a
//! hostile author.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod boundary;
pub mod error;
pub mod module;
pub mod policy;
pub mod surface;
pub mod wasm;

pub use boundary::{IsolationBoundary, Resolution, ResolvedBundle, ResolvedUnit};
pub use error::{LoadError, LoadResult};
pub use module::{CallbackError, ModuleHandle, ModuleInstance, ModuleLoader};
pub use policy::{DEFAULT_DENIED_PREFIXES, PolicyRule, RuleAction, SymbolPolicy};
pub use surface::{HostSurface, KILN_API_NAMESPACE};
pub use wasm::{WasmModuleLoader, ON_DISABLE_EXPORT, ON_ENABLE_EXPORT};
