//! Kiln Context - the services a live module sees, and the bookkeeping that
//! lets the host take them all back.
//!
//! Every resource a module acquires through its [`ModuleContext`] (event
//! subscriptions, spawned tasks, registered commands, storage) is recorded
//! in a per-module [`ResourceRegistry`]. Teardown releases the registry in a
//! fixed order and leak detection is a diff of what is still alive
//! afterwards.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod commands;
pub mod context;
pub mod error;
pub mod events;
pub mod logger;
pub mod resources;
pub mod storage;

pub use commands::{CommandRegistry, RegisteredCommand, normalize_command};
pub use context::{HostServices, ModuleContext, TeardownReport};
pub use error::{ContextError, ContextResult};
pub use events::{EventHub, SubscriptionId};
pub use logger::ModuleLogger;
pub use resources::{LeakedResource, ResourceId, ResourceKind, ResourceRegistry, TrackedResource};
pub use storage::{DATA_FILE_NAME, ModuleStorage};

pub(crate) fn lock<T>(mutex: &std::sync::Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| {
        tracing::warn!("context lock poisoned, recovering");
        e.into_inner()
    })
}
