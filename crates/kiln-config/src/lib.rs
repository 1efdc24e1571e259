#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
//! Configuration for the kiln module host.
//!
//! # Precedence
//!
//! From lowest to highest:
//!
//! 1. Embedded defaults (`defaults.toml` compiled into the binary)
//! 2. User file (`<config dir>/kiln/config.toml`)
//! 3. An explicit file passed by the caller
//! 4. `KILN_*` environment overrides
//!
//! Tables merge key by key; any other value replaces what a lower layer set.
//!
//! This crate depends on no other kiln crate. The daemon converts sections
//! into the host's own types at startup.

/// Configuration error types.
pub mod error;
/// File discovery and layered loading.
pub mod loader;
/// TOML tree merging.
pub mod merge;
/// Configuration struct definitions.
pub mod types;
/// Post-merge validation.
pub mod validate;

pub use error::{ConfigError, ConfigResult};
pub use loader::{ENV_PREFIX, ResolvedConfig};
pub use types::*;

impl Config {
    /// Load with the full precedence chain, reading the process environment.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if a file is unreadable, malformed or too
    /// large, or the merged result fails validation.
    pub fn load(explicit: Option<&std::path::Path>) -> ConfigResult<ResolvedConfig> {
        let user_dir = loader::user_config_dir();
        loader::load(user_dir.as_deref(), explicit, &loader::collect_env_vars())
    }
}
