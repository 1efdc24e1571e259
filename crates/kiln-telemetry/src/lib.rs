//! Kiln Telemetry - logging setup for the module host.
//!
//! ```rust,no_run
//! use kiln_telemetry::{LogConfig, LogFormat, setup_logging};
//!
//! # fn main() -> Result<(), kiln_telemetry::TelemetryError> {
//! let config = LogConfig::new("info")
//!     .with_format(LogFormat::Compact)
//!     .with_directive("kiln_build=debug");
//! let _guard = setup_logging(&config)?;
//! tracing::info!("host starting");
//! # Ok(())
//! # }
//! ```
//!
//! With the `config` feature, [`LogConfig::from_section`] builds a config
//! from the `[logging]` section of a kiln configuration file.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

mod error;
mod logging;

pub use error::{TelemetryError, TelemetryResult};
pub use logging::{LogConfig, LogFormat, LogGuard, LogTarget, setup_logging};
