//! Kiln Test - Shared test utilities for the kiln module host.
//!
//! Fixtures for building throwaway workspace trees, a scriptable
//! [`FakeToolchain`] that emits minimal WebAssembly units, and a
//! [`FakeLoader`] that runs the real isolation boundary but records
//! lifecycle callbacks instead of executing guest code.
//!
//! # Usage
//!
//! ```toml
//! [dev-dependencies]
//! kiln-test.workspace = true
//! ```
//!
//! ```rust,ignore
//! use kiln_test::{FakeToolchain, WorkspaceFixture};
//!
//! let fixture = WorkspaceFixture::new();
//! fixture.module("greeter").write();
//! let toolchain = FakeToolchain::new();
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]

pub mod fixtures;
pub mod loader;
pub mod toolchain;
pub mod wasm;

pub use fixtures::*;
pub use loader::*;
pub use toolchain::*;

/// Install a test-friendly tracing subscriber. Safe to call repeatedly.
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}
