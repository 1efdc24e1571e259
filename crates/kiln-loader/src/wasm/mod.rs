//! Extism-backed module backend.
//!
//! An artifact's units are linked into a single Extism plugin. The entry unit
//! is registered as the plugin's main module and every other unit under its
//! link name, so child-first imports between units resolve inside the
//! plugin. The `kiln:api` capability functions are the only host functions
//! registered outside WASI.

pub mod host;
mod instance;
mod loader;

pub use instance::{WasmModuleHandle, WasmModuleInstance};
pub use loader::WasmModuleLoader;

/// Optional export run when the module is enabled.
pub const ON_ENABLE_EXPORT: &str = "kiln_on_enable";

/// Optional export run before the module is disabled.
pub const ON_DISABLE_EXPORT: &str = "kiln_on_disable";
