//! The parent side of the boundary: what the host itself provides.

use std::collections::BTreeSet;

use crate::wasm::host::HostFunction;

/// Namespace of the public capability functions.
pub const KILN_API_NAMESPACE: &str = "kiln:api";

const WASI_NAMESPACE: &str = "wasi_snapshot_preview1";
const EXTISM_ENV_NAMESPACE: &str = "extism:host/env";

/// Symbols resolvable from the host.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostSurface {
    namespaces: BTreeSet<String>,
    functions: BTreeSet<(String, String)>,
}

impl HostSurface {
    /// An empty surface.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The surface the wasm loader links: WASI, the runtime's own `env`
    /// imports, and the `kiln:api` capability functions.
    #[must_use]
    pub fn kiln_default() -> Self {
        HostFunction::ALL.iter().fold(
            Self::new()
                .with_namespace(WASI_NAMESPACE)
                .with_namespace(EXTISM_ENV_NAMESPACE),
            |surface, f| surface.with_function(KILN_API_NAMESPACE, f.name()),
        )
    }

    /// Provide every symbol in `namespace`.
    #[must_use]
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespaces.insert(namespace.into());
        self
    }

    /// Provide a single function.
    #[must_use]
    pub fn with_function(mut self, namespace: impl Into<String>, name: impl Into<String>) -> Self {
        self.functions.insert((namespace.into(), name.into()));
        self
    }

    /// Whether the host resolves `namespace::name`.
    #[must_use]
    pub fn provides(&self, namespace: &str, name: &str) -> bool {
        self.namespaces.contains(namespace)
            || self
                .functions
                .contains(&(namespace.to_string(), name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_surface() {
        let surface = HostSurface::kiln_default();
        assert!(surface.provides("wasi_snapshot_preview1", "fd_write"));
        assert!(surface.provides("extism:host/env", "alloc"));
        assert!(surface.provides("kiln:api", "kiln_log"));
        assert!(!surface.provides("kiln:api", "kiln_reboot"));
        assert!(!surface.provides("env", "memory"));
    }
}
