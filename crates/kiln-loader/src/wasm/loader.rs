use std::time::Duration;

use kiln_build::{Artifact, Bundle, DEFAULT_NAMESPACE_PREFIX};
use kiln_workspace::Workspace;
use tracing::info;

use super::instance::WasmModuleHandle;
use crate::boundary::IsolationBoundary;
use crate::error::{LoadError, LoadResult};
use crate::module::{ModuleHandle, ModuleLoader};

/// Default linear memory cap: 1024 pages (64 MiB).
const DEFAULT_MEMORY_MAX_PAGES: u32 = 1024;

/// Default time limit per guest call.
const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Loads bundles as Extism plugins behind an [`IsolationBoundary`].
///
/// # Example
///
/// ```rust,no_run
/// use kiln_loader::WasmModuleLoader;
/// use std::time::Duration;
///
/// let loader = WasmModuleLoader::new()
///     .with_memory_max_pages(256)
///     .with_timeout(Duration::from_secs(5));
/// ```
#[derive(Debug, Clone)]
pub struct WasmModuleLoader {
    boundary: IsolationBoundary,
    namespace_prefix: String,
    memory_max_pages: u32,
    call_timeout: Duration,
}

impl Default for WasmModuleLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl WasmModuleLoader {
    /// A loader with the default boundary, 64 MiB memory and a 30s timeout.
    #[must_use]
    pub fn new() -> Self {
        Self {
            boundary: IsolationBoundary::default(),
            namespace_prefix: DEFAULT_NAMESPACE_PREFIX.to_string(),
            memory_max_pages: DEFAULT_MEMORY_MAX_PAGES,
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }

    /// Replace the isolation boundary.
    #[must_use]
    pub fn with_boundary(mut self, boundary: IsolationBoundary) -> Self {
        self.boundary = boundary;
        self
    }

    /// Prefix of generated namespaces; must match the compiler's.
    #[must_use]
    pub fn with_namespace_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.namespace_prefix = prefix.into();
        self
    }

    /// Cap each instance's linear memory, in 64 KiB pages.
    #[must_use]
    pub fn with_memory_max_pages(mut self, pages: u32) -> Self {
        self.memory_max_pages = pages;
        self
    }

    /// Limit the duration of each guest call.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// The boundary in use.
    #[must_use]
    pub fn boundary(&self) -> &IsolationBoundary {
        &self.boundary
    }
}

impl ModuleLoader for WasmModuleLoader {
    fn load(&self, workspace: &Workspace, artifact: &Artifact) -> LoadResult<Box<dyn ModuleHandle>> {
        let bundle = Bundle::read(&artifact.path).map_err(|e| LoadError::Artifact {
            path: artifact.path.clone(),
            message: e.to_string(),
        })?;
        let expected = format!("{}{}/", self.namespace_prefix, workspace.id().package_part());
        let resolved = self.boundary.check(bundle, &expected)?;

        info!(
            module_id = %workspace.id(),
            cache_key = %artifact.key,
            units = resolved.units.len(),
            "Loaded module artifact"
        );
        Ok(Box::new(WasmModuleHandle::new(
            workspace.id().clone(),
            resolved,
            self.memory_max_pages,
            self.call_timeout,
        )))
    }
}
