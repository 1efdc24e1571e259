//! The artifact compiler.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use kiln_workspace::{ModuleId, SUPPORTED_API_LEVEL, Workspace};
use tracing::{debug, info};

use crate::bundle::{Bundle, BundleMeta, BundleUnit};
use crate::cache::CacheStore;
use crate::codegen::{self, ENTRY_UNIT};
use crate::error::{BuildResult, CompileError};
use crate::key::{CacheKey, KeyInputs};
use crate::toolchain::{CompileRequest, Toolchain};
use crate::validate::validate_sources;

/// Prefix of every module's own package. A module `shop` compiles into
/// `kiln:module/shop/`.
pub const DEFAULT_NAMESPACE_PREFIX: &str = "kiln:module/";

/// A compiled artifact on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    /// Module it was built from.
    pub module: ModuleId,
    /// Cache key it is stored under.
    pub key: CacheKey,
    /// Path of the immutable cache entry.
    pub path: PathBuf,
    /// Whether the toolchain was skipped.
    pub cache_hit: bool,
}

/// Compiles workspaces into cached artifacts. Safe to share between
/// threads; compiles of the same module are serialized on its staging area.
pub struct ArtifactCompiler {
    store: CacheStore,
    toolchain: Arc<dyn Toolchain>,
    accepted_api: u32,
    namespace_prefix: String,
    staging: Mutex<HashMap<ModuleId, Arc<Mutex<()>>>>,
}

impl std::fmt::Debug for ArtifactCompiler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArtifactCompiler")
            .field("store", &self.store)
            .field("toolchain", self.toolchain.info())
            .field("accepted_api", &self.accepted_api)
            .field("namespace_prefix", &self.namespace_prefix)
            .finish_non_exhaustive()
    }
}

impl ArtifactCompiler {
    /// Create a compiler writing into `store` and compiling with
    /// `toolchain`.
    #[must_use]
    pub fn new(store: CacheStore, toolchain: Arc<dyn Toolchain>) -> Self {
        Self {
            store,
            toolchain,
            accepted_api: SUPPORTED_API_LEVEL,
            namespace_prefix: DEFAULT_NAMESPACE_PREFIX.to_string(),
            staging: Mutex::new(HashMap::new()),
        }
    }

    /// Override the package prefix.
    #[must_use]
    pub fn with_namespace_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.namespace_prefix = prefix.into();
        self
    }

    /// Override the accepted API level mixed into cache keys.
    #[must_use]
    pub fn with_accepted_api(mut self, api: u32) -> Self {
        self.accepted_api = api;
        self
    }

    /// Artifact store.
    #[must_use]
    pub fn store(&self) -> &CacheStore {
        &self.store
    }

    /// Package a module's units are compiled into.
    #[must_use]
    pub fn namespace_for(&self, id: &ModuleId) -> String {
        format!("{}{}/", self.namespace_prefix, id.package_part())
    }

    /// Cache key of the workspace as it is on disk right now.
    ///
    /// # Errors
    ///
    /// Returns an error if the sources cannot be read.
    pub fn cache_key(&self, workspace: &Workspace) -> BuildResult<CacheKey> {
        let sources = read_sources(workspace)?;
        Ok(self.key_for(workspace, &sources))
    }

    fn key_for(&self, workspace: &Workspace, sources: &[(String, Vec<u8>)]) -> CacheKey {
        CacheKey::compute(&KeyInputs {
            toolchain: self.toolchain.info(),
            accepted_api: self.accepted_api,
            manifest_api: workspace.manifest().api,
            manifest_text: workspace.manifest_text(),
            sources,
        })
    }

    /// Produce the artifact for `workspace`, from cache when possible.
    ///
    /// # Errors
    ///
    /// Returns a [`CompileError`] if the sources fail validation, the
    /// toolchain fails, or the artifact cannot be stored. Failures leave
    /// existing cache entries untouched.
    pub fn compile(&self, workspace: &Workspace) -> BuildResult<Artifact> {
        let id = workspace.id();
        let sources = read_sources(workspace)?;
        let key = self.key_for(workspace, &sources);

        if let Some(artifact) = self.cached(id, &key)? {
            return Ok(artifact);
        }

        let lock = self.staging_lock(id);
        let _staging = lock.lock().unwrap_or_else(std::sync::PoisonError::into_inner);

        // Another job may have produced the same key while we waited.
        if let Some(artifact) = self.cached(id, &key)? {
            return Ok(artifact);
        }

        let texts = sources
            .into_iter()
            .map(|(path, bytes)| {
                String::from_utf8(bytes)
                    .map(|text| (path.clone(), text))
                    .map_err(|_| CompileError::Structural {
                        unit: path,
                        message: "source is not valid UTF-8".into(),
                    })
            })
            .collect::<BuildResult<Vec<_>>>()?;
        let entry = workspace.entry_relative();
        validate_sources(&entry, &texts)?;

        let namespace = self.namespace_for(id);
        let gen_dir = self.store.gen_src_dir(id);
        let units = codegen::generate(&gen_dir, workspace.manifest(), &namespace, &entry, &texts)?;

        let module_dir = self.store.module_dir(id);
        std::fs::create_dir_all(&module_dir).map_err(|e| CompileError::io(&module_dir, e))?;
        let out = tempfile::Builder::new()
            .prefix("out-")
            .tempdir_in(&module_dir)
            .map_err(|e| CompileError::io(&module_dir, e))?;

        let request = CompileRequest {
            module: id.clone(),
            namespace: namespace.clone(),
            units,
            out_dir: out.path().to_path_buf(),
        };
        info!(module_id = %id, cache_key = %key, units = request.units.len(), "Compiling module");
        self.toolchain.compile(&request)?;

        let mut compiled = Vec::with_capacity(request.units.len());
        for unit in &request.units {
            let path = out.path().join(format!("{}.wasm", unit.name));
            let bytes = std::fs::read(&path).map_err(|_| CompileError::MissingOutput {
                unit: unit.name.clone(),
            })?;
            compiled.push(BundleUnit {
                name: unit.name.clone(),
                bytes,
            });
        }

        let bundle = Bundle {
            meta: BundleMeta::new(
                id.as_str(),
                namespace,
                ENTRY_UNIT,
                key.as_str(),
                self.toolchain.info().clone(),
            ),
            units: compiled,
        };
        let path = self.store.store(id, &key, &bundle.to_bytes()?)?;
        self.store.set_current(id, &path)?;

        Ok(Artifact {
            module: id.clone(),
            key,
            path,
            cache_hit: false,
        })
    }

    fn cached(&self, id: &ModuleId, key: &CacheKey) -> BuildResult<Option<Artifact>> {
        let Some(path) = self.store.lookup(id, key) else {
            return Ok(None);
        };
        debug!(module_id = %id, cache_key = %key, "Artifact cache hit");
        self.store.set_current(id, &path)?;
        Ok(Some(Artifact {
            module: id.clone(),
            key: key.clone(),
            path,
            cache_hit: true,
        }))
    }

    fn staging_lock(&self, id: &ModuleId) -> Arc<Mutex<()>> {
        let mut locks = self
            .staging
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        Arc::clone(locks.entry(id.clone()).or_default())
    }
}

fn read_sources(workspace: &Workspace) -> BuildResult<Vec<(String, Vec<u8>)>> {
    workspace
        .sources()?
        .into_iter()
        .map(|file| {
            std::fs::read(&file.path)
                .map(|bytes| (file.relative, bytes))
                .map_err(|e| CompileError::io(&file.path, e))
        })
        .collect()
}
