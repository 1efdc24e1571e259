//! Content-addressed artifact store.
//!
//! Layout under the build root:
//!
//! ```text
//! <root>/<module id>/cache/<key>.kart   immutable, one per cache key
//! <root>/<module id>/module.kart        copy of the most recent artifact
//! <root>/<module id>/gen-src/           staging area, rewritten per miss
//! ```
//!
//! Entries are written to a temp file in the same directory and renamed
//! into place, so readers never see a partial artifact and concurrent
//! writers of the same key are harmless.

use std::io::Write;
use std::path::{Path, PathBuf};

use kiln_workspace::ModuleId;
use tracing::debug;

use crate::error::{BuildResult, CompileError};
use crate::key::CacheKey;

/// Artifact file extension.
pub const ARTIFACT_EXTENSION: &str = "kart";

const CACHE_DIR: &str = "cache";
const GEN_SRC_DIR: &str = "gen-src";
const CURRENT_ARTIFACT: &str = "module.kart";

/// Artifact store rooted at a build directory.
#[derive(Debug, Clone)]
pub struct CacheStore {
    root: PathBuf,
}

impl CacheStore {
    /// Create a store under `root`. Nothing is created until first write.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Build root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Per-module build directory.
    #[must_use]
    pub fn module_dir(&self, id: &ModuleId) -> PathBuf {
        self.root.join(id.path_segment())
    }

    /// Generated-sources staging area.
    #[must_use]
    pub fn gen_src_dir(&self, id: &ModuleId) -> PathBuf {
        self.module_dir(id).join(GEN_SRC_DIR)
    }

    /// Where the artifact for `key` lives (whether or not it exists).
    #[must_use]
    pub fn artifact_path(&self, id: &ModuleId, key: &CacheKey) -> PathBuf {
        self.module_dir(id)
            .join(CACHE_DIR)
            .join(format!("{key}.{ARTIFACT_EXTENSION}"))
    }

    /// Path of the module's current artifact copy.
    #[must_use]
    pub fn current_path(&self, id: &ModuleId) -> PathBuf {
        self.module_dir(id).join(CURRENT_ARTIFACT)
    }

    /// Existing artifact for `key`, if any.
    #[must_use]
    pub fn lookup(&self, id: &ModuleId, key: &CacheKey) -> Option<PathBuf> {
        let path = self.artifact_path(id, key);
        path.is_file().then_some(path)
    }

    /// Store `bytes` under `key` and return the artifact path.
    ///
    /// # Errors
    ///
    /// Returns [`CompileError::Io`] if the artifact cannot be written.
    pub fn store(&self, id: &ModuleId, key: &CacheKey, bytes: &[u8]) -> BuildResult<PathBuf> {
        let path = self.artifact_path(id, key);
        write_atomic(&path, bytes)?;
        debug!(module_id = %id, cache_key = %key, path = %path.display(), "Stored artifact");
        Ok(path)
    }

    /// Refresh `module.kart` from a cached artifact.
    ///
    /// # Errors
    ///
    /// Returns [`CompileError::Io`] if the copy fails.
    pub fn set_current(&self, id: &ModuleId, artifact: &Path) -> BuildResult<PathBuf> {
        let bytes = std::fs::read(artifact).map_err(|e| CompileError::io(artifact, e))?;
        let current = self.current_path(id);
        write_atomic(&current, &bytes)?;
        Ok(current)
    }

    /// Cache keys stored for `id`, sorted.
    ///
    /// # Errors
    ///
    /// Returns [`CompileError::Io`] if the cache directory exists but cannot
    /// be listed.
    pub fn keys(&self, id: &ModuleId) -> BuildResult<Vec<CacheKey>> {
        let dir = self.module_dir(id).join(CACHE_DIR);
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(CompileError::io(&dir, e)),
        };
        let mut keys: Vec<_> = entries
            .filter_map(Result::ok)
            .map(|e| e.path())
            .filter(|p| p.extension().and_then(|e| e.to_str()) == Some(ARTIFACT_EXTENSION))
            .filter_map(|p| p.file_stem().and_then(|s| s.to_str()).and_then(CacheKey::from_hex))
            .collect();
        keys.sort();
        Ok(keys)
    }
}

fn write_atomic(path: &Path, bytes: &[u8]) -> BuildResult<()> {
    let parent = path.parent().unwrap_or(Path::new("."));
    std::fs::create_dir_all(parent).map_err(|e| CompileError::io(parent, e))?;

    let mut tmp = tempfile::NamedTempFile::new_in(parent).map_err(|e| CompileError::io(parent, e))?;
    tmp.write_all(bytes).map_err(|e| CompileError::io(tmp.path(), e))?;
    tmp.as_file()
        .sync_all()
        .map_err(|e| CompileError::io(tmp.path(), e))?;
    tmp.persist(path)
        .map_err(|e| CompileError::io(path, e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(seed: &str) -> CacheKey {
        CacheKey::from_hex(&blake3::hash(seed.as_bytes()).to_hex()).unwrap()
    }

    #[test]
    fn store_then_lookup() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::new(dir.path());
        let id = ModuleId::from_static("shop");
        let k = key("a");

        assert!(store.lookup(&id, &k).is_none());
        let path = store.store(&id, &k, b"artifact").unwrap();
        assert_eq!(store.lookup(&id, &k), Some(path.clone()));
        assert!(path.starts_with(dir.path().join("shop").join("cache")));
        assert_eq!(std::fs::read(&path).unwrap(), b"artifact");
    }

    #[test]
    fn rewriting_same_key_is_harmless() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::new(dir.path());
        let id = ModuleId::from_static("shop");
        let k = key("a");
        store.store(&id, &k, b"same").unwrap();
        store.store(&id, &k, b"same").unwrap();
        assert_eq!(store.keys(&id).unwrap(), vec![k]);
    }

    #[test]
    fn current_copy_tracks_latest() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::new(dir.path());
        let id = ModuleId::from_static("shop");
        let first = store.store(&id, &key("1"), b"one").unwrap();
        let second = store.store(&id, &key("2"), b"two").unwrap();

        store.set_current(&id, &first).unwrap();
        store.set_current(&id, &second).unwrap();
        assert_eq!(std::fs::read(store.current_path(&id)).unwrap(), b"two");
        assert_eq!(store.keys(&id).unwrap().len(), 2);
    }
}
