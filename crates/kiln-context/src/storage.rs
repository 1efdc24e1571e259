//! Per-module key/value storage persisted next to the workspace.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::debug;

use crate::error::{ContextError, ContextResult};
use crate::lock;

/// Storage file name inside the workspace.
pub const DATA_FILE_NAME: &str = "data.toml";

#[derive(Debug, Default)]
struct Entries {
    values: BTreeMap<String, String>,
    dirty: bool,
}

/// String key/value store backed by a TOML file.
///
/// Writes stay in memory until [`flush`](Self::flush), which the context
/// calls on teardown.
#[derive(Debug)]
pub struct ModuleStorage {
    path: PathBuf,
    entries: Mutex<Entries>,
}

impl ModuleStorage {
    /// Open the store at `path`. A missing file is an empty store.
    ///
    /// # Errors
    ///
    /// Returns [`ContextError::Storage`] if the file exists but cannot be
    /// read or parsed.
    pub fn open(path: impl Into<PathBuf>) -> ContextResult<Self> {
        let path = path.into();
        let values = match std::fs::read_to_string(&path) {
            Ok(text) => parse(&text, &path)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(storage_err(&path, format!("failed to read: {e}"))),
        };
        Ok(Self {
            path,
            entries: Mutex::new(Entries {
                values,
                dirty: false,
            }),
        })
    }

    /// File backing this store.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read a value.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<String> {
        lock(&self.entries).values.get(key).cloned()
    }

    /// Write a value.
    pub fn set(&self, key: &str, value: impl Into<String>) {
        let mut entries = lock(&self.entries);
        entries.values.insert(key.to_string(), value.into());
        entries.dirty = true;
    }

    /// Remove a value, returning it.
    pub fn remove(&self, key: &str) -> Option<String> {
        let mut entries = lock(&self.entries);
        let removed = entries.values.remove(key);
        if removed.is_some() {
            entries.dirty = true;
        }
        removed
    }

    /// Persist pending writes. Returns `false` if there was nothing to do.
    ///
    /// # Errors
    ///
    /// Returns [`ContextError::Storage`] if the file cannot be replaced.
    pub fn flush(&self) -> ContextResult<bool> {
        let mut entries = lock(&self.entries);
        if !entries.dirty {
            return Ok(false);
        }

        let table: toml::Table = entries
            .values
            .iter()
            .map(|(k, v)| (k.clone(), toml::Value::String(v.clone())))
            .collect();
        let body = toml::to_string(&table)
            .map_err(|e| storage_err(&self.path, format!("failed to serialize: {e}")))?;

        let parent = self.path.parent().unwrap_or(Path::new("."));
        let mut tmp = tempfile::NamedTempFile::new_in(parent)
            .map_err(|e| storage_err(&self.path, format!("failed to create temp file: {e}")))?;
        tmp.write_all(body.as_bytes())
            .map_err(|e| storage_err(&self.path, format!("failed to write temp file: {e}")))?;
        tmp.as_file()
            .sync_all()
            .map_err(|e| storage_err(&self.path, format!("failed to sync temp file: {e}")))?;
        tmp.persist(&self.path)
            .map_err(|e| storage_err(&self.path, format!("failed to replace: {e}")))?;

        entries.dirty = false;
        debug!(path = %self.path.display(), entries = entries.values.len(), "Flushed module storage");
        Ok(true)
    }
}

fn parse(text: &str, path: &Path) -> ContextResult<BTreeMap<String, String>> {
    let table: toml::Table =
        toml::from_str(text).map_err(|e| storage_err(path, format!("failed to parse: {e}")))?;
    Ok(table
        .into_iter()
        .map(|(k, v)| match v {
            toml::Value::String(s) => (k, s),
            other => (k, other.to_string()),
        })
        .collect())
}

fn storage_err(path: &Path, message: String) -> ContextError {
    ContextError::Storage {
        path: path.to_path_buf(),
        message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn values_survive_flush_and_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(DATA_FILE_NAME);

        let store = ModuleStorage::open(&path).unwrap();
        assert!(store.get("coins").is_none());
        store.set("coins", "12");
        store.set("name", "steve");
        assert!(store.flush().unwrap());
        assert!(!store.flush().unwrap());

        let reopened = ModuleStorage::open(&path).unwrap();
        assert_eq!(reopened.get("coins").as_deref(), Some("12"));
        assert_eq!(reopened.get("name").as_deref(), Some("steve"));
    }

    #[test]
    fn corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(DATA_FILE_NAME);
        std::fs::write(&path, "not = [valid").unwrap();
        assert!(matches!(
            ModuleStorage::open(&path),
            Err(ContextError::Storage { .. })
        ));
    }

    #[test]
    fn non_string_values_are_stringified() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(DATA_FILE_NAME);
        std::fs::write(&path, "count = 3\n").unwrap();
        let store = ModuleStorage::open(&path).unwrap();
        assert_eq!(store.get("count").as_deref(), Some("3"));
    }
}
