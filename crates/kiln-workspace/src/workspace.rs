//! A module workspace directory.

use std::path::{Path, PathBuf};

use tracing::debug;
use walkdir::WalkDir;

use crate::error::{ManifestError, WorkspaceResult};
use crate::id::ModuleId;
use crate::manifest::Manifest;

/// Manifest file name inside every workspace.
pub const MANIFEST_FILE_NAME: &str = "module.toml";

/// Directory holding the module's sources.
pub const SOURCE_DIR: &str = "src";

/// Extension of module source files.
pub const SOURCE_EXTENSION: &str = "ks";

/// A source file belonging to a workspace.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct SourceFile {
    /// Path relative to the workspace root, `/`-separated.
    pub relative: String,
    /// Absolute (or root-joined) path on disk.
    pub path: PathBuf,
}

/// A workspace: its directory, its validated manifest and the manifest's
/// exact text (which feeds the build cache key).
#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
    manifest: Manifest,
    manifest_text: String,
}

impl Workspace {
    /// Read and validate the workspace at `root`.
    ///
    /// # Errors
    ///
    /// Returns a [`ManifestError`] if the manifest cannot be read or is
    /// invalid, or if the declared entry file does not exist.
    pub fn load(root: impl Into<PathBuf>) -> WorkspaceResult<Self> {
        let root = root.into();
        let manifest_path = root.join(MANIFEST_FILE_NAME);
        let manifest_text =
            std::fs::read_to_string(&manifest_path).map_err(|source| ManifestError::Io {
                path: manifest_path.clone(),
                source,
            })?;
        let manifest = Manifest::parse(&manifest_text, &manifest_path)?;

        let entry = root.join(&manifest.entry);
        if !entry.is_file() {
            return Err(ManifestError::EntryNotFound {
                id: manifest.id.to_string(),
                path: entry,
            });
        }

        debug!(module_id = %manifest.id, root = %root.display(), "Loaded workspace");
        Ok(Self {
            root,
            manifest,
            manifest_text,
        })
    }

    /// Workspace directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Validated manifest.
    #[must_use]
    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    /// Shorthand for `manifest().id`.
    #[must_use]
    pub fn id(&self) -> &ModuleId {
        &self.manifest.id
    }

    /// The manifest exactly as read from disk.
    #[must_use]
    pub fn manifest_text(&self) -> &str {
        &self.manifest_text
    }

    /// Absolute path of the entry source.
    #[must_use]
    pub fn entry_path(&self) -> PathBuf {
        self.root.join(&self.manifest.entry)
    }

    /// Entry path relative to the workspace root, `/`-separated.
    #[must_use]
    pub fn entry_relative(&self) -> String {
        to_slash(&self.manifest.entry)
    }

    /// All module sources below `src/`, sorted by relative path.
    ///
    /// The entry file is included even when it lives outside `src/`.
    ///
    /// # Errors
    ///
    /// Returns [`ManifestError::Io`] if the source tree cannot be walked.
    pub fn sources(&self) -> WorkspaceResult<Vec<SourceFile>> {
        let mut files = Vec::new();
        let src = self.root.join(SOURCE_DIR);
        if src.is_dir() {
            for entry in WalkDir::new(&src).follow_links(false) {
                let entry = entry.map_err(|e| ManifestError::Io {
                    path: src.clone(),
                    source: e.into(),
                })?;
                let path = entry.path();
                if !entry.file_type().is_file()
                    || path.extension().and_then(|e| e.to_str()) != Some(SOURCE_EXTENSION)
                {
                    continue;
                }
                if let Ok(rel) = path.strip_prefix(&self.root) {
                    files.push(SourceFile {
                        relative: to_slash(rel),
                        path: path.to_path_buf(),
                    });
                }
            }
        }

        let entry_rel = self.entry_relative();
        if !files.iter().any(|f| f.relative == entry_rel) {
            files.push(SourceFile {
                relative: entry_rel,
                path: self.entry_path(),
            });
        }

        files.sort();
        Ok(files)
    }
}

fn to_slash(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(dir: &Path, rel: &str, content: &str) {
        let path = dir.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    #[test]
    fn load_reads_manifest_and_entry() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "module.toml", "id = \"core\"\n");
        write(dir.path(), "src/main.ks", "module {}\n");

        let ws = Workspace::load(dir.path()).unwrap();
        assert_eq!(ws.id().as_str(), "core");
        assert_eq!(ws.manifest_text(), "id = \"core\"\n");
        assert_eq!(ws.entry_relative(), "src/main.ks");
    }

    #[test]
    fn missing_entry_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "module.toml", "id = \"core\"\n");

        let err = Workspace::load(dir.path()).unwrap_err();
        assert!(matches!(err, ManifestError::EntryNotFound { .. }));
    }

    #[test]
    fn missing_manifest_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = Workspace::load(dir.path()).unwrap_err();
        assert!(matches!(err, ManifestError::Io { .. }));
    }

    #[test]
    fn sources_are_sorted_and_filtered() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "module.toml", "id = \"core\"\n");
        write(dir.path(), "src/main.ks", "module {}\n");
        write(dir.path(), "src/util/b.ks", "val b = 1\n");
        write(dir.path(), "src/a.ks", "val a = 1\n");
        write(dir.path(), "src/notes.txt", "ignored\n");

        let ws = Workspace::load(dir.path()).unwrap();
        let rels: Vec<_> = ws.sources().unwrap().into_iter().map(|s| s.relative).collect();
        assert_eq!(rels, vec!["src/a.ks", "src/main.ks", "src/util/b.ks"]);
    }

    #[test]
    fn entry_outside_src_is_still_a_source() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "module.toml", "id = \"core\"\nentry = \"boot.ks\"\n");
        write(dir.path(), "boot.ks", "module {}\n");

        let ws = Workspace::load(dir.path()).unwrap();
        let rels: Vec<_> = ws.sources().unwrap().into_iter().map(|s| s.relative).collect();
        assert_eq!(rels, vec!["boot.ks"]);
    }
}
