//! Throwaway workspace trees.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use tempfile::TempDir;

/// Default entry source.
pub const DEFAULT_ENTRY_SOURCE: &str = "module {\n    enable {}\n}\n";

/// A temporary directory holding module workspaces, one per subdirectory.
#[derive(Debug)]
pub struct WorkspaceFixture {
    dir: TempDir,
}

impl Default for WorkspaceFixture {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkspaceFixture {
    /// Create an empty workspace root.
    ///
    /// # Panics
    ///
    /// Panics if the temporary directory cannot be created.
    #[must_use]
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().expect("create workspace root"),
        }
    }

    /// Root containing the workspaces.
    #[must_use]
    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    /// Start a workspace whose directory and id are both `id`.
    #[must_use]
    pub fn module(&self, id: &str) -> ModuleBuilder {
        ModuleBuilder::new(self.root().join(id), id)
    }

    /// Write `contents` to `relative` under the root.
    ///
    /// # Panics
    ///
    /// Panics if the file cannot be written.
    pub fn write(&self, relative: &str, contents: &str) -> PathBuf {
        let path = self.root().join(relative);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("create parent");
        }
        std::fs::write(&path, contents).expect("write file");
        path
    }

    /// Remove a workspace directory.
    ///
    /// # Panics
    ///
    /// Panics if the directory cannot be removed.
    pub fn remove(&self, dir: &str) {
        std::fs::remove_dir_all(self.root().join(dir)).expect("remove workspace");
    }
}

/// Builder for one workspace directory.
#[derive(Debug, Clone)]
pub struct ModuleBuilder {
    dir: PathBuf,
    id: String,
    depends: Vec<String>,
    commands: Vec<String>,
    permissions: Vec<String>,
    disabled: bool,
    debug: bool,
    extra: String,
    entry_source: String,
    sources: Vec<(String, String)>,
}

impl ModuleBuilder {
    fn new(dir: PathBuf, id: &str) -> Self {
        Self {
            dir,
            id: id.to_string(),
            depends: Vec::new(),
            commands: Vec::new(),
            permissions: Vec::new(),
            disabled: false,
            debug: false,
            extra: String::new(),
            entry_source: DEFAULT_ENTRY_SOURCE.to_string(),
            sources: Vec::new(),
        }
    }

    /// Place the workspace in a differently named directory.
    #[must_use]
    pub fn in_dir(mut self, dir_name: &str) -> Self {
        if let Some(parent) = self.dir.parent() {
            self.dir = parent.join(dir_name);
        }
        self
    }

    /// Declare dependencies.
    #[must_use]
    pub fn depends(mut self, ids: &[&str]) -> Self {
        self.depends.extend(ids.iter().map(|s| (*s).to_string()));
        self
    }

    /// Declare commands.
    #[must_use]
    pub fn commands(mut self, names: &[&str]) -> Self {
        self.commands.extend(names.iter().map(|s| (*s).to_string()));
        self
    }

    /// Declare permissions.
    #[must_use]
    pub fn permissions(mut self, names: &[&str]) -> Self {
        self.permissions.extend(names.iter().map(|s| (*s).to_string()));
        self
    }

    /// Mark the workspace `load = "disable"`.
    #[must_use]
    pub fn disabled(mut self) -> Self {
        self.disabled = true;
        self
    }

    /// Turn on debug logging.
    #[must_use]
    pub fn debug(mut self) -> Self {
        self.debug = true;
        self
    }

    /// Append raw TOML to the manifest.
    #[must_use]
    pub fn manifest_extra(mut self, toml: &str) -> Self {
        self.extra.push_str(toml);
        self.extra.push('\n');
        self
    }

    /// Replace the entry source.
    #[must_use]
    pub fn entry_source(mut self, text: &str) -> Self {
        self.entry_source = text.to_string();
        self
    }

    /// Add a source file relative to the workspace root.
    #[must_use]
    pub fn source(mut self, relative: &str, text: &str) -> Self {
        self.sources.push((relative.to_string(), text.to_string()));
        self
    }

    /// Render the manifest.
    #[must_use]
    pub fn manifest_text(&self) -> String {
        let list = |items: &[String]| {
            items
                .iter()
                .map(|s| format!("{s:?}"))
                .collect::<Vec<_>>()
                .join(", ")
        };
        let mut text = String::new();
        let _ = writeln!(text, "id = {:?}", self.id);
        let _ = writeln!(text, "api = 1");
        if self.disabled {
            let _ = writeln!(text, "load = \"disable\"");
        }
        let _ = writeln!(text, "depends = [{}]", list(&self.depends));
        let _ = writeln!(text, "commands = [{}]", list(&self.commands));
        let _ = writeln!(text, "permissions = [{}]", list(&self.permissions));
        text.push_str(&self.extra);
        if self.debug {
            let _ = writeln!(text, "\n[options]\ndebug = true");
        }
        text
    }

    /// Write the workspace and return its root.
    ///
    /// # Panics
    ///
    /// Panics if any file cannot be written.
    pub fn write(self) -> PathBuf {
        let src = self.dir.join("src");
        std::fs::create_dir_all(&src).expect("create src");
        std::fs::write(self.dir.join("module.toml"), self.manifest_text()).expect("write manifest");
        std::fs::write(src.join("main.ks"), &self.entry_source).expect("write entry");
        for (relative, text) in &self.sources {
            let path = self.dir.join(relative);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).expect("create source dir");
            }
            std::fs::write(&path, text).expect("write source");
        }
        self.dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_loadable_manifest() {
        let fixture = WorkspaceFixture::new();
        let root = fixture
            .module("alpha")
            .depends(&["beta"])
            .commands(&["greet"])
            .manifest_extra("greeting = \"hi\"")
            .write();
        let ws = kiln_workspace::Workspace::load(root.clone()).unwrap();
        assert_eq!(ws.id().as_str(), "alpha");
        assert_eq!(ws.manifest().depends[0].as_str(), "beta");
        assert_eq!(ws.manifest().commands, vec!["greet".to_string()]);
        assert_eq!(ws.manifest().config.get("greeting").and_then(|v| v.as_str()), Some("hi"));
    }
}
