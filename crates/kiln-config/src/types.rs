//! Configuration types.
//!
//! Every struct implements [`Default`] with the same values as the embedded
//! `defaults.toml`, so a bare `[section]` header still produces a working
//! configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Top-level Config
// ---------------------------------------------------------------------------

/// Root configuration for the module host.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Where module workspaces live.
    pub workspaces: WorkspacesSection,
    /// Artifact cache and toolchain.
    pub build: BuildSection,
    /// Symbol policy and execution limits for loaded modules.
    pub isolation: IsolationSection,
    /// Log level, format and per-crate directives.
    pub logging: LoggingSection,
    /// Reload-on-change watcher.
    pub watch: WatchSection,
}

impl Config {
    /// Build root, falling back to `_build` under the workspaces root.
    #[must_use]
    pub fn build_root(&self) -> PathBuf {
        self.build
            .root
            .clone()
            .unwrap_or_else(|| self.workspaces.root.join(DEFAULT_BUILD_DIR))
    }
}

/// Directory name used for the build root when none is configured.
pub const DEFAULT_BUILD_DIR: &str = "_build";

// ---------------------------------------------------------------------------
// WorkspacesSection
// ---------------------------------------------------------------------------

/// Workspace discovery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkspacesSection {
    /// Directory whose immediate children are workspaces.
    pub root: PathBuf,
}

impl Default for WorkspacesSection {
    fn default() -> Self {
        Self {
            root: PathBuf::from("modules"),
        }
    }
}

// ---------------------------------------------------------------------------
// BuildSection
// ---------------------------------------------------------------------------

/// Compilation settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildSection {
    /// Artifact cache root. See [`Config::build_root`].
    pub root: Option<PathBuf>,
    /// Compiles run at once.
    pub max_parallel: usize,
    /// External toolchain.
    pub toolchain: ToolchainSection,
}

impl Default for BuildSection {
    fn default() -> Self {
        Self {
            root: None,
            max_parallel: 4,
            toolchain: ToolchainSection::default(),
        }
    }
}

/// External toolchain invocation. `args` may use the placeholders `{out}`,
/// `{target}`, `{module}`, `{namespace}` and `{sources}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolchainSection {
    /// Program to run.
    pub program: String,
    /// Argument template.
    pub args: Vec<String>,
    /// Toolchain name recorded in cache keys.
    pub name: String,
    /// Toolchain version recorded in cache keys.
    pub version: String,
    /// Target platform.
    pub target: String,
}

impl Default for ToolchainSection {
    fn default() -> Self {
        Self {
            program: "kilnc".to_owned(),
            args: [
                "--target",
                "{target}",
                "--package",
                "{namespace}",
                "--out",
                "{out}",
                "{sources}",
            ]
            .iter()
            .map(|s| (*s).to_owned())
            .collect(),
            name: "kilnc".to_owned(),
            version: "0.1.0".to_owned(),
            target: "wasm32-wasip1".to_owned(),
        }
    }
}

// ---------------------------------------------------------------------------
// IsolationSection
// ---------------------------------------------------------------------------

/// Isolation boundary settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IsolationSection {
    /// Symbol prefixes a module may never import.
    pub denied_prefixes: Vec<String>,
    /// Prefix of each module's own namespace; resolved child-first.
    pub own_namespace_prefix: String,
    /// Linear memory limit per module, in 64 KiB pages.
    pub memory_max_pages: u32,
    /// Time limit for a single call into a module.
    pub call_timeout_ms: u64,
}

impl IsolationSection {
    /// [`call_timeout_ms`](Self::call_timeout_ms) as a [`Duration`].
    #[must_use]
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }
}

impl Default for IsolationSection {
    fn default() -> Self {
        Self {
            denied_prefixes: vec![
                "kiln:internal/".to_owned(),
                "kiln:host/".to_owned(),
                "extism:host/user".to_owned(),
            ],
            own_namespace_prefix: "kiln:module/".to_owned(),
            memory_max_pages: 1024,
            call_timeout_ms: 30_000,
        }
    }
}

// ---------------------------------------------------------------------------
// LoggingSection
// ---------------------------------------------------------------------------

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    /// Global level: `"trace"`, `"debug"`, `"info"`, `"warn"` or `"error"`.
    pub level: String,
    /// `"pretty"`, `"compact"`, `"json"` or `"full"`.
    pub format: String,
    /// Extra filter directives (e.g. `["kiln_build=debug"]`).
    pub directives: Vec<String>,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
            format: "compact".to_owned(),
            directives: Vec::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// WatchSection
// ---------------------------------------------------------------------------

/// File watcher settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchSection {
    /// Reload modules when their sources change.
    pub enabled: bool,
    /// Quiet period before a change triggers a reload.
    pub debounce_ms: u64,
}

impl WatchSection {
    /// [`debounce_ms`](Self::debounce_ms) as a [`Duration`].
    #[must_use]
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

impl Default for WatchSection {
    fn default() -> Self {
        Self {
            enabled: false,
            debounce_ms: 500,
        }
    }
}
