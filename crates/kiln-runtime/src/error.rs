use std::fmt::{self, Write as _};

use kiln_build::CompileError;
use kiln_context::{ContextError, LeakedResource};
use kiln_loader::{CallbackError, LoadError};
use kiln_workspace::{ManifestError, ModuleId};
use thiserror::Error;

/// Maximum diagnostic lines quoted in a single-reload message.
pub const MAX_REPORTED_DIAGNOSTICS: usize = 40;

/// A workspace was excluded by dependency resolution.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DependencyError {
    /// Declared dependencies are absent from the discovered set.
    #[error("module {id} depends on missing module(s): {}", join(missing))]
    Missing {
        /// Excluded module.
        id: ModuleId,
        /// Dependencies that could not be satisfied.
        missing: Vec<ModuleId>,
    },

    /// A dependency is present but was excluded itself.
    #[error("module {id} depends on excluded module(s): {}", join(excluded))]
    Blocked {
        /// Excluded module.
        id: ModuleId,
        /// Dependencies that were excluded.
        excluded: Vec<ModuleId>,
    },

    /// The modules form, or depend on, a dependency cycle.
    #[error("dependency cycle among modules: {}", join(ids))]
    Cycle {
        /// Every module left unordered.
        ids: Vec<ModuleId>,
    },

    /// A single reload was asked for while dependencies are not active.
    #[error("dependencies of {id} are not active: {}; run a full reload instead", join(inactive))]
    Inactive {
        /// Module being reloaded.
        id: ModuleId,
        /// Dependencies that are not currently active.
        inactive: Vec<ModuleId>,
    },
}

/// A module callback failed.
#[derive(Debug, Error)]
pub enum LifecycleError {
    /// The callback returned an error.
    #[error("module {module}: {source}")]
    Callback {
        /// Module id.
        module: ModuleId,
        /// Reported failure.
        #[source]
        source: CallbackError,
    },

    /// The callback panicked.
    #[error("module {module}: {callback} callback panicked: {message}")]
    Panicked {
        /// Module id.
        module: ModuleId,
        /// `instantiate`, `enable` or `disable`.
        callback: &'static str,
        /// Panic payload, if it was a string.
        message: String,
    },

    /// The runtime context could not be created.
    #[error("module {module}: cannot create context: {source}")]
    Context {
        /// Module id.
        module: ModuleId,
        /// Underlying error.
        #[source]
        source: ContextError,
    },
}

/// Everything that can go wrong for one workspace during a load cycle.
/// Never fatal to other workspaces.
#[derive(Debug, Error)]
pub enum ModuleError {
    /// Manifest missing, invalid or duplicated.
    #[error(transparent)]
    Manifest(#[from] ManifestError),

    /// Excluded by dependency resolution.
    #[error(transparent)]
    Dependency(#[from] DependencyError),

    /// The compiler or toolchain failed.
    #[error(transparent)]
    Compile(#[from] CompileError),

    /// The isolation boundary rejected the artifact.
    #[error(transparent)]
    Load(#[from] LoadError),

    /// A lifecycle callback failed.
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
}

impl ModuleError {
    /// Message for a single-reload callback: compile failures quote at most
    /// [`MAX_REPORTED_DIAGNOSTICS`] diagnostic lines.
    #[must_use]
    pub fn report(&self) -> String {
        let Self::Compile(CompileError::Toolchain { module, diagnostics }) = self else {
            return self.to_string();
        };
        let mut out = format!("compilation of {module} failed:");
        for line in diagnostics.iter().take(MAX_REPORTED_DIAGNOSTICS) {
            out.push('\n');
            out.push_str(line);
        }
        let hidden = diagnostics.len().saturating_sub(MAX_REPORTED_DIAGNOSTICS);
        if hidden > 0 {
            let _ = write!(out, "\n... ({hidden} more)");
        }
        out
    }
}

/// Resources found attributed to a module after its teardown. Logged only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceLeakWarning {
    /// Module that was torn down.
    pub module: ModuleId,
    /// What is still alive.
    pub leaks: Vec<LeakedResource>,
}

impl fmt::Display for ResourceLeakWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "module {} leaked {} resource(s)", self.module, self.leaks.len())?;
        for (i, leak) in self.leaks.iter().enumerate() {
            f.write_str(if i == 0 { ": " } else { ", " })?;
            f.write_str(&leak.description)?;
        }
        Ok(())
    }
}

/// Errors returned by the [`ModuleHost`](crate::ModuleHost) handle itself.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RuntimeError {
    /// The host has shut down.
    #[error("module host has shut down")]
    Shutdown,

    /// The workspace watcher could not be started.
    #[error("workspace watcher error: {0}")]
    Watch(String),
}

/// Result type for host operations.
pub type RuntimeResult<T> = Result<T, RuntimeError>;

fn join(ids: &[ModuleId]) -> String {
    ids.iter().map(ModuleId::as_str).collect::<Vec<_>>().join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_truncates_diagnostics() {
        let diagnostics: Vec<String> = (1..=45).map(|i| format!("line {i}")).collect();
        let err = ModuleError::from(CompileError::Toolchain {
            module: "alpha".into(),
            diagnostics,
        });
        let report = err.report();
        let lines: Vec<&str> = report.lines().collect();
        assert_eq!(lines[0], "compilation of alpha failed:");
        assert_eq!(lines[1], "line 1");
        assert_eq!(lines[40], "line 40");
        assert_eq!(lines[41], "... (5 more)");
        assert_eq!(lines.len(), 42);
    }

    #[test]
    fn report_keeps_short_diagnostics() {
        let err = ModuleError::from(CompileError::Toolchain {
            module: "alpha".into(),
            diagnostics: vec!["boom".into()],
        });
        assert_eq!(err.report(), "compilation of alpha failed:\nboom");
    }

    #[test]
    fn dependency_messages() {
        let err = DependencyError::Inactive {
            id: ModuleId::from_static("a"),
            inactive: vec![ModuleId::from_static("b"), ModuleId::from_static("c")],
        };
        assert_eq!(
            err.to_string(),
            "dependencies of a are not active: b, c; run a full reload instead"
        );
    }

    #[test]
    fn leak_warning_lists_resources() {
        let warning = ResourceLeakWarning {
            module: ModuleId::from_static("a"),
            leaks: vec![LeakedResource {
                kind: kiln_context::ResourceKind::Task,
                description: "task".into(),
            }],
        };
        assert_eq!(warning.to_string(), "module a leaked 1 resource(s): task");
    }
}
