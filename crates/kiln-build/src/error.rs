use std::path::PathBuf;

use kiln_workspace::ManifestError;
use thiserror::Error;

/// Errors raised while producing an artifact. Each one is fatal only to the
/// workspace being compiled.
#[derive(Debug, Error)]
pub enum CompileError {
    /// The workspace could not be read.
    #[error(transparent)]
    Workspace(#[from] ManifestError),

    /// Filesystem error in the build root or workspace.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path that failed.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// A source unit failed the structural pre-pass.
    #[error("{unit}: {message}")]
    Structural {
        /// Source path relative to the workspace.
        unit: String,
        /// What is wrong with it.
        message: String,
    },

    /// The toolchain binary could not be started.
    #[error("failed to run toolchain `{program}`: {source}")]
    ToolchainSpawn {
        /// Program that was invoked.
        program: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The toolchain rejected the sources. Diagnostics are kept verbatim
    /// and in the order the toolchain emitted them.
    #[error("compilation of {module} failed with {} diagnostic line(s)", diagnostics.len())]
    Toolchain {
        /// Module id.
        module: String,
        /// Every diagnostic line.
        diagnostics: Vec<String>,
    },

    /// The toolchain succeeded but did not produce an expected unit.
    #[error("toolchain produced no output for unit {unit}")]
    MissingOutput {
        /// Generated unit name.
        unit: String,
    },

    /// An artifact bundle could not be written or read.
    #[error("bad artifact bundle {path}: {message}")]
    Bundle {
        /// Bundle path (or a placeholder when in memory).
        path: PathBuf,
        /// What went wrong.
        message: String,
    },

    /// A compile job died before producing a result.
    #[error("internal compiler error: {0}")]
    Internal(String),
}

impl CompileError {
    /// Diagnostic lines for display: the toolchain's own lines, or the
    /// error message as a single line.
    #[must_use]
    pub fn diagnostics(&self) -> Vec<String> {
        match self {
            Self::Toolchain { diagnostics, .. } => diagnostics.clone(),
            other => vec![other.to_string()],
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Result type for build operations.
pub type BuildResult<T> = Result<T, CompileError>;
