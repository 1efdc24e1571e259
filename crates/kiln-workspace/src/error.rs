use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while reading a workspace or its manifest.
///
/// A `ManifestError` only ever disqualifies the workspace it was raised for;
/// discovery records it and moves on to the next directory.
#[derive(Debug, Error)]
pub enum ManifestError {
    /// The manifest or a workspace directory could not be read.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path that failed.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The manifest is not valid TOML or has a field of the wrong type.
    #[error("failed to parse manifest at {path}: {message}")]
    Parse {
        /// Path to the manifest.
        path: PathBuf,
        /// Parser message.
        message: String,
    },

    /// A required field is absent or blank.
    #[error("manifest at {path} is missing required field `{field}`")]
    MissingField {
        /// Path to the manifest.
        path: PathBuf,
        /// Field name.
        field: &'static str,
    },

    /// A field is present but its value is not acceptable.
    #[error("manifest at {path} has invalid `{field}`: {message}")]
    InvalidField {
        /// Path to the manifest.
        path: PathBuf,
        /// Field name.
        field: &'static str,
        /// What is wrong with it.
        message: String,
    },

    /// A module id is malformed.
    #[error("invalid module id: {0}")]
    InvalidId(String),

    /// The manifest targets an API level this host does not provide.
    #[error("module {id} requires api {requested}, host supports up to {supported}")]
    UnsupportedApi {
        /// Module id.
        id: String,
        /// Level declared in the manifest.
        requested: u32,
        /// Highest level the host supports.
        supported: u32,
    },

    /// The entry path escapes the workspace or is absolute.
    #[error("entry {entry} of module {id} must be a relative path inside the workspace")]
    EntryOutsideWorkspace {
        /// Module id.
        id: String,
        /// Declared entry.
        entry: String,
    },

    /// The entry file does not exist.
    #[error("entry file {path} of module {id} does not exist")]
    EntryNotFound {
        /// Module id.
        id: String,
        /// Resolved entry path.
        path: PathBuf,
    },

    /// Another workspace earlier in discovery order already owns this id.
    #[error("duplicate module id {id}: {rejected} ignored, already provided by {kept}")]
    DuplicateId {
        /// The contested id.
        id: String,
        /// Workspace that keeps the id.
        kept: PathBuf,
        /// Workspace that was rejected.
        rejected: PathBuf,
    },
}

/// Result type for workspace operations.
pub type WorkspaceResult<T> = Result<T, ManifestError>;
