use std::path::PathBuf;

use thiserror::Error;

/// Errors returned to a module when it uses its context.
#[derive(Debug, Error)]
pub enum ContextError {
    /// The module's context has been torn down.
    #[error("context for module {0} is closed")]
    Closed(String),

    /// The command is not declared in the module's manifest.
    #[error("module {module} did not declare command `{command}`")]
    UndeclaredCommand {
        /// Module id.
        module: String,
        /// Normalized command name.
        command: String,
    },

    /// The permission is not declared in the module's manifest.
    #[error("module {module} did not declare permission `{permission}`")]
    UndeclaredPermission {
        /// Module id.
        module: String,
        /// Permission name.
        permission: String,
    },

    /// Another module already registered the command.
    #[error("command `{command}` is already registered by {owner}")]
    CommandTaken {
        /// Normalized command name.
        command: String,
        /// Current owner.
        owner: String,
    },

    /// An empty command name or topic.
    #[error("invalid name: {0}")]
    InvalidName(String),

    /// Storage could not be read or written.
    #[error("storage error at {path}: {message}")]
    Storage {
        /// Storage file.
        path: PathBuf,
        /// What went wrong.
        message: String,
    },
}

/// Result type for context operations.
pub type ContextResult<T> = Result<T, ContextError>;
