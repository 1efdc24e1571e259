use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while loading an artifact. Fatal only to the module being
/// loaded; the cached artifact is left intact.
#[derive(Debug, Error)]
pub enum LoadError {
    /// The artifact could not be read or decoded.
    #[error("cannot read artifact {path}: {message}")]
    Artifact {
        /// Artifact path.
        path: PathBuf,
        /// What went wrong.
        message: String,
    },

    /// A unit is not valid WebAssembly.
    #[error("unit {unit} is malformed: {message}")]
    Malformed {
        /// Unit name.
        unit: String,
        /// Parser message.
        message: String,
    },

    /// The artifact was built for a different module.
    #[error("artifact namespace {found} does not belong to this module (expected {expected})")]
    ForeignUnit {
        /// Namespace recorded in the artifact.
        found: String,
        /// Namespace of the module being loaded.
        expected: String,
    },

    /// A reference to a denied namespace.
    #[error("symbol {symbol} is in a denied namespace (reached via {})", chain.join(" -> "))]
    Denied {
        /// Offending symbol, `<namespace>::<name>`.
        symbol: String,
        /// Units traversed from the entry unit to the reference.
        chain: Vec<String>,
    },

    /// Neither the artifact nor the host provides a symbol.
    #[error("unresolved symbol {symbol} in unit {unit}")]
    Unresolved {
        /// Missing symbol.
        symbol: String,
        /// Unit importing it.
        unit: String,
    },

    /// A unit imports from the entry unit, which is linked as the main
    /// module and cannot be imported.
    #[error("unit {unit} imports {symbol} from the entry unit")]
    EntryImported {
        /// Offending symbol.
        symbol: String,
        /// Unit importing it.
        unit: String,
    },

    /// The entry unit lacks the factory export.
    #[error("entry unit {unit} does not export {factory}")]
    MissingFactory {
        /// Entry unit.
        unit: String,
        /// Expected export.
        factory: &'static str,
    },

    /// The runtime refused to instantiate the artifact.
    #[error("failed to instantiate module: {0}")]
    Instantiate(String),

    /// The entry factory raised.
    #[error("module factory failed: {0}")]
    FactoryFailed(String),
}

/// Result type for load operations.
pub type LoadResult<T> = Result<T, LoadError>;
