//! Seams between the runtime and a concrete module backend.

use std::fmt;
use std::sync::Arc;

use kiln_build::Artifact;
use kiln_context::ModuleContext;
use kiln_workspace::{ModuleId, Workspace};

use crate::error::LoadResult;

/// A lifecycle callback raised or trapped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackError {
    /// `enable` or `disable`.
    pub callback: String,
    /// What the module reported.
    pub message: String,
}

impl CallbackError {
    /// Create a callback error.
    pub fn new(callback: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            callback: callback.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for CallbackError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} callback failed: {}", self.callback, self.message)
    }
}

impl std::error::Error for CallbackError {}

/// Turns a compiled artifact into a loaded, not yet instantiated, module.
pub trait ModuleLoader: Send + Sync {
    /// Load `artifact` for `workspace`, enforcing the isolation boundary.
    ///
    /// # Errors
    ///
    /// Returns a [`LoadError`](crate::LoadError) if the artifact cannot be
    /// read or violates the boundary.
    fn load(&self, workspace: &Workspace, artifact: &Artifact) -> LoadResult<Box<dyn ModuleHandle>>;
}

/// A loaded artifact. Owns everything the backend allocated for it.
pub trait ModuleHandle: Send {
    /// The module this handle was loaded for.
    fn module(&self) -> &ModuleId;

    /// Run the entry factory against `ctx`.
    ///
    /// # Errors
    ///
    /// Returns a [`LoadError`](crate::LoadError) if instantiation or the
    /// factory fails.
    fn instantiate(&mut self, ctx: Arc<ModuleContext>) -> LoadResult<Box<dyn ModuleInstance>>;

    /// Drop every runtime object held for this artifact.
    fn release(self: Box<Self>);
}

/// A live module object.
pub trait ModuleInstance: Send {
    /// Run the enable callback, if the module defines one.
    ///
    /// # Errors
    ///
    /// Returns a [`CallbackError`] if the callback fails.
    fn enable(&mut self) -> Result<(), CallbackError>;

    /// Run the disable callback, if the module defines one.
    ///
    /// # Errors
    ///
    /// Returns a [`CallbackError`] if the callback fails.
    fn disable(&mut self) -> Result<(), CallbackError>;
}
