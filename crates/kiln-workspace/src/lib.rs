//! Kiln Workspace - module workspaces on disk.
//!
//! A workspace is a directory holding a `module.toml` manifest and the
//! module's sources under `src/`. This crate reads and validates manifests
//! and enumerates the workspaces below a root directory in a deterministic
//! order. It does not know about dependency ordering or compilation.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod discovery;
pub mod error;
pub mod id;
pub mod manifest;
pub mod workspace;

pub use discovery::{Discovery, RejectedWorkspace, discover, find_workspace};
pub use error::{ManifestError, WorkspaceResult};
pub use id::ModuleId;
pub use manifest::{LoadMode, Manifest, SUPPORTED_API_LEVEL};
pub use workspace::{MANIFEST_FILE_NAME, SOURCE_DIR, SOURCE_EXTENSION, SourceFile, Workspace};
