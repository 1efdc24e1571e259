//! Kiln Build - turns a workspace's sources into a loadable artifact.
//!
//! Compilation is content-addressed: a [`CacheKey`] digests the toolchain
//! identity, the host API level, the manifest text and every source file.
//! A key that already has an artifact in the [`CacheStore`] is returned
//! without invoking the toolchain. On a miss the sources are validated,
//! wrapped into generated units, handed to the external [`Toolchain`], and
//! the resulting WebAssembly units are packed into a [`Bundle`] that is
//! written to the cache atomically.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod bundle;
pub mod cache;
pub mod codegen;
pub mod compiler;
pub mod error;
pub mod key;
pub mod toolchain;
pub mod validate;

pub use bundle::{BUNDLE_META_FILE, Bundle, BundleMeta, BundleUnit};
pub use cache::{ARTIFACT_EXTENSION, CacheStore};
pub use codegen::{ENTRY_FACTORY, ENTRY_UNIT, GeneratedUnit, PRELUDE_UNIT};
pub use compiler::{Artifact, ArtifactCompiler, DEFAULT_NAMESPACE_PREFIX};
pub use error::{BuildResult, CompileError};
pub use key::CacheKey;
pub use toolchain::{CommandToolchain, CompileRequest, Toolchain, ToolchainInfo};
