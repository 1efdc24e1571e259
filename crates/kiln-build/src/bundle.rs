//! Artifact bundle format.
//!
//! An artifact is a tar archive holding a `kiln-bundle.toml` header and one
//! WebAssembly unit per generated unit under `units/`. Bundles are written
//! once and never modified.

use std::io::Read;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{BuildResult, CompileError};
use crate::toolchain::ToolchainInfo;

/// Name of the header entry inside a bundle.
pub const BUNDLE_META_FILE: &str = "kiln-bundle.toml";

const UNIT_DIR: &str = "units/";
const FORMAT_VERSION: u32 = 1;

/// Bundle header.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BundleMeta {
    /// Bundle format version.
    pub format: u32,
    /// Module the bundle was built for.
    pub module_id: String,
    /// Package every unit lives in.
    pub namespace: String,
    /// Unit exporting the entry factory.
    pub entry_unit: String,
    /// Cache key the bundle is stored under.
    pub cache_key: String,
    /// Toolchain that produced the units.
    pub toolchain: ToolchainInfo,
    /// Build time.
    pub built_at: DateTime<Utc>,
}

impl BundleMeta {
    /// Header for a bundle built now.
    #[must_use]
    pub fn new(
        module_id: impl Into<String>,
        namespace: impl Into<String>,
        entry_unit: impl Into<String>,
        cache_key: impl Into<String>,
        toolchain: ToolchainInfo,
    ) -> Self {
        Self {
            format: FORMAT_VERSION,
            module_id: module_id.into(),
            namespace: namespace.into(),
            entry_unit: entry_unit.into(),
            cache_key: cache_key.into(),
            toolchain,
            built_at: Utc::now(),
        }
    }
}

/// One compiled unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleUnit {
    /// Unit name.
    pub name: String,
    /// WebAssembly bytes.
    pub bytes: Vec<u8>,
}

/// A decoded artifact.
#[derive(Debug, Clone, PartialEq)]
pub struct Bundle {
    /// Header.
    pub meta: BundleMeta,
    /// Units in archive order.
    pub units: Vec<BundleUnit>,
}

impl Bundle {
    /// Look up a unit by name.
    #[must_use]
    pub fn unit(&self, name: &str) -> Option<&BundleUnit> {
        self.units.iter().find(|u| u.name == name)
    }

    /// Encode the bundle as a tar archive.
    ///
    /// # Errors
    ///
    /// Returns [`CompileError::Bundle`] if the header cannot be serialized.
    pub fn to_bytes(&self) -> BuildResult<Vec<u8>> {
        let in_memory = PathBuf::from("<memory>");
        let err = |message: String| CompileError::Bundle {
            path: in_memory.clone(),
            message,
        };

        let meta = toml::to_string(&self.meta).map_err(|e| err(format!("header: {e}")))?;
        let mut tar = tar::Builder::new(Vec::new());
        append(&mut tar, BUNDLE_META_FILE, meta.as_bytes()).map_err(|e| err(e.to_string()))?;
        for unit in &self.units {
            let path = format!("{UNIT_DIR}{}.wasm", unit.name);
            append(&mut tar, &path, &unit.bytes).map_err(|e| err(e.to_string()))?;
        }
        tar.into_inner().map_err(|e| err(e.to_string()))
    }

    /// Read a bundle from disk.
    ///
    /// # Errors
    ///
    /// Returns [`CompileError::Io`] if the file cannot be opened and
    /// [`CompileError::Bundle`] if it is not a valid bundle.
    pub fn read(path: &Path) -> BuildResult<Self> {
        let file = std::fs::File::open(path).map_err(|e| CompileError::io(path, e))?;
        Self::from_reader(file, path)
    }

    /// Decode a bundle; `origin` is used in errors.
    ///
    /// # Errors
    ///
    /// Returns [`CompileError::Bundle`] if the archive is malformed, has no
    /// header, or declares an entry unit it does not contain.
    pub fn from_reader<R: Read>(reader: R, origin: &Path) -> BuildResult<Self> {
        let err = |message: String| CompileError::Bundle {
            path: origin.to_path_buf(),
            message,
        };

        let mut archive = tar::Archive::new(reader);
        let mut meta = None;
        let mut units = Vec::new();

        for entry in archive.entries().map_err(|e| err(e.to_string()))? {
            let mut entry = entry.map_err(|e| err(e.to_string()))?;
            let name = entry
                .path()
                .map_err(|e| err(e.to_string()))?
                .to_string_lossy()
                .into_owned();
            let mut bytes = Vec::new();
            entry
                .read_to_end(&mut bytes)
                .map_err(|e| err(format!("{name}: {e}")))?;

            if name == BUNDLE_META_FILE {
                let text = String::from_utf8(bytes).map_err(|e| err(format!("header: {e}")))?;
                let parsed: BundleMeta =
                    toml::from_str(&text).map_err(|e| err(format!("header: {e}")))?;
                meta = Some(parsed);
            } else if let Some(unit) = name
                .strip_prefix(UNIT_DIR)
                .and_then(|n| n.strip_suffix(".wasm"))
            {
                units.push(BundleUnit {
                    name: unit.to_string(),
                    bytes,
                });
            }
        }

        let meta = meta.ok_or_else(|| err(format!("missing {BUNDLE_META_FILE}")))?;
        if meta.format != FORMAT_VERSION {
            return Err(err(format!("unsupported bundle format {}", meta.format)));
        }
        if !units.iter().any(|u| u.name == meta.entry_unit) {
            return Err(err(format!("entry unit {} not in bundle", meta.entry_unit)));
        }
        Ok(Self { meta, units })
    }
}

fn append(tar: &mut tar::Builder<Vec<u8>>, path: &str, data: &[u8]) -> std::io::Result<()> {
    let mut header = tar::Header::new_gnu();
    header.set_size(data.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    tar.append_data(&mut header, path, data)
}
