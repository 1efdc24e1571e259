//! Module manifest types.
//!
//! A manifest (`module.toml`) declares a module's identity, its entry
//! source, the modules it depends on and the commands and permissions it is
//! allowed to register. Unknown top-level keys are kept verbatim as the
//! module's own configuration.

use std::path::{Component, Path, PathBuf};

use serde::Deserialize;

use crate::error::{ManifestError, WorkspaceResult};
use crate::id::ModuleId;
use crate::workspace::SOURCE_EXTENSION;

/// Highest manifest `api` level this host understands.
pub const SUPPORTED_API_LEVEL: u32 = 1;

const DEFAULT_VERSION: &str = "1.0.0";
const DEFAULT_ENTRY: &str = "src/main";

/// Whether a workspace takes part in bulk loads.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LoadMode {
    /// Loaded by every load cycle.
    #[default]
    Enable,
    /// Skipped by discovery; a single reload only deactivates it.
    Disable,
}

/// A validated module manifest. Immutable once loaded.
#[derive(Debug, Clone, PartialEq)]
pub struct Manifest {
    /// Unique module id.
    pub id: ModuleId,
    /// Display name, defaults to the id.
    pub name: String,
    /// Module version string.
    pub version: String,
    /// API level the module was written against.
    pub api: u32,
    /// Entry source, relative to the workspace root.
    pub entry: PathBuf,
    /// Load mode.
    pub load: LoadMode,
    /// Enables the module's debug log output.
    pub debug: bool,
    /// Modules that must be active before this one.
    pub depends: Vec<ModuleId>,
    /// Permissions the module may register.
    pub permissions: Vec<String>,
    /// Commands the module may register.
    pub commands: Vec<String>,
    /// Remaining manifest keys, handed to the module as its configuration.
    pub config: toml::Table,
}

#[derive(Debug, Default, Deserialize)]
struct RawOptions {
    debug: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct RawManifest {
    id: Option<String>,
    name: Option<String>,
    version: Option<String>,
    api: Option<i64>,
    entry: Option<String>,
    load: Option<String>,
    #[serde(default)]
    depends: Vec<String>,
    #[serde(default)]
    permissions: Vec<String>,
    #[serde(default)]
    commands: Vec<String>,
    #[serde(default)]
    options: RawOptions,
    #[serde(flatten)]
    extra: toml::Table,
}

impl Manifest {
    /// Parse and validate manifest text. `path` is only used in errors.
    ///
    /// # Errors
    ///
    /// Returns a [`ManifestError`] if the text is not valid TOML, the id is
    /// missing or malformed, the api level is unsupported, the load mode is
    /// unknown or the entry path leaves the workspace.
    pub fn parse(text: &str, path: &Path) -> WorkspaceResult<Self> {
        let raw: RawManifest = toml::from_str(text).map_err(|e| ManifestError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

        let id = match raw.id.as_deref().map(str::trim) {
            None | Some("") => {
                return Err(ManifestError::MissingField {
                    path: path.to_path_buf(),
                    field: "id",
                });
            },
            Some(id) => ModuleId::new(id)?,
        };

        let name = non_blank(raw.name).unwrap_or_else(|| id.to_string());
        let version = non_blank(raw.version).unwrap_or_else(|| DEFAULT_VERSION.to_string());
        let api = parse_api(raw.api, &id, path)?;
        let load = parse_load(raw.load.as_deref(), path)?;
        let entry = normalize_entry(raw.entry.as_deref(), &id)?;

        let depends = clean_list(raw.depends)
            .into_iter()
            .map(ModuleId::new)
            .collect::<WorkspaceResult<Vec<_>>>()?;

        Ok(Self {
            name,
            version,
            api,
            entry,
            load,
            debug: raw.options.debug.unwrap_or(false),
            depends,
            permissions: clean_list(raw.permissions),
            commands: clean_list(raw.commands),
            config: raw.extra,
            id,
        })
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Trim entries and drop blank ones, keeping declaration order.
fn clean_list(items: Vec<String>) -> Vec<String> {
    items
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn parse_api(api: Option<i64>, id: &ModuleId, path: &Path) -> WorkspaceResult<u32> {
    let Some(api) = api else {
        return Ok(SUPPORTED_API_LEVEL);
    };
    let level = u32::try_from(api)
        .ok()
        .filter(|level| *level >= 1)
        .ok_or_else(|| ManifestError::InvalidField {
            path: path.to_path_buf(),
            field: "api",
            message: format!("expected a positive integer, got {api}"),
        })?;
    if level > SUPPORTED_API_LEVEL {
        return Err(ManifestError::UnsupportedApi {
            id: id.to_string(),
            requested: level,
            supported: SUPPORTED_API_LEVEL,
        });
    }
    Ok(level)
}

fn parse_load(load: Option<&str>, path: &Path) -> WorkspaceResult<LoadMode> {
    match load.map(|l| l.trim().to_ascii_lowercase()).as_deref() {
        None | Some("" | "enable") => Ok(LoadMode::Enable),
        Some("disable") => Ok(LoadMode::Disable),
        Some(other) => Err(ManifestError::InvalidField {
            path: path.to_path_buf(),
            field: "load",
            message: format!("expected \"enable\" or \"disable\", got \"{other}\""),
        }),
    }
}

fn normalize_entry(entry: Option<&str>, id: &ModuleId) -> WorkspaceResult<PathBuf> {
    let declared = entry.map(str::trim).filter(|e| !e.is_empty()).unwrap_or(DEFAULT_ENTRY);
    let mut path = PathBuf::from(declared);

    let escapes = path
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
    if escapes {
        return Err(ManifestError::EntryOutsideWorkspace {
            id: id.to_string(),
            entry: declared.to_string(),
        });
    }

    if path.extension().is_none() {
        path.set_extension(SOURCE_EXTENSION);
    }
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> WorkspaceResult<Manifest> {
        Manifest::parse(text, Path::new("module.toml"))
    }

    #[test]
    fn minimal_manifest_gets_defaults() {
        let m = parse(r#"id = "core""#).unwrap();
        assert_eq!(m.id.as_str(), "core");
        assert_eq!(m.name, "core");
        assert_eq!(m.version, "1.0.0");
        assert_eq!(m.api, 1);
        assert_eq!(m.entry, PathBuf::from("src/main.ks"));
        assert_eq!(m.load, LoadMode::Enable);
        assert!(!m.debug);
        assert!(m.depends.is_empty());
        assert!(m.permissions.is_empty());
        assert!(m.commands.is_empty());
        assert!(m.config.is_empty());
    }

    #[test]
    fn full_manifest() {
        let m = parse(
            r#"
            id = "shop"
            name = "Shop"
            version = "2.3.0"
            api = 1
            entry = "src/boot.ks"
            load = "Disable"
            depends = ["economy", "  ", " chat "]
            permissions = ["shop.use"]
            commands = ["shop", ""]

            [options]
            debug = true

            [prices]
            apple = 3
            "#,
        )
        .unwrap();
        assert_eq!(m.name, "Shop");
        assert_eq!(m.version, "2.3.0");
        assert_eq!(m.entry, PathBuf::from("src/boot.ks"));
        assert_eq!(m.load, LoadMode::Disable);
        assert!(m.debug);
        assert_eq!(
            m.depends,
            vec![ModuleId::from_static("economy"), ModuleId::from_static("chat")]
        );
        assert_eq!(m.permissions, vec!["shop.use"]);
        assert_eq!(m.commands, vec!["shop"]);
        assert!(m.config.contains_key("prices"));
        assert!(!m.config.contains_key("options"));
    }

    #[test]
    fn missing_id_is_rejected() {
        let err = parse(r#"name = "nameless""#).unwrap_err();
        assert!(matches!(err, ManifestError::MissingField { field: "id", .. }));

        let err = parse(r#"id = "   ""#).unwrap_err();
        assert!(matches!(err, ManifestError::MissingField { field: "id", .. }));
    }

    #[test]
    fn unsupported_api_is_rejected() {
        let err = parse("id = \"x\"\napi = 2").unwrap_err();
        assert!(matches!(err, ManifestError::UnsupportedApi { requested: 2, .. }));

        let err = parse("id = \"x\"\napi = 0").unwrap_err();
        assert!(matches!(err, ManifestError::InvalidField { field: "api", .. }));
    }

    #[test]
    fn unknown_load_mode_is_rejected() {
        let err = parse("id = \"x\"\nload = \"later\"").unwrap_err();
        assert!(matches!(err, ManifestError::InvalidField { field: "load", .. }));
    }

    #[test]
    fn entry_must_stay_inside_workspace() {
        for entry in ["../other/main.ks", "/etc/passwd", "src/../../x"] {
            let text = format!("id = \"x\"\nentry = \"{entry}\"");
            let err = parse(&text).unwrap_err();
            assert!(
                matches!(err, ManifestError::EntryOutsideWorkspace { .. }),
                "{entry} should be rejected"
            );
        }
    }

    #[test]
    fn entry_without_extension_gets_source_extension() {
        let m = parse("id = \"x\"\nentry = \"src/start\"").unwrap();
        assert_eq!(m.entry, PathBuf::from("src/start.ks"));
    }

    #[test]
    fn ids_keep_case_and_punctuation() {
        let m = parse("id = \" Shop \"\ndepends = [\"my.module\", \"Focus Tools\"]").unwrap();
        assert_eq!(m.id.as_str(), "Shop");
        assert_eq!(m.depends[0].as_str(), "my.module");
        assert_eq!(m.depends[1].as_str(), "Focus Tools");
    }

    #[test]
    fn invalid_toml_is_a_parse_error() {
        let err = parse("id = ").unwrap_err();
        assert!(matches!(err, ManifestError::Parse { .. }));
    }
}
