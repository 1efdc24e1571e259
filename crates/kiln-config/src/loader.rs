//! Config file discovery and layered loading.
//!
//! 1. Parse `defaults.toml`
//! 2. Merge `<config dir>/kiln/config.toml` (user)
//! 3. Merge the explicit file, if any
//! 4. Apply `KILN_*` overrides
//! 5. Deserialize and validate

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::{ConfigError, ConfigResult};
use crate::merge::{deep_merge, set_path};
use crate::types::Config;
use crate::validate;

/// Embedded default configuration.
const DEFAULTS_TOML: &str = include_str!("defaults.toml");

/// Maximum allowed config file size (1 MiB).
const MAX_CONFIG_FILE_SIZE: u64 = 1_048_576;

/// Prefix of recognised environment overrides.
pub const ENV_PREFIX: &str = "KILN_";

/// Environment variable to dotted config path.
const ENV_OVERRIDES: &[(&str, &str)] = &[
    ("KILN_LOG_LEVEL", "logging.level"),
    ("KILN_BUILD_ROOT", "build.root"),
    ("KILN_MAX_PARALLEL", "build.max_parallel"),
    ("KILN_WORKSPACES", "workspaces.root"),
];

/// A loaded configuration and where it came from.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// The merged, validated configuration.
    pub config: Config,
    /// Files merged over the defaults, in order.
    pub loaded_files: Vec<String>,
    /// Environment variables that overrode a value.
    pub env_overrides: Vec<String>,
}

/// `KILN_*` variables from the process environment.
#[must_use]
pub fn collect_env_vars() -> HashMap<String, String> {
    std::env::vars()
        .filter(|(k, _)| k.starts_with(ENV_PREFIX))
        .collect()
}

/// `<config dir>/kiln`, if the platform has a config directory.
#[must_use]
pub fn user_config_dir() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("kiln"))
}

/// Load the layered configuration.
///
/// `user_dir` is the directory holding the user `config.toml`; a missing
/// file there is skipped. `explicit` must exist when given.
///
/// # Errors
///
/// Returns a [`ConfigError`] if a file is unreadable, malformed or larger
/// than 1 MiB, an override cannot be parsed, or validation fails.
pub fn load(
    user_dir: Option<&Path>,
    explicit: Option<&Path>,
    env_vars: &HashMap<String, String>,
) -> ConfigResult<ResolvedConfig> {
    let mut merged: toml::Value =
        toml::from_str(DEFAULTS_TOML).map_err(|e| ConfigError::ParseError {
            path: "<embedded defaults>".to_owned(),
            source: e,
        })?;
    let mut loaded_files = Vec::new();

    if let Some(dir) = user_dir {
        let path = dir.join("config.toml");
        if let Some(overlay) = try_load_file(&path)? {
            deep_merge(&mut merged, &overlay);
            loaded_files.push(path.display().to_string());
            info!(path = %path.display(), "loaded user config");
        }
    }

    if let Some(path) = explicit {
        let overlay = try_load_file(path)?.ok_or_else(|| ConfigError::ReadError {
            path: path.display().to_string(),
            source: std::io::Error::from(std::io::ErrorKind::NotFound),
        })?;
        deep_merge(&mut merged, &overlay);
        loaded_files.push(path.display().to_string());
        info!(path = %path.display(), "loaded config file");
    }

    let env_overrides = apply_env_overrides(&mut merged, env_vars)?;
    if !env_overrides.is_empty() {
        debug!(count = env_overrides.len(), "applied environment overrides");
    }

    let config: Config =
        merged
            .try_into()
            .map_err(|e: toml::de::Error| ConfigError::ParseError {
                path: "<merged config>".to_owned(),
                source: e,
            })?;
    validate::validate(&config)?;

    Ok(ResolvedConfig {
        config,
        loaded_files,
        env_overrides,
    })
}

fn apply_env_overrides(
    merged: &mut toml::Value,
    env_vars: &HashMap<String, String>,
) -> ConfigResult<Vec<String>> {
    let mut applied = Vec::new();
    for (var, path) in ENV_OVERRIDES {
        let Some(raw) = env_vars.get(*var) else {
            continue;
        };
        let value = if *path == "build.max_parallel" {
            let n: i64 = raw.trim().parse().map_err(|_| ConfigError::ValidationError {
                field: (*var).to_owned(),
                message: format!("expected an integer, got '{raw}'"),
            })?;
            toml::Value::Integer(n)
        } else {
            toml::Value::String(raw.clone())
        };
        set_path(merged, path, value);
        applied.push((*var).to_owned());
    }
    Ok(applied)
}

/// Read and parse a file, returning `None` if it does not exist.
///
/// Reads once and checks the size afterwards, so there is no window
/// between a metadata check and the read.
fn try_load_file(path: &Path) -> ConfigResult<Option<toml::Value>> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "config file not found, skipping");
            return Ok(None);
        },
        Err(e) => {
            return Err(ConfigError::ReadError {
                path: path.display().to_string(),
                source: e,
            });
        },
    };

    if content.len() as u64 > MAX_CONFIG_FILE_SIZE {
        return Err(ConfigError::ValidationError {
            field: path.display().to_string(),
            message: format!(
                "config file is {} bytes, exceeding the {} byte limit",
                content.len(),
                MAX_CONFIG_FILE_SIZE
            ),
        });
    }

    let value: toml::Value = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
        path: path.display().to_string(),
        source: e,
    })?;
    Ok(Some(value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_default_impls() {
        let parsed: Config = toml::from_str(DEFAULTS_TOML).unwrap();
        assert_eq!(parsed, Config::default());
    }

    #[test]
    fn missing_file_is_skipped() {
        let result = try_load_file(Path::new("/nonexistent/kiln/config.toml")).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn oversized_file_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("huge.toml");
        let data = "x = \"".to_owned() + &"a".repeat(1_100_000) + "\"";
        std::fs::write(&path, data).unwrap();

        let result = try_load_file(&path);
        assert!(
            matches!(result, Err(ConfigError::ValidationError { .. })),
            "expected ValidationError, got: {result:?}"
        );
    }

    #[test]
    fn env_overrides_apply() {
        let mut merged: toml::Value = toml::from_str(DEFAULTS_TOML).unwrap();
        let env = HashMap::from([
            ("KILN_MAX_PARALLEL".to_owned(), "8".to_owned()),
            ("KILN_BUILD_ROOT".to_owned(), "/var/kiln".to_owned()),
            ("KILN_UNRELATED".to_owned(), "x".to_owned()),
        ]);
        let applied = apply_env_overrides(&mut merged, &env).unwrap();
        assert_eq!(applied, vec!["KILN_BUILD_ROOT", "KILN_MAX_PARALLEL"]);
        assert_eq!(merged["build"]["max_parallel"].as_integer(), Some(8));
        assert_eq!(merged["build"]["root"].as_str(), Some("/var/kiln"));
    }

    #[test]
    fn non_numeric_parallelism_rejected() {
        let mut merged: toml::Value = toml::from_str(DEFAULTS_TOML).unwrap();
        let env = HashMap::from([("KILN_MAX_PARALLEL".to_owned(), "many".to_owned())]);
        let err = apply_env_overrides(&mut merged, &env).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError { ref field, .. } if field == "KILN_MAX_PARALLEL"));
    }
}
