//! Layered loading against real files.

use std::collections::HashMap;
use std::path::PathBuf;

use kiln_config::{ConfigError, loader};
use tempfile::TempDir;

fn write(dir: &TempDir, name: &str, text: &str) -> PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, text).unwrap();
    path
}

#[test]
fn defaults_only() {
    let resolved = loader::load(None, None, &HashMap::new()).unwrap();
    assert!(resolved.loaded_files.is_empty());
    assert_eq!(resolved.config.build.max_parallel, 4);
    assert_eq!(resolved.config.build_root(), PathBuf::from("modules/_build"));
    assert_eq!(resolved.config.isolation.own_namespace_prefix, "kiln:module/");
}

#[test]
fn explicit_file_overrides_user_file() {
    let user = TempDir::new().unwrap();
    write(
        &user,
        "config.toml",
        "[build]\nmax_parallel = 2\n[logging]\nlevel = \"debug\"\n",
    );
    let other = TempDir::new().unwrap();
    let explicit = write(&other, "kiln.toml", "[build]\nmax_parallel = 6\n");

    let resolved = loader::load(Some(user.path()), Some(&explicit), &HashMap::new()).unwrap();

    assert_eq!(resolved.loaded_files.len(), 2);
    assert_eq!(resolved.config.build.max_parallel, 6);
    assert_eq!(resolved.config.logging.level, "debug");
    assert_eq!(resolved.config.build.toolchain.program, "kilnc");
}

#[test]
fn environment_wins_over_files() {
    let dir = TempDir::new().unwrap();
    let explicit = write(&dir, "kiln.toml", "[workspaces]\nroot = \"/srv/modules\"\n");
    let env = HashMap::from([
        ("KILN_WORKSPACES".to_owned(), "/opt/modules".to_owned()),
        ("KILN_LOG_LEVEL".to_owned(), "warn".to_owned()),
    ]);

    let resolved = loader::load(None, Some(&explicit), &env).unwrap();

    assert_eq!(resolved.config.workspaces.root, PathBuf::from("/opt/modules"));
    assert_eq!(resolved.config.logging.level, "warn");
    assert_eq!(resolved.env_overrides.len(), 2);
}

#[test]
fn missing_explicit_file_is_an_error() {
    let dir = TempDir::new().unwrap();
    let result = loader::load(None, Some(&dir.path().join("absent.toml")), &HashMap::new());
    assert!(matches!(result, Err(ConfigError::ReadError { .. })));
}

#[test]
fn malformed_file_reports_path() {
    let dir = TempDir::new().unwrap();
    let explicit = write(&dir, "bad.toml", "[build\n");
    let err = loader::load(None, Some(&explicit), &HashMap::new()).unwrap_err();
    assert!(matches!(err, ConfigError::ParseError { ref path, .. } if path.ends_with("bad.toml")));
}

#[test]
fn invalid_merged_value_fails_validation() {
    let dir = TempDir::new().unwrap();
    let explicit = write(&dir, "kiln.toml", "[isolation]\nmemory_max_pages = 0\n");
    let err = loader::load(None, Some(&explicit), &HashMap::new()).unwrap_err();
    assert!(matches!(
        err,
        ConfigError::ValidationError { ref field, .. } if field == "isolation.memory_max_pages"
    ));
}
