//! Post-merge configuration validation.

use crate::error::{ConfigError, ConfigResult};
use crate::types::Config;

/// Upper bound for `build.max_parallel`.
const MAX_PARALLEL_UPPER_BOUND: usize = 256;

/// WebAssembly's 4 GiB limit in 64 KiB pages.
const MAX_MEMORY_PAGES: u32 = 65_536;

/// Validate a merged and deserialized configuration.
///
/// # Errors
///
/// Returns the first validation error found.
pub fn validate(config: &Config) -> ConfigResult<()> {
    validate_workspaces(config)?;
    validate_build(config)?;
    validate_isolation(config)?;
    validate_logging(config)?;
    Ok(())
}

fn invalid(field: &str, message: impl Into<String>) -> ConfigError {
    ConfigError::ValidationError {
        field: field.to_owned(),
        message: message.into(),
    }
}

fn validate_workspaces(config: &Config) -> ConfigResult<()> {
    if config.workspaces.root.as_os_str().is_empty() {
        return Err(invalid("workspaces.root", "must not be empty"));
    }
    Ok(())
}

fn validate_build(config: &Config) -> ConfigResult<()> {
    let b = &config.build;
    if b.root.as_ref().is_some_and(|r| r.as_os_str().is_empty()) {
        return Err(invalid("build.root", "must not be empty when set"));
    }
    if b.max_parallel == 0 || b.max_parallel > MAX_PARALLEL_UPPER_BOUND {
        return Err(invalid(
            "build.max_parallel",
            format!("must be between 1 and {MAX_PARALLEL_UPPER_BOUND}"),
        ));
    }
    for (field, value) in [
        ("build.toolchain.program", &b.toolchain.program),
        ("build.toolchain.name", &b.toolchain.name),
        ("build.toolchain.version", &b.toolchain.version),
        ("build.toolchain.target", &b.toolchain.target),
    ] {
        if value.trim().is_empty() {
            return Err(invalid(field, "must not be empty"));
        }
    }
    if !b.toolchain.args.iter().any(|a| a.contains("{out}")) {
        return Err(invalid(
            "build.toolchain.args",
            "must contain the {out} placeholder",
        ));
    }
    Ok(())
}

fn validate_isolation(config: &Config) -> ConfigResult<()> {
    let iso = &config.isolation;
    if !iso.own_namespace_prefix.ends_with('/') || iso.own_namespace_prefix.len() < 2 {
        return Err(invalid(
            "isolation.own_namespace_prefix",
            format!(
                "'{}' must be a non-empty prefix ending in '/'",
                iso.own_namespace_prefix
            ),
        ));
    }
    if let Some(denied) = iso
        .denied_prefixes
        .iter()
        .find(|p| iso.own_namespace_prefix.starts_with(p.as_str()) && !p.is_empty())
    {
        return Err(invalid(
            "isolation.denied_prefixes",
            format!("'{denied}' would deny every module's own namespace"),
        ));
    }
    if iso.memory_max_pages == 0 || iso.memory_max_pages > MAX_MEMORY_PAGES {
        return Err(invalid(
            "isolation.memory_max_pages",
            format!("must be between 1 and {MAX_MEMORY_PAGES}"),
        ));
    }
    if iso.call_timeout_ms == 0 {
        return Err(invalid("isolation.call_timeout_ms", "must be greater than zero"));
    }
    Ok(())
}

fn validate_logging(config: &Config) -> ConfigResult<()> {
    let valid_levels = ["trace", "debug", "info", "warn", "error"];
    if !valid_levels.contains(&config.logging.level.as_str()) {
        return Err(invalid(
            "logging.level",
            format!(
                "unsupported log level '{}'; expected one of: {}",
                config.logging.level,
                valid_levels.join(", ")
            ),
        ));
    }

    let valid_formats = ["pretty", "compact", "json", "full"];
    if !valid_formats.contains(&config.logging.format.as_str()) {
        return Err(invalid(
            "logging.format",
            format!(
                "unsupported log format '{}'; expected one of: {}",
                config.logging.format,
                valid_formats.join(", ")
            ),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field_of(result: ConfigResult<()>) -> String {
        match result {
            Err(ConfigError::ValidationError { field, .. }) => field,
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn defaults_are_valid() {
        assert!(validate(&Config::default()).is_ok());
    }

    #[test]
    fn zero_parallelism_rejected() {
        let mut config = Config::default();
        config.build.max_parallel = 0;
        assert_eq!(field_of(validate(&config)), "build.max_parallel");
    }

    #[test]
    fn toolchain_needs_output_placeholder() {
        let mut config = Config::default();
        config.build.toolchain.args = vec!["{sources}".to_owned()];
        assert_eq!(field_of(validate(&config)), "build.toolchain.args");
    }

    #[test]
    fn namespace_prefix_must_end_with_slash() {
        let mut config = Config::default();
        config.isolation.own_namespace_prefix = "kiln:module".to_owned();
        assert_eq!(field_of(validate(&config)), "isolation.own_namespace_prefix");
    }

    #[test]
    fn denying_own_namespace_rejected() {
        let mut config = Config::default();
        config.isolation.denied_prefixes.push("kiln:".to_owned());
        assert_eq!(field_of(validate(&config)), "isolation.denied_prefixes");
    }

    #[test]
    fn unknown_log_format_rejected() {
        let mut config = Config::default();
        config.logging.format = "xml".to_owned();
        assert_eq!(field_of(validate(&config)), "logging.format");
    }
}
