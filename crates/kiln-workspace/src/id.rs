//! Module identifiers.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{ManifestError, WorkspaceResult};

/// Unique, stable module identifier taken from the manifest `id` field.
///
/// Any non-blank text is a valid id. Where an id becomes a directory name
/// or a package name, use [`path_segment`](Self::path_segment) or
/// [`package_part`](Self::package_part).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ModuleId(String);

impl<'de> Deserialize<'de> for ModuleId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::new(s).map_err(serde::de::Error::custom)
    }
}

impl ModuleId {
    /// Create a new `ModuleId`, validating the format. Surrounding
    /// whitespace is trimmed first.
    ///
    /// # Errors
    ///
    /// Returns [`ManifestError::InvalidId`] if the id is blank.
    pub fn new(id: impl Into<String>) -> WorkspaceResult<Self> {
        let id = id.into();
        let trimmed = id.trim();
        Self::validate(trimmed)?;
        Ok(Self(trimmed.to_string()))
    }

    /// Create a `ModuleId` without validation (for tests and internal use).
    #[must_use]
    pub fn from_static(id: &str) -> Self {
        Self(id.to_string())
    }

    /// Get the inner string value.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The id as a single directory name: characters outside
    /// `[A-Za-z0-9_.-]` become `_`, and an all-dot result is replaced so
    /// it never names the current or parent directory.
    #[must_use]
    pub fn path_segment(&self) -> String {
        let s: String = self
            .0
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-') {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        if s.chars().all(|c| c == '.') {
            s.replace('.', "_")
        } else {
            s
        }
    }

    /// The id as one segment of a generated package name: characters
    /// outside `[A-Za-z0-9_]` become `_`, and a leading digit gets an `m_`
    /// prefix.
    #[must_use]
    pub fn package_part(&self) -> String {
        let s: String = self
            .0
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
            .collect();
        if s.starts_with(|c: char| c.is_ascii_digit()) {
            format!("m_{s}")
        } else {
            s
        }
    }

    fn validate(id: &str) -> WorkspaceResult<()> {
        if id.is_empty() {
            return Err(ManifestError::InvalidId("module id must not be blank".into()));
        }
        Ok(())
    }
}

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ModuleId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_simple_ids() {
        assert_eq!(ModuleId::new("economy").unwrap().as_str(), "economy");
        assert_eq!(ModuleId::new("chat-filter_2").unwrap().as_str(), "chat-filter_2");
    }

    #[test]
    fn trims_whitespace() {
        assert_eq!(ModuleId::new("  core \n").unwrap().as_str(), "core");
    }

    #[test]
    fn rejects_blank() {
        assert!(ModuleId::new("").is_err());
        assert!(ModuleId::new("   ").is_err());
    }

    #[test]
    fn accepts_mixed_case_and_punctuation() {
        assert_eq!(ModuleId::new("Shop").unwrap().as_str(), "Shop");
        assert_eq!(ModuleId::new("my.module").unwrap().as_str(), "my.module");
        assert_eq!(ModuleId::new("Focus Tools").unwrap().as_str(), "Focus Tools");
    }

    #[test]
    fn path_segment_stays_inside_one_directory() {
        assert_eq!(ModuleId::from_static("Shop").path_segment(), "Shop");
        assert_eq!(ModuleId::from_static("my.module").path_segment(), "my.module");
        assert_eq!(ModuleId::from_static("Focus Tools").path_segment(), "Focus_Tools");
        assert_eq!(ModuleId::from_static("../x").path_segment(), ".._x");
        assert_eq!(ModuleId::from_static("a/b\\c").path_segment(), "a_b_c");
        assert_eq!(ModuleId::from_static("..").path_segment(), "__");
        assert_eq!(ModuleId::from_static(".").path_segment(), "_");
    }

    #[test]
    fn package_part_is_identifier_safe() {
        assert_eq!(ModuleId::from_static("Shop").package_part(), "Shop");
        assert_eq!(ModuleId::from_static("my.module").package_part(), "my_module");
        assert_eq!(ModuleId::from_static("chat-filter").package_part(), "chat_filter");
        assert_eq!(ModuleId::from_static("2fa").package_part(), "m_2fa");
    }

    #[test]
    fn deserialize_validates() {
        #[derive(Deserialize)]
        struct Holder {
            id: ModuleId,
        }
        let ok: Holder = toml::from_str(r#"id = "core""#).unwrap();
        assert_eq!(ok.id, ModuleId::from_static("core"));
        assert!(toml::from_str::<Holder>(r#"id = "  ""#).is_err());
    }
}
