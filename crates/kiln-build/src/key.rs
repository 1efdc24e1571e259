//! Cache keys.

use std::fmt;

use crate::toolchain::ToolchainInfo;

/// Content digest that decides artifact reuse.
///
/// Two compilations with the same key produce interchangeable artifacts, so
/// the second one is served from the cache.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

/// Everything that feeds a cache key.
#[derive(Debug, Clone, Copy)]
pub struct KeyInputs<'a> {
    /// Toolchain identity.
    pub toolchain: &'a ToolchainInfo,
    /// Highest API level the host accepts.
    pub accepted_api: u32,
    /// API level the manifest declares.
    pub manifest_api: u32,
    /// Exact manifest text.
    pub manifest_text: &'a str,
    /// `(relative path, content)` of every source, in any order.
    pub sources: &'a [(String, Vec<u8>)],
}

impl CacheKey {
    /// Digest `inputs`. Sources are hashed sorted by path so enumeration
    /// order does not matter.
    #[must_use]
    pub fn compute(inputs: &KeyInputs<'_>) -> Self {
        let mut hasher = blake3::Hasher::new();
        field(&mut hasher, "toolchain.name", inputs.toolchain.name.as_bytes());
        field(&mut hasher, "toolchain.version", inputs.toolchain.version.as_bytes());
        field(&mut hasher, "toolchain.target", inputs.toolchain.target.as_bytes());
        field(&mut hasher, "api.accepted", &inputs.accepted_api.to_le_bytes());
        field(&mut hasher, "api.manifest", &inputs.manifest_api.to_le_bytes());
        field(&mut hasher, "manifest", inputs.manifest_text.as_bytes());

        let mut sources: Vec<_> = inputs.sources.iter().collect();
        sources.sort_by(|a, b| a.0.cmp(&b.0));
        for (path, content) in sources {
            field(&mut hasher, "source.path", path.as_bytes());
            field(&mut hasher, "source.content", content);
        }
        Self(hasher.finalize().to_hex().to_string())
    }

    /// Hex form of the digest.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Parse a key from its hex form, e.g. a cache file stem.
    #[must_use]
    pub fn from_hex(hex: &str) -> Option<Self> {
        (hex.len() == 64 && hex.bytes().all(|b| b.is_ascii_hexdigit()))
            .then(|| Self(hex.to_ascii_lowercase()))
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Length-prefixed, labelled field so adjacent values cannot run together.
fn field(hasher: &mut blake3::Hasher, label: &str, value: &[u8]) {
    hasher.update(label.as_bytes());
    hasher.update(&[0]);
    hasher.update(&(value.len() as u64).to_le_bytes());
    hasher.update(value);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(version: &str) -> ToolchainInfo {
        ToolchainInfo {
            name: "ksc".into(),
            version: version.into(),
            target: "wasm32-wasip1".into(),
        }
    }

    fn key(
        toolchain: &ToolchainInfo,
        accepted_api: u32,
        manifest: &str,
        sources: &[(String, Vec<u8>)],
    ) -> CacheKey {
        CacheKey::compute(&KeyInputs {
            toolchain,
            accepted_api,
            manifest_api: 1,
            manifest_text: manifest,
            sources,
        })
    }

    fn sources() -> Vec<(String, Vec<u8>)> {
        vec![
            ("src/main.ks".into(), b"module {}".to_vec()),
            ("src/util.ks".into(), b"val x = 1".to_vec()),
        ]
    }

    #[test]
    fn same_inputs_same_key() {
        let tc = info("1.0");
        let a = key(&tc, 1, "id = \"m\"", &sources());
        let mut reversed = sources();
        reversed.reverse();
        let b = key(&tc, 1, "id = \"m\"", &reversed);
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), 64);
    }

    #[test]
    fn every_input_changes_the_key() {
        let tc = info("1.0");
        let base = key(&tc, 1, "id = \"m\"", &sources());

        let mut edited = sources();
        edited[1].1[8] = b'2';
        assert_ne!(base, key(&tc, 1, "id = \"m\"", &edited));

        let mut renamed = sources();
        renamed[1].0 = "src/util2.ks".into();
        assert_ne!(base, key(&tc, 1, "id = \"m\"", &renamed));

        assert_ne!(base, key(&tc, 1, "id = \"m\" ", &sources()));
        assert_ne!(base, key(&info("1.1"), 1, "id = \"m\"", &sources()));
        assert_ne!(base, key(&tc, 2, "id = \"m\"", &sources()));
    }

    #[test]
    fn field_boundaries_matter() {
        let tc = info("1.0");
        let a = key(&tc, 1, "", &[("ab".into(), b"c".to_vec())]);
        let b = key(&tc, 1, "", &[("a".into(), b"bc".to_vec())]);
        assert_ne!(a, b);
    }

    #[test]
    fn from_hex_validates() {
        let tc = info("1.0");
        let k = key(&tc, 1, "", &[]);
        assert_eq!(CacheKey::from_hex(k.as_str()), Some(k));
        assert!(CacheKey::from_hex("xyz").is_none());
    }
}
