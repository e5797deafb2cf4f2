use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{FormatError, FormatResult};

/// Decoder limits and strictness switches.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecodeConfig {
    /// Fail on node kinds this decoder does not recognize instead of
    /// keeping their bytes.
    pub strict_node_kinds: bool,
    /// Maximum number of fragments followed for a single file node list.
    pub max_fragments: usize,
    /// Maximum number of revisions followed through base-revision links.
    pub max_revision_chain: usize,
}

impl Default for DecodeConfig {
    fn default() -> Self {
        Self {
            strict_node_kinds: false,
            max_fragments: 4096,
            max_revision_chain: 1024,
        }
    }
}

impl DecodeConfig {
    /// Reject anything this decoder cannot fully interpret.
    pub fn strict() -> Self {
        Self {
            strict_node_kinds: true,
            ..Default::default()
        }
    }

    pub fn from_toml_str(s: &str) -> FormatResult<Self> {
        toml::from_str(s).map_err(|e| FormatError::Config(e.to_string()))
    }

    /// Load a TOML configuration file. Missing keys take their defaults.
    pub fn load(path: &Path) -> FormatResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let c = DecodeConfig::default();
        assert!(!c.strict_node_kinds);
        assert_eq!(c.max_fragments, 4096);
        assert_eq!(c.max_revision_chain, 1024);
        assert!(DecodeConfig::strict().strict_node_kinds);
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let c = DecodeConfig::from_toml_str("max_fragments = 8\n").unwrap();
        assert_eq!(c.max_fragments, 8);
        assert!(!c.strict_node_kinds);
        assert_eq!(c.max_revision_chain, 1024);
    }

    #[test]
    fn invalid_toml_is_config_error() {
        let err = DecodeConfig::from_toml_str("max_fragments = \"many\"").unwrap_err();
        assert!(matches!(err, FormatError::Config(_)));
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("decode.toml");
        std::fs::write(&path, "strict_node_kinds = true\nmax_revision_chain = 3\n").unwrap();
        let c = DecodeConfig::load(&path).unwrap();
        assert!(c.strict_node_kinds);
        assert_eq!(c.max_revision_chain, 3);
    }
}
