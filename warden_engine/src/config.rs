//! Engine configuration.

use serde::{Deserialize, Serialize};

/// Tunables for the engine, loadable from TOML.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EngineConfig {
    /// The group users fall back to when they have no membership at all.
    #[serde(default = "default_group")]
    pub default_group: String,
}

fn default_group() -> String {
    "default".to_string()
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_group: default_group(),
        }
    }
}

impl EngineConfig {
    /// Parse a configuration from a TOML document.
    pub fn from_toml_str(raw: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str(raw)
    }
}
