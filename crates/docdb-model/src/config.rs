use docdb_data::DataConfig;
use serde::{Deserialize, Serialize};

use crate::error::{ModelError, ModelResult};

/// Configuration for a [`ModelDb`](crate::ModelDb).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Maximum number of decoded models kept in the identity cache.
    /// Zero disables caching.
    pub cache_capacity: usize,
    /// Settings passed down to the data engine.
    pub data: DataConfig,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            cache_capacity: 1024,
            data: DataConfig::default(),
        }
    }
}

impl ModelConfig {
    /// A configuration with the identity cache turned off.
    pub fn uncached() -> Self {
        Self {
            cache_capacity: 0,
            ..Default::default()
        }
    }

    /// Parse a configuration from TOML. Missing keys take their defaults.
    pub fn from_toml_str(source: &str) -> ModelResult<Self> {
        toml::from_str(source).map_err(|e| ModelError::Config(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let c = ModelConfig::default();
        assert_eq!(c.cache_capacity, 1024);
        assert!(!c.data.sync_writes);
        assert_eq!(ModelConfig::uncached().cache_capacity, 0);
    }

    #[test]
    fn nested_toml() {
        let c = ModelConfig::from_toml_str(
            r#"
            cache_capacity = 16

            [data]
            sync_writes = true
            "#,
        )
        .unwrap();
        assert_eq!(c.cache_capacity, 16);
        assert!(c.data.sync_writes);
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let c = ModelConfig::from_toml_str("[data]\nsync_writes = true").unwrap();
        assert_eq!(c.cache_capacity, 1024);
    }
}
