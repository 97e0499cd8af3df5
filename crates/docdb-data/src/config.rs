use serde::{Deserialize, Serialize};

use crate::error::{DataError, DataResult};

/// Configuration for a [`DataDb`](crate::DataDb).
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    /// Ask the store to make every write durable before it returns.
    /// Individual writes may override this through
    /// [`WriteOptions::sync`](crate::WriteOptions::sync).
    pub sync_writes: bool,
}

impl DataConfig {
    /// Parse a configuration from TOML. Missing keys take their defaults.
    pub fn from_toml_str(source: &str) -> DataResult<Self> {
        toml::from_str(source).map_err(|e| DataError::Config(e.to_string()))
    }

    pub fn to_toml_string(&self) -> DataResult<String> {
        toml::to_string(self).map_err(|e| DataError::Config(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let c = DataConfig::default();
        assert!(!c.sync_writes);
    }

    #[test]
    fn toml_roundtrip() {
        let c = DataConfig { sync_writes: true };
        let text = c.to_toml_string().unwrap();
        assert_eq!(DataConfig::from_toml_str(&text).unwrap(), c);
    }

    #[test]
    fn empty_toml_uses_defaults() {
        assert_eq!(DataConfig::from_toml_str("").unwrap(), DataConfig::default());
    }

    #[test]
    fn malformed_toml_is_rejected() {
        assert!(matches!(
            DataConfig::from_toml_str("sync_writes = \"yes\""),
            Err(DataError::Config(_))
        ));
    }
}
