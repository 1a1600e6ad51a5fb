//! Job storage configuration.

use serde::{Deserialize, Serialize};

/// Top-level job storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Storage provider type: `"memory"` or `"json"`.
    #[serde(default = "default_provider")]
    pub provider: String,
    /// Flat-file JSON provider configuration.
    #[serde(default)]
    pub json: JsonStorageConfig,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            json: JsonStorageConfig::default(),
        }
    }
}

/// Flat-file JSON provider configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonStorageConfig {
    /// Directory holding one `<id>.json` file per job.
    #[serde(default = "default_json_path")]
    pub path: String,
}

impl Default for JsonStorageConfig {
    fn default() -> Self {
        Self {
            path: default_json_path(),
        }
    }
}

fn default_provider() -> String {
    "memory".to_string()
}

fn default_json_path() -> String {
    "data/jobs".to_string()
}
