//! Run Configuration
//!
//! Everything a verification run needs, grouped per component. Core functions take these
//! structs as explicit arguments; only the binaries load them from TOML or the environment.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::columnar::MaterializedLayout;
use crate::dataset::DatasetParams;
use crate::drain::DrainConfig;
use crate::driver::DriverConfig;
use crate::local_warehouse::WarehouseConfig;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory the store materializes into.
    pub root: PathBuf,
    pub key_prefix: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("warehouse_data"),
            key_prefix: "chdb".to_string(),
        }
    }
}

impl StorageConfig {
    pub fn layout(&self) -> MaterializedLayout {
        MaterializedLayout::new(&self.root, &self.key_prefix)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunConfig {
    #[serde(default)]
    pub dataset: DatasetParams,
    #[serde(default)]
    pub driver: DriverConfig,
    #[serde(default)]
    pub drain: DrainConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub warehouse: WarehouseConfig,
}

impl RunConfig {
    /// Load from TOML file
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Load from `VERIFY_CONFIG_PATH` (or `verify_config.toml`), then apply env overrides.
    pub fn from_env() -> Self {
        let path = std::env::var("VERIFY_CONFIG_PATH")
            .unwrap_or_else(|_| "verify_config.toml".to_string());

        let mut config = Self::load(&path).unwrap_or_else(|e| {
            tracing::debug!("Using default run config ({}): {}", path, e);
            Self::default()
        });
        config.apply_env();
        config
    }

    fn apply_env(&mut self) {
        if let Ok(v) = std::env::var("VERIFY_ROWS_PER_BATCH") {
            self.dataset.rows_per_batch = v.parse().unwrap_or(self.dataset.rows_per_batch);
        }
        if let Ok(v) = std::env::var("VERIFY_MAX_KEY_VALUE") {
            self.dataset.max_key_value = v.parse().unwrap_or(self.dataset.max_key_value);
        }
        if let Ok(v) = std::env::var("VERIFY_MAX_ITERATIONS") {
            self.dataset.max_iterations = v.parse().unwrap_or(self.dataset.max_iterations);
        }
        if let Ok(v) = std::env::var("VERIFY_SEED") {
            self.dataset.seed = v.parse().unwrap_or(self.dataset.seed);
        }
        if let Ok(v) = std::env::var("VERIFY_INSERT_INTERVAL_MS") {
            if let Ok(ms) = v.parse() {
                self.driver.interval = Duration::from_millis(ms);
            }
        }
        if let Ok(v) = std::env::var("VERIFY_DRAIN_POLL_MS") {
            if let Ok(ms) = v.parse() {
                self.drain.poll_interval = Duration::from_millis(ms);
            }
        }
        if let Ok(v) = std::env::var("VERIFY_STORAGE_ROOT") {
            self.storage.root = PathBuf::from(v);
        }
    }
}

/// Serde adapter storing a `Duration` as integer milliseconds.
pub(crate) mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let ms = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_toml_round_trip_uses_milliseconds() {
        let config = RunConfig::default();
        let text = toml::to_string(&config).unwrap();
        assert!(text.contains("poll_interval = 1000"));
        let back: RunConfig = toml::from_str(&text).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let text = r#"
            [dataset]
            rows_per_batch = 50
            max_key_value = 1000
            max_iterations = 4
            seed = 9

            [drain]
            queue_name = "tuple-processing"
            poll_interval = 250
            required_consecutive_empty = 5
            settle_delay = 0
        "#;
        let config: RunConfig = toml::from_str(text).unwrap();
        assert_eq!(config.dataset.rows_per_batch, 50);
        assert_eq!(config.drain.poll_interval, Duration::from_millis(250));
        assert!(!config.drain.require_activity);
        assert_eq!(config.driver, DriverConfig::default());
        assert_eq!(config.storage.key_prefix, "chdb");
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("verify.toml");
        std::fs::write(&path, "[storage]\nroot = \"/tmp/wh\"\nkey_prefix = \"x\"\n").unwrap();
        let config = RunConfig::load(&path).unwrap();
        assert_eq!(config.storage.layout().table_dir("t"), PathBuf::from("/tmp/wh/x/table-state/part-data/t"));
    }
}
