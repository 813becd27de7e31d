use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Result, ValmonError};

/// Global configuration, stored as `config.json` under the config root
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GlobalConfig {
    pub validator: ValidatorDefaults,
    pub monitoring: MonitoringDefaults,
    pub automation: AutomationHooks,
    pub performance: PerformanceThresholds,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ValidatorDefaults {
    /// Validator executable, resolved on PATH
    pub binary: String,
    /// Command-line client used for readiness and chain queries
    pub client_binary: String,
    pub rpc_port: u16,
    pub bind_address: String,
    /// Relative paths are resolved against the config root
    pub ledger_dir: PathBuf,
    pub accounts_dir: PathBuf,
    pub limit_ledger_size: u64,
    /// Cluster that `cloneAccounts` are fetched from
    pub clone_url: String,
    pub startup_timeout_secs: u64,
    pub stop_timeout_secs: u64,
}

impl Default for ValidatorDefaults {
    fn default() -> Self {
        Self {
            binary: "solana-test-validator".to_string(),
            client_binary: "solana".to_string(),
            rpc_port: 8899,
            bind_address: "127.0.0.1".to_string(),
            ledger_dir: PathBuf::from("ledger"),
            accounts_dir: PathBuf::from("accounts"),
            limit_ledger_size: 50_000_000,
            clone_url: "https://api.mainnet-beta.solana.com".to_string(),
            startup_timeout_secs: 30,
            stop_timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MonitoringDefaults {
    pub interval_ms: u64,
    pub port: u16,
    pub retention_days: u32,
    pub query_timeout_secs: u64,
    pub assumed_tx_per_slot: f64,
    /// Interface to report; the busiest non-loopback interface when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub network_interface: Option<String>,
    pub log_max_size_mb: u64,
    pub log_max_files: usize,
}

impl Default for MonitoringDefaults {
    fn default() -> Self {
        Self {
            interval_ms: 1000,
            port: 3001,
            retention_days: 7,
            query_timeout_secs: 5,
            assumed_tx_per_slot: 64.0,
            network_interface: None,
            log_max_size_mb: 10,
            log_max_files: 5,
        }
    }
}

/// Shell commands run around supervisor operations
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AutomationHooks {
    pub pre_start: Vec<String>,
    pub post_start: Vec<String>,
    pub pre_stop: Vec<String>,
    pub post_stop: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PerformanceThresholds {
    pub cpu_warning: f32,
    pub cpu_critical: f32,
    pub memory_warning: f32,
    pub memory_critical: f32,
    pub disk_warning: f32,
    pub disk_critical: f32,
    /// Alert when a running validator drops below this estimate
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_tps: Option<f64>,
}

impl Default for PerformanceThresholds {
    fn default() -> Self {
        Self {
            cpu_warning: 75.0,
            cpu_critical: 90.0,
            memory_warning: 80.0,
            memory_critical: 95.0,
            disk_warning: 85.0,
            disk_critical: 95.0,
            min_tps: None,
        }
    }
}

/// Loads and saves the global configuration file
#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the config, writing the defaults first if the file does not exist.
    ///
    /// Stored values are deep-merged over the defaults, so a file written by an
    /// older version picks up newly added keys.
    pub fn load_or_create(&self) -> Result<GlobalConfig> {
        if !self.path.exists() {
            let config = GlobalConfig::default();
            self.save(&config)?;
            log::info!("Created default config at {}", self.path.display());
            return Ok(config);
        }

        let data =
            fs::read_to_string(&self.path).map_err(|e| ValmonError::io_at(&self.path, e))?;

        if data.trim().is_empty() {
            return Ok(GlobalConfig::default());
        }

        let stored: Value = serde_json::from_str(&data).map_err(|e| {
            ValmonError::config(format!("{} is not valid JSON: {}", self.path.display(), e))
        })?;

        let mut merged = serde_json::to_value(GlobalConfig::default())?;
        merge_values(&mut merged, stored);

        serde_json::from_value(merged).map_err(|e| {
            ValmonError::config(format!("Invalid config in {}: {}", self.path.display(), e))
        })
    }

    pub fn save(&self, config: &GlobalConfig) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| ValmonError::io_at(parent, e))?;
        }

        let data = serde_json::to_string_pretty(config)?;
        fs::write(&self.path, data).map_err(|e| ValmonError::io_at(&self.path, e))?;

        Ok(())
    }
}

/// Recursively merge `overlay` into `base`. Objects merge key by key, any other
/// value in the overlay replaces the base value.
pub fn merge_values(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(&key) {
                    Some(existing) => merge_values(existing, value),
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_load_creates_default_file() {
        let temp_dir = TempDir::new().unwrap();
        let store = ConfigStore::new(temp_dir.path().join("config.json"));

        let config = store.load_or_create().unwrap();

        assert_eq!(config, GlobalConfig::default());
        assert!(store.path().exists());
    }

    #[test]
    fn test_partial_file_is_deep_merged() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.json");
        fs::write(
            &path,
            r#"{"validator": {"rpcPort": 9100}, "monitoring": {"retentionDays": 30}}"#,
        )
        .unwrap();

        let config = ConfigStore::new(&path).load_or_create().unwrap();

        assert_eq!(config.validator.rpc_port, 9100);
        assert_eq!(config.validator.binary, "solana-test-validator");
        assert_eq!(config.monitoring.retention_days, 30);
        assert_eq!(config.monitoring.interval_ms, 1000);
    }

    #[test]
    fn test_invalid_json_is_config_error() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.json");
        fs::write(&path, "{ not json").unwrap();

        let err = ConfigStore::new(&path).load_or_create().unwrap_err();
        assert!(matches!(err, ValmonError::Config(_)));
    }

    #[test]
    fn test_merge_values_replaces_arrays() {
        let mut base = json!({"a": {"b": 1, "c": [1, 2]}, "d": true});
        merge_values(&mut base, json!({"a": {"c": [3]}, "e": "x"}));

        assert_eq!(base, json!({"a": {"b": 1, "c": [3]}, "d": true, "e": "x"}));
    }
}
