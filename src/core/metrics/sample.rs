use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::core::chain_client::EpochInfo;

/// One point-in-time observation of the host and the validator.
///
/// Each family is filled independently; a family whose source failed is left
/// at its zeroed default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricSample {
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub system: SystemMetrics,
    #[serde(default)]
    pub validator: ValidatorMetrics,
    #[serde(default)]
    pub network: NetworkMetrics,
    #[serde(default)]
    pub storage: StorageMetrics,
    /// Timings of control operations finished since the previous sample
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub operations: BTreeMap<String, OperationTiming>,
}

impl MetricSample {
    /// A sample with every family zeroed
    pub fn empty(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            system: SystemMetrics::default(),
            validator: ValidatorMetrics::default(),
            network: NetworkMetrics::default(),
            storage: StorageMetrics::default(),
            operations: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SystemMetrics {
    pub cpu: CpuMetrics,
    pub memory: MemoryMetrics,
    pub load: LoadAverage,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CpuMetrics {
    /// Busy share across all cores
    pub usage_percent: f32,
    pub core_count: usize,
}

/// Sizes in MiB
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MemoryMetrics {
    pub total_mb: f64,
    pub used_mb: f64,
    pub available_mb: f64,
    pub usage_percent: f32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadAverage {
    pub one: f64,
    pub five: f64,
    pub fifteen: f64,
}

/// The zeroed default doubles as the "not running" shape
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ValidatorMetrics {
    pub running: bool,
    pub pid: Option<u32>,
    pub cpu_percent: f32,
    pub memory_mb: f64,
    pub uptime_secs: u64,
    /// Estimated from slot progression
    pub tps: f64,
    pub block_height: u64,
    pub slot_height: u64,
    pub epoch_info: Option<EpochInfo>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NetworkMetrics {
    pub interface: String,
    pub rx_bytes_total: u64,
    pub tx_bytes_total: u64,
    pub rx_bytes_per_sec: u64,
    pub tx_bytes_per_sec: u64,
    pub link_speed_mbps: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StorageMetrics {
    /// Filesystem holding the ledger
    pub mount_point: String,
    pub total_bytes: u64,
    pub available_bytes: u64,
    pub used_bytes: u64,
    pub usage_percent: f32,
    pub ledger_bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationTiming {
    pub duration_ms: f64,
    pub success: bool,
    pub finished_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operations_omitted_when_empty() {
        let sample = MetricSample::empty(Utc::now());
        let json = serde_json::to_value(&sample).unwrap();

        assert!(json.get("operations").is_none());
        assert_eq!(json["validator"]["running"], false);
        assert_eq!(json["validator"]["blockHeight"], 0);
    }

    #[test]
    fn test_partial_line_fills_defaults() {
        let line = r#"{"timestamp":"2025-01-01T00:00:00Z","system":{"cpu":{"usagePercent":12.5}}}"#;
        let sample: MetricSample = serde_json::from_str(line).unwrap();

        assert_eq!(sample.system.cpu.usage_percent, 12.5);
        assert_eq!(sample.storage, StorageMetrics::default());
        assert!(sample.operations.is_empty());
    }
}
