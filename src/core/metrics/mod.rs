//! Metrics collection: host and validator sampling, day-partitioned
//! history, throughput estimation and threshold alerts.

pub mod alerts;
mod collector;
mod history;
pub mod host;
mod sample;
mod tps;

pub use alerts::{evaluate_alerts, Alert, AlertCategory, AlertSeverity};
pub use collector::{ListenerId, MetricsCollector};
pub use history::HistoryStore;
pub use sample::{
    CpuMetrics, LoadAverage, MemoryMetrics, MetricSample, NetworkMetrics, OperationTiming,
    StorageMetrics, SystemMetrics, ValidatorMetrics,
};
pub use tps::TpsEstimator;
