//! Threshold alerts evaluated against each collected sample.

use serde::{Deserialize, Serialize};

use super::sample::MetricSample;
use crate::core::config::PerformanceThresholds;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub severity: AlertSeverity,
    pub category: AlertCategory,
    pub message: String,
    pub value: f64,
    pub threshold: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Warning,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertCategory {
    Cpu,
    Memory,
    Disk(String), // Mount point
    Throughput,
}

/// Warning/critical check for a percentage; critical wins
fn check_level(
    alerts: &mut Vec<Alert>,
    category: AlertCategory,
    label: &str,
    value: f32,
    warning: f32,
    critical: f32,
) {
    let (severity, threshold, kind) = if value >= critical {
        (AlertSeverity::Critical, critical, "critical")
    } else if value >= warning {
        (AlertSeverity::Warning, warning, "warning")
    } else {
        return;
    };

    alerts.push(Alert {
        severity,
        category,
        message: format!(
            "{} at {:.1}% ({} threshold: {:.1}%)",
            label, value, kind, threshold
        ),
        value: f64::from(value),
        threshold: f64::from(threshold),
    });
}

pub fn evaluate_alerts(sample: &MetricSample, thresholds: &PerformanceThresholds) -> Vec<Alert> {
    let mut alerts = Vec::new();

    check_level(
        &mut alerts,
        AlertCategory::Cpu,
        "CPU usage",
        sample.system.cpu.usage_percent,
        thresholds.cpu_warning,
        thresholds.cpu_critical,
    );

    check_level(
        &mut alerts,
        AlertCategory::Memory,
        "Memory usage",
        sample.system.memory.usage_percent,
        thresholds.memory_warning,
        thresholds.memory_critical,
    );

    let storage = &sample.storage;
    if storage.total_bytes > 0 {
        check_level(
            &mut alerts,
            AlertCategory::Disk(storage.mount_point.clone()),
            &format!("Disk {}", storage.mount_point),
            storage.usage_percent,
            thresholds.disk_warning,
            thresholds.disk_critical,
        );
    }

    // Only once the chain is producing blocks; the first reading is always 0
    let validator = &sample.validator;
    if let Some(min_tps) = thresholds.min_tps {
        if validator.running && validator.block_height > 0 && validator.tps < min_tps {
            alerts.push(Alert {
                severity: AlertSeverity::Warning,
                category: AlertCategory::Throughput,
                message: format!(
                    "Estimated TPS at {:.0} (minimum: {:.0})",
                    validator.tps, min_tps
                ),
                value: validator.tps,
                threshold: min_tps,
            });
        }
    }

    alerts
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn sample() -> MetricSample {
        MetricSample::empty(Utc::now())
    }

    #[test]
    fn test_cpu_alert() {
        let mut metrics = sample();
        metrics.system.cpu.usage_percent = 91.0;

        let alerts = evaluate_alerts(&metrics, &PerformanceThresholds::default());
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].severity, AlertSeverity::Critical);
        assert_eq!(alerts[0].category, AlertCategory::Cpu);
    }

    #[test]
    fn test_memory_alert() {
        let mut metrics = sample();
        metrics.system.memory.usage_percent = 81.0;

        let alerts = evaluate_alerts(&metrics, &PerformanceThresholds::default());
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].severity, AlertSeverity::Warning);
    }

    #[test]
    fn test_disk_alert_names_mount() {
        let mut metrics = sample();
        metrics.storage.mount_point = "/data".to_string();
        metrics.storage.total_bytes = 100;
        metrics.storage.usage_percent = 96.0;

        let alerts = evaluate_alerts(&metrics, &PerformanceThresholds::default());
        assert_eq!(alerts[0].category, AlertCategory::Disk("/data".to_string()));
        assert!(alerts[0].message.starts_with("Disk /data at 96.0%"));
    }

    #[test]
    fn test_min_tps_only_while_producing() {
        let thresholds = PerformanceThresholds {
            min_tps: Some(100.0),
            ..Default::default()
        };
        let mut metrics = sample();
        assert!(evaluate_alerts(&metrics, &thresholds).is_empty());

        metrics.validator.running = true;
        metrics.validator.block_height = 40;
        metrics.validator.tps = 12.0;
        let alerts = evaluate_alerts(&metrics, &thresholds);
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].category, AlertCategory::Throughput);
    }

    #[test]
    fn test_no_alerts() {
        let alerts = evaluate_alerts(&sample(), &PerformanceThresholds::default());
        assert!(alerts.is_empty());
    }

    #[test]
    fn test_serialized_shape() {
        let mut metrics = sample();
        metrics.system.cpu.usage_percent = 80.0;
        let alert = &evaluate_alerts(&metrics, &PerformanceThresholds::default())[0];

        let json = serde_json::to_value(alert).unwrap();
        assert_eq!(json["severity"], "warning");
        assert_eq!(json["category"], "cpu");
    }
}
