use chrono::{Days, Utc};
use std::fs;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use valmon::core::config::GlobalConfig;
use valmon::core::metrics::{
    evaluate_alerts, AlertCategory, AlertSeverity, HistoryStore, MetricsCollector,
};
use valmon::core::supervisor::{ProcessRecord, ProcessRecordStore};
use valmon::error::ValmonError;

use super::support::{context, context_with, FakeClient};

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_periodic_collection_persists_and_notifies() {
    let temp_dir = TempDir::new().unwrap();
    let ctx = context(&temp_dir);
    ProcessRecordStore::new(&ctx.paths.process_file)
        .save(&ProcessRecord {
            pid: std::process::id(),
            environment: "ci".to_string(),
            start_time: Utc::now(),
            rpc_port: 9000,
        })
        .unwrap();

    let collector = MetricsCollector::new(ctx.clone(), FakeClient::ready());
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    collector.add_listener(move |sample| {
        sink.lock().unwrap().push(sample.timestamp);
        Ok(())
    });

    assert!(collector.start_collection(Duration::from_millis(200)).unwrap());
    tokio::time::sleep(Duration::from_millis(1_100)).await;
    assert!(collector.stop_collection());
    tokio::time::sleep(Duration::from_millis(300)).await;

    let timestamps = seen.lock().unwrap().clone();
    assert!(timestamps.len() >= 2, "only {} samples", timestamps.len());
    assert!(timestamps.windows(2).all(|w| w[0] <= w[1]));

    let today = Utc::now().date_naive();
    let yesterday = today.checked_sub_days(Days::new(1)).unwrap();
    let stored = collector.get_historical_metrics(yesterday, today).unwrap();
    assert_eq!(stored.len(), timestamps.len());

    let latest = collector.latest().unwrap();
    assert!(latest.validator.running);
    assert_eq!(latest.validator.pid, Some(std::process::id()));
    assert!(latest.validator.slot_height > 0);
    assert!(latest.validator.epoch_info.is_some());
    assert_eq!(stored.last(), Some(&latest));
}

#[tokio::test]
async fn test_unreachable_validator_reports_zeroed_chain_fields() {
    let temp_dir = TempDir::new().unwrap();
    let ctx = context(&temp_dir);
    ProcessRecordStore::new(&ctx.paths.process_file)
        .save(&ProcessRecord {
            pid: std::process::id(),
            environment: "ci".to_string(),
            start_time: Utc::now(),
            rpc_port: 9000,
        })
        .unwrap();

    let collector = MetricsCollector::new(ctx, FakeClient::never_ready());
    let sample = collector.collect().await.unwrap();

    assert!(sample.validator.running);
    assert_eq!(sample.validator.slot_height, 0);
    assert_eq!(sample.validator.block_height, 0);
    assert_eq!(sample.validator.tps, 0.0);
    assert!(sample.validator.epoch_info.is_none());
    assert!(sample.system.cpu.core_count > 0);
}

#[test]
fn test_cleanup_keeps_recent_days() {
    let temp_dir = TempDir::new().unwrap();
    let store = HistoryStore::new(temp_dir.path().join("metrics"));
    fs::create_dir_all(store.dir()).unwrap();

    let today = Utc::now().date_naive();
    let recent = store.file_for(today.checked_sub_days(Days::new(2)).unwrap());
    let old = store.file_for(today.checked_sub_days(Days::new(30)).unwrap());
    fs::write(&recent, "").unwrap();
    fs::write(&old, "").unwrap();
    fs::write(store.dir().join("notes.txt"), "keep").unwrap();

    let removed = store.cleanup(7).unwrap();
    assert_eq!(removed, vec![old.clone()]);
    assert!(recent.exists());
    assert!(!old.exists());
    assert!(store.dir().join("notes.txt").exists());
}

#[test]
fn test_inverted_history_range_is_rejected() {
    let temp_dir = TempDir::new().unwrap();
    let store = HistoryStore::new(temp_dir.path());
    let today = Utc::now().date_naive();
    let tomorrow = today.checked_add_days(Days::new(1)).unwrap();

    let err = store.read_range(tomorrow, today).unwrap_err();
    assert!(matches!(err, ValmonError::InvalidInput(_)));
}

#[tokio::test]
async fn test_thresholds_drive_alerts() {
    let temp_dir = TempDir::new().unwrap();
    let mut config = GlobalConfig::default();
    config.performance.cpu_warning = 0.0;
    config.performance.cpu_critical = 1000.0;
    let ctx = context_with(&temp_dir, config);

    let collector = MetricsCollector::new(ctx.clone(), FakeClient::ready());
    let sample = collector.collect().await.unwrap();

    let alerts = evaluate_alerts(&sample, &ctx.config.performance);
    let cpu = alerts
        .iter()
        .find(|a| a.category == AlertCategory::Cpu)
        .expect("cpu alert");
    assert_eq!(cpu.severity, AlertSeverity::Warning);
}
