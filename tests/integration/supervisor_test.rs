use futures_util::future::{BoxFuture, FutureExt};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use valmon::core::chain_client::{ChainClient, EpochInfo};
use valmon::core::config::GlobalConfig;
use valmon::core::environment::{EnvironmentOptions, EnvironmentRegistry};
use valmon::core::supervisor::{ProcessProbe, ProcessSupervisor, StartOptions};
use valmon::error::{Result, ValmonError};

use super::support::{context_with, fake_validator, FakeClient};

fn config_for(binary: &std::path::Path) -> GlobalConfig {
    let mut config = GlobalConfig::default();
    config.validator.binary = binary.to_string_lossy().into_owned();
    config.validator.stop_timeout_secs = 5;
    config
}

fn start_ci() -> StartOptions {
    StartOptions {
        environment: Some("ci".to_string()),
        ..Default::default()
    }
}

fn create_ci(registry: &EnvironmentRegistry) {
    registry
        .create(
            "ci",
            EnvironmentOptions {
                port: Some(9000),
                ..Default::default()
            },
        )
        .unwrap();
}

#[tokio::test]
async fn test_start_status_stop_lifecycle() {
    let temp_dir = TempDir::new().unwrap();
    let binary = fake_validator(&temp_dir, "validator.sh", "exec sleep 60");
    let ctx = context_with(&temp_dir, config_for(&binary));
    create_ci(&EnvironmentRegistry::new(&ctx));

    let mut sup = ProcessSupervisor::new(ctx.clone(), FakeClient::ready());
    let info = sup.start(start_ci()).await.unwrap();

    assert_eq!(info.environment, "ci");
    assert!(info.rpc_url.ends_with(":9000"));
    assert!(info.ws_url.ends_with(":9001"));

    let status = sup.get_status();
    assert!(status.running);
    assert_eq!(status.pid, Some(info.pid));
    assert_eq!(status.rpc_port, Some(9000));
    assert_eq!(status.environment.as_deref(), Some("ci"));

    let record = sup.records().load().unwrap().unwrap();
    assert_eq!(record.pid, info.pid);

    assert!(sup.stop().await.unwrap());
    assert!(!sup.get_status().running);
    assert!(sup.records().load().unwrap().is_none());
    assert!(!sup.stop().await.unwrap());
}

#[tokio::test]
async fn test_restart_spawns_new_process() {
    let temp_dir = TempDir::new().unwrap();
    let binary = fake_validator(&temp_dir, "validator.sh", "exec sleep 60");
    let ctx = context_with(&temp_dir, config_for(&binary));
    create_ci(&EnvironmentRegistry::new(&ctx));

    let mut sup = ProcessSupervisor::new(ctx, FakeClient::ready());
    let first = sup.start(start_ci()).await.unwrap();
    let second = sup.restart(start_ci()).await.unwrap();

    assert_ne!(first.pid, second.pid);
    assert_eq!(sup.get_status().pid, Some(second.pid));

    sup.stop().await.unwrap();
}

/// Always ready; while a pid is watched, each readiness check records
/// whether that pid was still alive at that moment
#[derive(Default)]
struct LivenessClient {
    watched: Mutex<Option<u32>>,
    alive_at_check: Mutex<Vec<bool>>,
}

impl ChainClient for LivenessClient {
    fn version<'a>(&'a self, _rpc_url: &'a str) -> BoxFuture<'a, Result<String>> {
        async move {
            let watched = *self.watched.lock().unwrap();
            if let Some(pid) = watched {
                let alive = ProcessProbe::new().is_alive(pid);
                self.alive_at_check.lock().unwrap().push(alive);
            }
            Ok("1.18.26".to_string())
        }
        .boxed()
    }
    fn block_height<'a>(&'a self, _rpc_url: &'a str) -> BoxFuture<'a, Result<u64>> {
        async { Ok(0) }.boxed()
    }
    fn slot<'a>(&'a self, _rpc_url: &'a str) -> BoxFuture<'a, Result<u64>> {
        async { Ok(0) }.boxed()
    }
    fn epoch_info<'a>(&'a self, _rpc_url: &'a str) -> BoxFuture<'a, Result<EpochInfo>> {
        async { Ok(EpochInfo::default()) }.boxed()
    }
}

#[tokio::test]
async fn test_start_while_running_replaces_process() {
    let temp_dir = TempDir::new().unwrap();
    let binary = fake_validator(&temp_dir, "validator.sh", "exec sleep 60");
    let ctx = context_with(&temp_dir, config_for(&binary));
    create_ci(&EnvironmentRegistry::new(&ctx));

    let client = Arc::new(LivenessClient::default());
    let mut sup = ProcessSupervisor::new(ctx, client.clone());
    let first = sup.start(start_ci()).await.unwrap();
    assert!(ProcessProbe::new().is_alive(first.pid));

    *client.watched.lock().unwrap() = Some(first.pid);
    let second = sup.start(start_ci()).await.unwrap();

    assert_ne!(first.pid, second.pid);
    let record = sup.records().load().unwrap().unwrap();
    assert_eq!(record.pid, second.pid);
    assert_eq!(sup.get_status().pid, Some(second.pid));

    // The old process was gone before the new one was first checked
    let checks = client.alive_at_check.lock().unwrap().clone();
    assert_eq!(checks.first(), Some(&false), "checks: {:?}", checks);

    sup.stop().await.unwrap();
}

#[tokio::test]
async fn test_readiness_timeout_leaves_process_stoppable() {
    let temp_dir = TempDir::new().unwrap();
    let binary = fake_validator(&temp_dir, "validator.sh", "exec sleep 60");
    let mut config = config_for(&binary);
    config.validator.startup_timeout_secs = 1;
    let ctx = context_with(&temp_dir, config);
    create_ci(&EnvironmentRegistry::new(&ctx));

    let mut sup = ProcessSupervisor::new(ctx, FakeClient::never_ready());
    let err = sup.start(start_ci()).await.unwrap_err();
    assert!(matches!(err, ValmonError::Timeout(_)), "got {:?}", err);

    assert!(sup.is_running());
    assert!(sup.stop().await.unwrap());
    assert!(!sup.is_running());
}

#[tokio::test]
async fn test_early_exit_is_startup_error() {
    let temp_dir = TempDir::new().unwrap();
    let binary = fake_validator(&temp_dir, "validator.sh", "echo 'bad genesis' >&2\nexit 3");
    let mut config = config_for(&binary);
    config.validator.startup_timeout_secs = 10;
    let ctx = context_with(&temp_dir, config);
    create_ci(&EnvironmentRegistry::new(&ctx));

    let mut sup = ProcessSupervisor::new(ctx.clone(), FakeClient::never_ready());
    let err = sup.start(start_ci()).await.unwrap_err();
    assert!(matches!(err, ValmonError::Startup(_)), "got {:?}", err);

    let status = sup.get_status();
    assert!(!status.running);
    assert_eq!(status.last_exit_code, Some(3));
    assert!(sup.records().load().unwrap().is_none());

    let log = std::fs::read_to_string(&ctx.paths.log_file).unwrap();
    assert!(log.contains("bad genesis"));
}

#[tokio::test]
async fn test_second_supervisor_is_refused() {
    let temp_dir = TempDir::new().unwrap();
    let binary = fake_validator(&temp_dir, "validator.sh", "exec sleep 60");
    let ctx = context_with(&temp_dir, config_for(&binary));
    create_ci(&EnvironmentRegistry::new(&ctx));

    let mut owner = ProcessSupervisor::new(ctx.clone(), FakeClient::ready());
    let info = owner.start(start_ci()).await.unwrap();

    let mut other = ProcessSupervisor::new(ctx, FakeClient::ready());
    assert_eq!(other.get_status().pid, Some(info.pid));

    let err = other.start(start_ci()).await.unwrap_err();
    assert!(matches!(err, ValmonError::Conflict(_)), "got {:?}", err);
    assert!(matches!(other.reset(false), Err(ValmonError::Conflict(_))));

    owner.stop().await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!other.is_running());
}
