use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

use super::hooks::{hook_env, run_hooks};
use super::launcher::{build_args, spawn_validator, ExitInfo};
use super::lock::SupervisorLock;
use super::log_rotation::LogRotationConfig;
use super::probe::ProcessProbe;
use super::record::{ProcessRecord, ProcessRecordStore};
use crate::core::chain_client::ChainClient;
use crate::core::context::Context;
use crate::core::environment::{Environment, EnvironmentRegistry};
use crate::error::{Result, ValmonError};

/// Interval between readiness probes
pub const READINESS_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Extra wait after SIGKILL before giving up on observing the exit
const KILL_GRACE: Duration = Duration::from_secs(2);

/// Liveness poll interval when stopping a process we did not spawn
const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StartOptions {
    /// Falls back to the current environment
    pub environment: Option<String>,
    pub reset: bool,
    /// With `reset`, also wipe the accounts directory
    pub hard_reset: bool,
    /// Keep the monitoring pipeline running alongside the validator
    pub monitor: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartInfo {
    pub pid: u32,
    pub rpc_url: String,
    pub ws_url: String,
    pub environment: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidatorStatus {
    pub running: bool,
    pub pid: Option<u32>,
    pub environment: Option<String>,
    pub rpc_port: Option<u16>,
    pub rpc_url: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub uptime_secs: u64,
    pub cpu_percent: f32,
    pub memory_mb: f64,
    /// Exit code of a child that ended without being stopped
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_exit_code: Option<i32>,
}

/// A validator spawned by this supervisor instance
struct ManagedChild {
    pid: u32,
    environment: Environment,
    start_time: DateTime<Utc>,
    exit_rx: watch::Receiver<Option<ExitInfo>>,
}

impl ManagedChild {
    fn exited(&self) -> Option<ExitInfo> {
        *self.exit_rx.borrow()
    }
}

/// What `stop` is about to terminate
struct StopTarget {
    pid: u32,
    environment: String,
    rpc_port: u16,
    teardown_scripts: Vec<String>,
}

/// Owns at most one validator process.
///
/// Methods take `&mut self`; callers sharing a supervisor must serialize
/// access (the monitoring service keeps it behind an async mutex).
pub struct ProcessSupervisor {
    ctx: Arc<Context>,
    registry: EnvironmentRegistry,
    records: ProcessRecordStore,
    client: Arc<dyn ChainClient>,
    probe: ProcessProbe,
    child: Option<ManagedChild>,
    lock: Option<SupervisorLock>,
    last_exit: Option<ExitInfo>,
}

impl ProcessSupervisor {
    pub fn new(ctx: Arc<Context>, client: Arc<dyn ChainClient>) -> Self {
        Self {
            registry: EnvironmentRegistry::new(&ctx),
            records: ProcessRecordStore::new(&ctx.paths.process_file),
            ctx,
            client,
            probe: ProcessProbe::new(),
            child: None,
            lock: None,
            last_exit: None,
        }
    }

    pub fn records(&self) -> &ProcessRecordStore {
        &self.records
    }

    /// Exit notifications for the child spawned by this instance, if any
    pub fn exit_watch(&self) -> Option<watch::Receiver<Option<ExitInfo>>> {
        self.child.as_ref().map(|child| child.exit_rx.clone())
    }

    /// Start the validator for an environment, stopping any running one first.
    ///
    /// On a readiness timeout the process is left running; the caller decides
    /// whether to stop it.
    pub async fn start(&mut self, opts: StartOptions) -> Result<StartInfo> {
        self.stop_existing().await?;

        let name = opts
            .environment
            .clone()
            .unwrap_or_else(|| self.registry.get_current());
        let env = self.registry.require(&name)?;

        self.acquire_lock()?;

        let started = self.launch(env, &opts).await;
        if started.is_err() && self.child.is_none() {
            self.lock = None;
        }
        started
    }

    /// Everything after the lock is taken. A failure before the child is
    /// recorded leaves nothing for the caller to stop.
    async fn launch(&mut self, env: Environment, opts: &StartOptions) -> Result<StartInfo> {
        if opts.reset {
            self.clear_dirs(opts.hard_reset)?;
        }

        let validator = &self.ctx.config.validator;
        let binary = which::which(&validator.binary).map_err(|e| {
            ValmonError::startup(format!(
                "Validator executable '{}' not found: {}",
                validator.binary, e
            ))
        })?;

        let args = build_args(&self.ctx, &env, opts.reset || env.reset);
        let rpc_url = self.ctx.rpc_url(env.port);
        let hook_vars = hook_env(&env.name, &rpc_url);

        run_hooks("preStart", &self.ctx.config.automation.pre_start, &hook_vars).await;

        fs::create_dir_all(&self.ctx.paths.ledger_dir)
            .map_err(|e| ValmonError::io_at(&self.ctx.paths.ledger_dir, e))?;

        let rotation = LogRotationConfig::from(&self.ctx.config.monitoring);
        let spawned = spawn_validator(&binary, &args, &self.ctx.paths.log_file, &rotation).await?;
        let start_time = Utc::now();

        log::info!(
            "Started validator pid {} for environment '{}' on port {}",
            spawned.pid,
            env.name,
            env.port
        );

        let pid = spawned.pid;
        self.last_exit = None;
        self.child = Some(ManagedChild {
            pid,
            environment: env.clone(),
            start_time,
            exit_rx: spawned.exit_rx,
        });

        // Recorded before readiness so a slow start can still be stopped
        self.records.save(&ProcessRecord {
            pid,
            environment: env.name.clone(),
            start_time,
            rpc_port: env.port,
        })?;

        self.wait_until_ready(&rpc_url).await?;

        run_hooks("setup", &env.setup_scripts, &hook_vars).await;
        run_hooks("postStart", &self.ctx.config.automation.post_start, &hook_vars).await;

        Ok(StartInfo {
            pid,
            rpc_url,
            ws_url: self.ctx.ws_url(env.port),
            environment: env.name,
        })
    }

    /// Stop whatever is running before a new start. An orphan recorded by an
    /// earlier invocation is only taken over if no other supervisor holds the
    /// lock.
    async fn stop_existing(&mut self) -> Result<()> {
        if self.child.is_some() {
            self.stop().await?;
        } else if self.records.load_live().is_some() {
            self.acquire_lock()?;
            self.stop().await?;
        }
        Ok(())
    }

    fn acquire_lock(&mut self) -> Result<()> {
        if self.lock.is_some() {
            return Ok(());
        }

        match SupervisorLock::try_acquire(&self.ctx.paths.lock_file)? {
            Some(lock) => {
                self.lock = Some(lock);
                Ok(())
            }
            None => Err(ValmonError::conflict(
                "Another valmon process is already supervising a validator",
            )),
        }
    }

    async fn wait_until_ready(&mut self, rpc_url: &str) -> Result<()> {
        let timeout = Duration::from_secs(self.ctx.config.validator.startup_timeout_secs);
        let deadline = Instant::now() + timeout;

        loop {
            if let Some(exit) = self.child.as_ref().and_then(ManagedChild::exited) {
                self.child = None;
                self.lock = None;
                self.last_exit = Some(exit);
                self.records.clear()?;
                return Err(ValmonError::startup(format!(
                    "Validator exited during startup ({}); see {}",
                    exit,
                    self.ctx.paths.log_file.display()
                )));
            }

            match self.client.version(rpc_url).await {
                Ok(version) => {
                    log::info!("Validator ready at {} (version {})", rpc_url, version);
                    return Ok(());
                }
                Err(e) => log::debug!("Validator not ready yet: {}", e),
            }

            if Instant::now() + READINESS_POLL_INTERVAL > deadline {
                return Err(ValmonError::timeout(format!(
                    "Validator did not become ready at {} within {}s",
                    rpc_url,
                    timeout.as_secs()
                )));
            }

            tokio::time::sleep(READINESS_POLL_INTERVAL).await;
        }
    }

    fn stop_target(&mut self) -> Option<StopTarget> {
        if let Some(child) = &self.child {
            return Some(StopTarget {
                pid: child.pid,
                environment: child.environment.name.clone(),
                rpc_port: child.environment.port,
                teardown_scripts: child.environment.teardown_scripts.clone(),
            });
        }

        let record = self.records.load_live()?;
        let teardown_scripts = self
            .registry
            .get(&record.environment)
            .ok()
            .flatten()
            .map(|env| env.teardown_scripts)
            .unwrap_or_default();

        Some(StopTarget {
            pid: record.pid,
            environment: record.environment,
            rpc_port: record.rpc_port,
            teardown_scripts,
        })
    }

    /// Terminate gracefully, escalating to a kill after the stop timeout.
    ///
    /// Returns `false` when nothing was running.
    pub async fn stop(&mut self) -> Result<bool> {
        let Some(target) = self.stop_target() else {
            self.records.clear()?;
            self.lock = None;
            return Ok(false);
        };

        let hook_vars = hook_env(&target.environment, &self.ctx.rpc_url(target.rpc_port));
        run_hooks("teardown", &target.teardown_scripts, &hook_vars).await;
        run_hooks("preStop", &self.ctx.config.automation.pre_stop, &hook_vars).await;

        let stop_timeout = Duration::from_secs(self.ctx.config.validator.stop_timeout_secs);

        if !self.has_exited(target.pid) {
            log::info!("Stopping validator pid {}", target.pid);
            self.probe.terminate(target.pid);

            if !self.wait_for_exit(target.pid, stop_timeout).await {
                log::warn!(
                    "Validator pid {} did not exit within {}s, killing it",
                    target.pid,
                    stop_timeout.as_secs()
                );
                self.probe.kill(target.pid);

                if !self.wait_for_exit(target.pid, KILL_GRACE).await {
                    log::error!("Validator pid {} survived SIGKILL", target.pid);
                }
            }
        }

        if let Some(child) = self.child.take() {
            self.last_exit = child.exited();
        }
        self.records.clear()?;
        self.lock = None;

        run_hooks("postStop", &self.ctx.config.automation.post_stop, &hook_vars).await;

        log::info!("Validator for '{}' stopped", target.environment);
        Ok(true)
    }

    fn has_exited(&mut self, pid: u32) -> bool {
        match &self.child {
            Some(child) if child.pid == pid => child.exited().is_some(),
            _ => !self.probe.is_alive(pid),
        }
    }

    async fn wait_for_exit(&mut self, pid: u32, timeout: Duration) -> bool {
        if let Some(child) = self.child.as_ref().filter(|c| c.pid == pid) {
            let mut exit_rx = child.exit_rx.clone();
            return match tokio::time::timeout(timeout, exit_rx.wait_for(Option::is_some)).await {
                Ok(_) => true,
                Err(_) => false,
            };
        }

        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if !self.probe.is_alive(pid) {
                return true;
            }
            tokio::time::sleep(EXIT_POLL_INTERVAL).await;
        }
        !self.probe.is_alive(pid)
    }

    pub async fn restart(&mut self, opts: StartOptions) -> Result<StartInfo> {
        self.stop().await?;
        self.start(opts).await
    }

    /// Wipe the ledger (and accounts when `hard`). Refused while running.
    pub fn reset(&mut self, hard: bool) -> Result<()> {
        if self.is_running() {
            return Err(ValmonError::conflict(
                "Cannot reset while the validator is running; stop it first",
            ));
        }
        self.clear_dirs(hard)
    }

    fn clear_dirs(&self, hard: bool) -> Result<()> {
        recreate_dir(&self.ctx.paths.ledger_dir)?;
        log::info!("Cleared ledger at {}", self.ctx.paths.ledger_dir.display());

        if hard {
            recreate_dir(&self.ctx.paths.accounts_dir)?;
            log::info!(
                "Cleared accounts at {}",
                self.ctx.paths.accounts_dir.display()
            );
        }
        Ok(())
    }

    fn live_child(&mut self) -> Option<&ManagedChild> {
        if let Some(exit) = self.child.as_ref().and_then(ManagedChild::exited) {
            self.last_exit = Some(exit);
        }
        self.child.as_ref().filter(|child| child.exited().is_none())
    }

    pub fn is_running(&mut self) -> bool {
        self.live_child().is_some() || self.records.load_live().is_some()
    }

    pub fn get_status(&mut self) -> ValidatorStatus {
        let in_memory = self
            .live_child()
            .map(|c| (c.pid, c.environment.name.clone(), c.environment.port, c.start_time));

        let running = in_memory.or_else(|| {
            self.records
                .load_live()
                .map(|r| (r.pid, r.environment, r.rpc_port, r.start_time))
        });

        let last_exit_code = self.last_exit.and_then(|exit| exit.code);

        let Some((pid, environment, rpc_port, start_time)) = running else {
            return ValidatorStatus {
                last_exit_code,
                ..Default::default()
            };
        };

        let usage = self.probe.usage(pid).unwrap_or_default();
        let uptime_secs = (Utc::now() - start_time).num_seconds().max(0) as u64;

        ValidatorStatus {
            running: true,
            pid: Some(pid),
            environment: Some(environment),
            rpc_port: Some(rpc_port),
            rpc_url: Some(self.ctx.rpc_url(rpc_port)),
            start_time: Some(start_time),
            uptime_secs,
            cpu_percent: usage.cpu_percent,
            memory_mb: usage.memory_mb,
            last_exit_code,
        }
    }
}

fn recreate_dir(path: &Path) -> Result<()> {
    match fs::remove_dir_all(path) {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => return Err(ValmonError::io_at(path, e)),
    }
    fs::create_dir_all(path).map_err(|e| ValmonError::io_at(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::chain_client::EpochInfo;
    use crate::core::config::GlobalConfig;
    use crate::core::context::Paths;
    use crate::core::environment::EnvironmentOptions;
    use futures_util::future::{BoxFuture, FutureExt};
    use tempfile::TempDir;

    /// Client that is always ready
    struct ReadyClient;

    impl ChainClient for ReadyClient {
        fn version<'a>(&'a self, _rpc_url: &'a str) -> BoxFuture<'a, Result<String>> {
            async { Ok("1.18.0".to_string()) }.boxed()
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

    fn supervisor(temp_dir: &TempDir) -> ProcessSupervisor {
        let ctx = Arc::new(Context::with_config(
            Paths::new(temp_dir.path()),
            GlobalConfig::default(),
        ));
        ProcessSupervisor::new(ctx, Arc::new(ReadyClient))
    }

    #[tokio::test]
    async fn test_start_unknown_environment_is_not_found() {
        let temp_dir = TempDir::new().unwrap();
        let mut sup = supervisor(&temp_dir);

        let err = sup
            .start(StartOptions {
                environment: Some("missing".to_string()),
                ..Default::default()
            })
            .await
            .unwrap_err();

        assert!(matches!(err, ValmonError::NotFound(_)));
        assert!(!sup.get_status().running);
        assert!(sup.records().load().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_missing_executable_is_startup_error() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = GlobalConfig::default();
        config.validator.binary = "valmon-no-such-validator".to_string();
        let ctx = Arc::new(Context::with_config(Paths::new(temp_dir.path()), config));
        EnvironmentRegistry::new(&ctx)
            .create("ci", EnvironmentOptions::default())
            .unwrap();
        let mut sup = ProcessSupervisor::new(ctx, Arc::new(ReadyClient));

        let err = sup
            .start(StartOptions {
                environment: Some("ci".to_string()),
                ..Default::default()
            })
            .await
            .unwrap_err();

        assert!(matches!(err, ValmonError::Startup(_)));
    }

    #[tokio::test]
    async fn test_failed_start_releases_lock() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = GlobalConfig::default();
        config.validator.binary = "valmon-no-such-validator".to_string();
        let ctx = Arc::new(Context::with_config(Paths::new(temp_dir.path()), config));
        EnvironmentRegistry::new(&ctx)
            .create("ci", EnvironmentOptions::default())
            .unwrap();
        let opts = StartOptions {
            environment: Some("ci".to_string()),
            ..Default::default()
        };

        // The first supervisor stays alive, as it would inside the monitoring service
        let mut first = ProcessSupervisor::new(ctx.clone(), Arc::new(ReadyClient));
        let err = first.start(opts.clone()).await.unwrap_err();
        assert!(matches!(err, ValmonError::Startup(_)));
        assert!(first.lock.is_none());
        assert!(SupervisorLock::try_acquire(&ctx.paths.lock_file).unwrap().is_some());

        let mut second = ProcessSupervisor::new(ctx, Arc::new(ReadyClient));
        let err = second.start(opts).await.unwrap_err();
        assert!(matches!(err, ValmonError::Startup(_)), "got {:?}", err);
    }

    #[tokio::test]
    async fn test_reset_recreates_dirs() {
        let temp_dir = TempDir::new().unwrap();
        let mut sup = supervisor(&temp_dir);
        let ledger = temp_dir.path().join("ledger");
        let accounts = temp_dir.path().join("accounts");
        fs::create_dir_all(&ledger).unwrap();
        fs::create_dir_all(&accounts).unwrap();
        fs::write(ledger.join("rocksdb"), "data").unwrap();
        fs::write(accounts.join("acc.json"), "{}").unwrap();

        sup.reset(false).unwrap();
        assert!(ledger.exists());
        assert!(!ledger.join("rocksdb").exists());
        assert!(accounts.join("acc.json").exists());

        sup.reset(true).unwrap();
        assert!(!accounts.join("acc.json").exists());
    }

    #[tokio::test]
    async fn test_stop_when_idle_clears_stale_record() {
        let temp_dir = TempDir::new().unwrap();
        let mut sup = supervisor(&temp_dir);
        sup.records()
            .save(&ProcessRecord {
                pid: u32::MAX - 7,
                environment: "ci".to_string(),
                start_time: Utc::now(),
                rpc_port: 9000,
            })
            .unwrap();

        assert!(!sup.stop().await.unwrap());
        assert!(sup.records().load().unwrap().is_none());
    }
}
