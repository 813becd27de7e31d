use chrono::{DateTime, NaiveDate, Utc};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::history::HistoryStore;
use super::host::{NetworkProbe, StorageProbe, SystemProbe};
use super::sample::{MetricSample, OperationTiming, ValidatorMetrics};
use super::tps::TpsEstimator;
use crate::core::chain_client::ChainClient;
use crate::core::context::Context;
use crate::core::supervisor::{ProcessProbe, ProcessRecordStore};
use crate::error::{Result, ValmonError};

pub type ListenerId = u64;

type Listener = Arc<dyn Fn(&MetricSample) -> Result<()> + Send + Sync>;

struct Shared {
    ctx: Arc<Context>,
    client: Arc<dyn ChainClient>,
    records: ProcessRecordStore,
    history: HistoryStore,
    system: Mutex<SystemProbe>,
    network: Mutex<NetworkProbe>,
    storage: Mutex<StorageProbe>,
    process: Mutex<ProcessProbe>,
    tps: Mutex<TpsEstimator>,
    last_timestamp: Mutex<Option<DateTime<Utc>>>,
    latest: Mutex<Option<MetricSample>>,
    pending_operations: Mutex<BTreeMap<String, OperationTiming>>,
    listeners: Mutex<Vec<(ListenerId, Listener)>>,
    next_listener_id: AtomicU64,
    tick_guard: tokio::sync::Mutex<()>,
    timer: Mutex<Option<JoinHandle<()>>>,
}

/// Samples the host and the validator, persists each tick to the day's
/// history file and fans samples out to listeners.
///
/// Cheap to clone; clones share all state.
#[derive(Clone)]
pub struct MetricsCollector {
    shared: Arc<Shared>,
}

impl MetricsCollector {
    pub fn new(ctx: Arc<Context>, client: Arc<dyn ChainClient>) -> Self {
        let monitoring = &ctx.config.monitoring;

        let shared = Shared {
            records: ProcessRecordStore::new(&ctx.paths.process_file),
            history: HistoryStore::new(&ctx.paths.metrics_dir),
            system: Mutex::new(SystemProbe::new()),
            network: Mutex::new(NetworkProbe::new(monitoring.network_interface.clone())),
            storage: Mutex::new(StorageProbe::new(&ctx.paths.ledger_dir)),
            process: Mutex::new(ProcessProbe::new()),
            tps: Mutex::new(TpsEstimator::new(monitoring.assumed_tx_per_slot)),
            last_timestamp: Mutex::new(None),
            latest: Mutex::new(None),
            pending_operations: Mutex::new(BTreeMap::new()),
            listeners: Mutex::new(Vec::new()),
            next_listener_id: AtomicU64::new(1),
            tick_guard: tokio::sync::Mutex::new(()),
            timer: Mutex::new(None),
            client,
            ctx,
        };

        Self {
            shared: Arc::new(shared),
        }
    }

    pub fn history(&self) -> &HistoryStore {
        &self.shared.history
    }

    /// Gather one sample. Each family is collected concurrently and falls
    /// back to its zeroed shape on failure; `None` only if the collection
    /// task itself was lost.
    ///
    /// Waits for a running tick to finish so the TPS window only ever sees
    /// one collection at a time.
    pub async fn collect(&self) -> Option<MetricSample> {
        let _guard = self.shared.tick_guard.lock().await;
        self.sample().await
    }

    /// Caller must hold `tick_guard`
    async fn sample(&self) -> Option<MetricSample> {
        let collector = self.clone();
        match tokio::spawn(async move { collector.gather().await }).await {
            Ok(sample) => Some(sample),
            Err(e) => {
                log::error!("Metrics collection aborted: {}", e);
                None
            }
        }
    }

    async fn gather(&self) -> MetricSample {
        let validator = {
            let collector = self.clone();
            async move {
                match tokio::spawn(async move { collector.collect_validator().await }).await {
                    Ok(metrics) => metrics,
                    Err(e) => {
                        log::warn!("validator metrics unavailable: {}", e);
                        ValidatorMetrics::default()
                    }
                }
            }
        };

        let (system, network, storage, validator) = tokio::join!(
            self.blocking_family("system", |s| Ok(s.system.lock().collect())),
            self.blocking_family("network", |s| s.network.lock().collect()),
            self.blocking_family("storage", |s| s.storage.lock().collect()),
            validator,
        );

        MetricSample {
            timestamp: self.next_timestamp(),
            system,
            validator,
            network,
            storage,
            operations: BTreeMap::new(),
        }
    }

    async fn blocking_family<T, F>(&self, family: &'static str, source: F) -> T
    where
        T: Default + Send + 'static,
        F: FnOnce(&Shared) -> Result<T> + Send + 'static,
    {
        let shared = self.shared.clone();
        match tokio::task::spawn_blocking(move || source(&shared)).await {
            Ok(Ok(metrics)) => metrics,
            Ok(Err(e)) => {
                log::warn!("{} metrics unavailable: {}", family, e);
                T::default()
            }
            Err(e) => {
                log::warn!("{} metrics source failed: {}", family, e);
                T::default()
            }
        }
    }

    /// Clamped so timestamps never go backwards across samples
    fn next_timestamp(&self) -> DateTime<Utc> {
        let mut last = self.shared.last_timestamp.lock();
        let now = match *last {
            Some(previous) => Utc::now().max(previous),
            None => Utc::now(),
        };
        *last = Some(now);
        now
    }

    async fn collect_validator(&self) -> ValidatorMetrics {
        let shared = &self.shared;

        let Some(record) = shared.records.load_live() else {
            shared.tps.lock().reset();
            return ValidatorMetrics::default();
        };

        let usage = shared.process.lock().usage(record.pid).unwrap_or_default();
        let uptime_secs = (Utc::now() - record.start_time).num_seconds().max(0) as u64;

        let rpc_url = shared.ctx.rpc_url(record.rpc_port);
        let timeout = Duration::from_secs(shared.ctx.config.monitoring.query_timeout_secs);
        let client = &shared.client;

        let (block_height, slot, epoch_info) = tokio::join!(
            bounded_query("block height", timeout, client.block_height(&rpc_url)),
            bounded_query("slot", timeout, client.slot(&rpc_url)),
            bounded_query("epoch info", timeout, client.epoch_info(&rpc_url)),
        );

        let tps = match slot {
            Some(slot) => shared.tps.lock().observe(record.pid, slot, Instant::now()),
            None => 0.0,
        };

        ValidatorMetrics {
            running: true,
            pid: Some(record.pid),
            cpu_percent: usage.cpu_percent,
            memory_mb: usage.memory_mb,
            uptime_secs,
            tps,
            block_height: block_height.unwrap_or(0),
            slot_height: slot.unwrap_or(0),
            epoch_info,
        }
    }

    /// One collection cycle: collect, attach pending operation timings,
    /// append to history, notify listeners. Skipped (returns `None`) while a
    /// previous cycle is still running.
    pub async fn tick(&self) -> Option<MetricSample> {
        let Ok(_guard) = self.shared.tick_guard.try_lock() else {
            log::debug!("Previous collection still running, skipping tick");
            return None;
        };

        let mut sample = self.sample().await?;
        sample.operations = std::mem::take(&mut *self.shared.pending_operations.lock());

        if let Err(e) = self.shared.history.append(&sample) {
            log::warn!("Failed to persist metrics sample: {}", e);
        }

        *self.shared.latest.lock() = Some(sample.clone());
        self.notify(&sample);

        Some(sample)
    }

    fn notify(&self, sample: &MetricSample) {
        let listeners: Vec<(ListenerId, Listener)> = self.shared.listeners.lock().clone();

        for (id, listener) in listeners {
            match panic::catch_unwind(AssertUnwindSafe(|| listener(sample))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => log::warn!("Metrics listener {} failed: {}", id, e),
                Err(_) => log::error!("Metrics listener {} panicked", id),
            }
        }
    }

    /// Begin periodic collection. Returns `false` if already collecting.
    pub fn start_collection(&self, interval: Duration) -> Result<bool> {
        if interval.is_zero() {
            return Err(ValmonError::invalid_input(
                "Collection interval must be positive",
            ));
        }

        let mut timer = self.shared.timer.lock();
        if timer.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return Ok(false);
        }

        let collector = self.clone();
        *timer = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                ticker.tick().await;
                let collector = collector.clone();
                tokio::spawn(async move {
                    collector.tick().await;
                });
            }
        }));

        log::info!("Metrics collection started ({} ms)", interval.as_millis());
        Ok(true)
    }

    /// Returns `false` if collection was not running
    pub fn stop_collection(&self) -> bool {
        match self.shared.timer.lock().take() {
            Some(handle) => {
                handle.abort();
                log::info!("Metrics collection stopped");
                true
            }
            None => false,
        }
    }

    pub fn is_collecting(&self) -> bool {
        self.shared
            .timer
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    pub fn add_listener<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&MetricSample) -> Result<()> + Send + Sync + 'static,
    {
        let id = self.shared.next_listener_id.fetch_add(1, Ordering::Relaxed);
        self.shared.listeners.lock().push((id, Arc::new(listener)));
        id
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.shared.listeners.lock();
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    /// Most recent sample produced by a tick
    pub fn latest(&self) -> Option<MetricSample> {
        self.shared.latest.lock().clone()
    }

    /// Fold an operation timing into the next tick's sample
    pub fn record_operation(&self, name: impl Into<String>, timing: OperationTiming) {
        self.shared
            .pending_operations
            .lock()
            .insert(name.into(), timing);
    }

    pub fn get_historical_metrics(&self, start: NaiveDate, end: NaiveDate) -> Result<Vec<MetricSample>> {
        self.shared.history.read_range(start, end)
    }

    pub fn cleanup_old_metrics(&self, retention_days: u32) -> Result<Vec<PathBuf>> {
        self.shared.history.cleanup(retention_days)
    }
}

async fn bounded_query<T>(
    what: &str,
    timeout: Duration,
    query: impl Future<Output = Result<T>>,
) -> Option<T> {
    match tokio::time::timeout(timeout, query).await {
        Ok(Ok(value)) => Some(value),
        Ok(Err(e)) => {
            log::debug!("{} query failed: {}", what, e);
            None
        }
        Err(_) => {
            log::debug!("{} query timed out after {}s", what, timeout.as_secs());
            None
        }
    }
}
