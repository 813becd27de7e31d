use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::future::Future;
use std::io::ErrorKind;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;

use super::protocol::{
    CleanupParams, ControlRequest, CreateParams, HistoryParams, NameParams, ResetParams,
    ServerMessage, StatusSnapshot,
};
use crate::core::chain_client::ChainClient;
use crate::core::context::Context;
use crate::core::environment::EnvironmentRegistry;
use crate::core::metrics::{evaluate_alerts, ListenerId, MetricSample, MetricsCollector, OperationTiming};
use crate::core::supervisor::{
    ExitInfo, ProcessRecordStore, ProcessSupervisor, StartInfo, StartOptions, ValidatorStatus,
};
use crate::error::{Result, ValmonError};

/// The control surface only listens locally
const CONTROL_HOST: &str = "127.0.0.1";

type Outbox = mpsc::UnboundedSender<Message>;

struct ServerHandle {
    addr: SocketAddr,
    shutdown: watch::Sender<bool>,
    accept_task: JoinHandle<()>,
    listener_id: ListenerId,
}

/// Ties the supervisor, registry and collector together behind one
/// WebSocket: clients send control requests and receive every sample.
pub struct MonitoringService {
    ctx: Arc<Context>,
    registry: EnvironmentRegistry,
    records: ProcessRecordStore,
    supervisor: tokio::sync::Mutex<ProcessSupervisor>,
    collector: MetricsCollector,
    subscribers: Mutex<HashMap<u64, Outbox>>,
    next_subscriber_id: AtomicU64,
    server: tokio::sync::Mutex<Option<ServerHandle>>,
}

impl MonitoringService {
    pub fn new(ctx: Arc<Context>, client: Arc<dyn ChainClient>) -> Arc<Self> {
        let supervisor = ProcessSupervisor::new(ctx.clone(), client.clone());
        let collector = MetricsCollector::new(ctx.clone(), client);
        Self::with_parts(ctx, supervisor, collector)
    }

    pub fn with_parts(
        ctx: Arc<Context>,
        supervisor: ProcessSupervisor,
        collector: MetricsCollector,
    ) -> Arc<Self> {
        Arc::new(Self {
            registry: EnvironmentRegistry::new(&ctx),
            records: ProcessRecordStore::new(&ctx.paths.process_file),
            supervisor: tokio::sync::Mutex::new(supervisor),
            collector,
            subscribers: Mutex::new(HashMap::new()),
            next_subscriber_id: AtomicU64::new(1),
            server: tokio::sync::Mutex::new(None),
            ctx,
        })
    }

    pub fn collector(&self) -> &MetricsCollector {
        &self.collector
    }

    pub fn registry(&self) -> &EnvironmentRegistry {
        &self.registry
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }

    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.server.lock().await.as_ref().map(|server| server.addr)
    }

    /// Listen on `port` (0 picks a free one) and begin collection at the
    /// configured interval. Calling it again while running returns the
    /// existing address.
    pub async fn start(self: &Arc<Self>, port: u16) -> Result<SocketAddr> {
        let mut server = self.server.lock().await;
        if let Some(existing) = server.as_ref() {
            return Ok(existing.addr);
        }

        let listener = TcpListener::bind((CONTROL_HOST, port))
            .await
            .map_err(|e| match e.kind() {
                ErrorKind::AddrInUse => {
                    ValmonError::conflict(format!("Port {} is already in use", port))
                }
                _ => ValmonError::Io(e),
            })?;
        let addr = listener.local_addr()?;

        let service = Arc::downgrade(self);
        let listener_id = self.collector.add_listener(move |sample| {
            if let Some(service) = service.upgrade() {
                service.publish(sample);
            }
            Ok(())
        });

        let interval = Duration::from_millis(self.ctx.config.monitoring.interval_ms);
        if let Err(e) = self.collector.start_collection(interval) {
            self.collector.remove_listener(listener_id);
            return Err(e);
        }

        let (shutdown, shutdown_rx) = watch::channel(false);
        let accept_task = tokio::spawn(accept_loop(Arc::downgrade(self), listener, shutdown_rx));

        log::info!("Monitoring service listening on ws://{}", addr);

        *server = Some(ServerHandle {
            addr,
            shutdown,
            accept_task,
            listener_id,
        });
        Ok(addr)
    }

    /// Stop collection, close every subscriber and the listener. Returns
    /// `false` if the service was not running.
    pub async fn stop(&self) -> bool {
        let Some(server) = self.server.lock().await.take() else {
            return false;
        };

        self.collector.stop_collection();
        self.collector.remove_listener(server.listener_id);
        let _ = server.shutdown.send(true);
        self.subscribers.lock().clear();

        if let Err(e) = server.accept_task.await {
            if !e.is_cancelled() {
                log::warn!("Monitoring accept loop ended abnormally: {}", e);
            }
        }

        log::info!("Monitoring service stopped");
        true
    }

    fn subscribe(&self, outbox: Outbox) -> u64 {
        let id = self.next_subscriber_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers.lock().insert(id, outbox);
        id
    }

    fn unsubscribe(&self, id: u64) {
        self.subscribers.lock().remove(&id);
    }

    /// Best effort: a subscriber whose channel is gone is dropped
    fn broadcast(&self, message: &ServerMessage) {
        let text = match serde_json::to_string(message) {
            Ok(text) => text,
            Err(e) => {
                log::error!("Failed to serialize push message: {}", e);
                return;
            }
        };

        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|id, outbox| {
            let delivered = outbox.send(Message::text(text.clone())).is_ok();
            if !delivered {
                log::debug!("Dropping subscriber {}", id);
            }
            delivered
        });
    }

    fn publish(&self, sample: &MetricSample) {
        self.broadcast(&ServerMessage::Metrics {
            data: sample.clone(),
        });

        for alert in evaluate_alerts(sample, &self.ctx.config.performance) {
            log::warn!("{}", alert.message);
            self.broadcast(&ServerMessage::Alert { data: alert });
        }
    }

    /// Run `op`, timing it; the timing is attached to the next broadcast
    /// sample whether or not the operation succeeded
    pub async fn track<T, F>(&self, name: &str, op: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let started = Instant::now();
        let result = op.await;
        let duration_ms = started.elapsed().as_secs_f64() * 1000.0;

        log::debug!(
            "{} finished in {:.1} ms ({})",
            name,
            duration_ms,
            if result.is_ok() { "ok" } else { "failed" }
        );

        self.collector.record_operation(
            name,
            OperationTiming {
                duration_ms,
                success: result.is_ok(),
                finished_at: Utc::now(),
            },
        );
        result
    }

    /// Status without waiting on a supervisor operation in progress; while
    /// one runs, the durable record is reported instead
    pub fn validator_status(&self) -> ValidatorStatus {
        if let Ok(mut supervisor) = self.supervisor.try_lock() {
            return supervisor.get_status();
        }

        let Some(record) = self.records.load_live() else {
            return ValidatorStatus::default();
        };
        ValidatorStatus {
            running: true,
            pid: Some(record.pid),
            rpc_url: Some(self.ctx.rpc_url(record.rpc_port)),
            rpc_port: Some(record.rpc_port),
            uptime_secs: (Utc::now() - record.start_time).num_seconds().max(0) as u64,
            start_time: Some(record.start_time),
            environment: Some(record.environment),
            ..Default::default()
        }
    }

    pub fn status_snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            status: self.validator_status(),
            metrics: self.collector.latest(),
        }
    }

    pub async fn start_validator(&self, opts: StartOptions) -> Result<StartInfo> {
        self.track("validator.start", async {
            self.supervisor.lock().await.start(opts).await
        })
        .await
    }

    pub async fn stop_validator(&self) -> Result<bool> {
        self.track("validator.stop", async {
            self.supervisor.lock().await.stop().await
        })
        .await
    }

    pub async fn restart_validator(&self, opts: StartOptions) -> Result<StartInfo> {
        self.track("validator.restart", async {
            self.supervisor.lock().await.restart(opts).await
        })
        .await
    }

    pub async fn reset_validator(&self, hard: bool) -> Result<()> {
        self.track("validator.reset", async {
            self.supervisor.lock().await.reset(hard)
        })
        .await
    }

    /// Exit notifications for a validator started through this service
    pub async fn exit_watch(&self) -> Option<watch::Receiver<Option<ExitInfo>>> {
        self.supervisor.lock().await.exit_watch()
    }

    /// Answer one control request
    pub async fn dispatch(&self, request: ControlRequest) -> ServerMessage {
        let id = request.id;
        match self.handle(&request.method, request.params).await {
            Ok(data) => ServerMessage::success(id, data),
            Err(e) => {
                log::debug!("Request {} failed: {}", request.method, e);
                ServerMessage::failure(id, &e)
            }
        }
    }

    async fn handle(&self, method: &str, params: Value) -> Result<Value> {
        match method {
            "status" => Ok(serde_json::to_value(self.status_snapshot())?),
            "metrics.current" => {
                let sample = match self.collector.latest() {
                    Some(sample) => Some(sample),
                    None => self.collector.collect().await,
                };
                Ok(serde_json::to_value(sample)?)
            }
            "metrics.history" => {
                let p: HistoryParams = params_of(params)?;
                let to = p.to.unwrap_or_else(|| Utc::now().date_naive());
                let from = p.from.unwrap_or(to);
                Ok(serde_json::to_value(
                    self.collector.get_historical_metrics(from, to)?,
                )?)
            }
            "metrics.cleanup" => {
                let p: CleanupParams = params_of(params)?;
                let retention = p
                    .retention_days
                    .unwrap_or(self.ctx.config.monitoring.retention_days);
                let removed = self.collector.cleanup_old_metrics(retention)?;
                Ok(json!({ "removed": removed.len(), "files": removed }))
            }
            "environments.list" => Ok(serde_json::to_value(self.registry.list()?)?),
            "environments.get" => {
                let p: NameParams = params_of(params)?;
                let env = self.registry.require(&p.name)?;
                Ok(serde_json::to_value(env)?)
            }
            "environments.create" => {
                let p: CreateParams = params_of(params)?;
                let env = self.registry.create(&p.name, p.options)?;
                Ok(serde_json::to_value(env)?)
            }
            "environments.delete" => {
                let p: NameParams = params_of(params)?;
                self.registry.delete(&p.name)?;
                Ok(json!({ "deleted": p.name }))
            }
            "environments.switch" => {
                let p: NameParams = params_of(params)?;
                self.registry.switch_current(&p.name)?;
                Ok(json!({ "current": p.name }))
            }
            "validator.start" => {
                let opts: StartOptions = params_of(params)?;
                Ok(serde_json::to_value(self.start_validator(opts).await?)?)
            }
            "validator.stop" => {
                let stopped = self.stop_validator().await?;
                Ok(json!({ "stopped": stopped }))
            }
            "validator.restart" => {
                let opts: StartOptions = params_of(params)?;
                Ok(serde_json::to_value(self.restart_validator(opts).await?)?)
            }
            "validator.reset" => {
                let p: ResetParams = params_of(params)?;
                self.reset_validator(p.hard).await?;
                Ok(json!({ "reset": true, "hard": p.hard }))
            }
            other => Err(ValmonError::not_found(format!("Unknown method '{}'", other))),
        }
    }

    async fn handle_connection(
        self: Arc<Self>,
        stream: TcpStream,
        peer: SocketAddr,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let ws = match accept_async(stream).await {
            Ok(ws) => ws,
            Err(e) => {
                log::debug!("WebSocket handshake with {} failed: {}", peer, e);
                return;
            }
        };
        let (mut sink, mut source) = ws.split();
        let (outbox, mut inbox) = mpsc::unbounded_channel::<Message>();

        // Queued before subscribing so the snapshot is always first
        let snapshot = ServerMessage::Status {
            data: self.status_snapshot(),
        };
        if let Ok(text) = serde_json::to_string(&snapshot) {
            let _ = outbox.send(Message::text(text));
        }
        let subscriber_id = self.subscribe(outbox.clone());
        log::info!("Subscriber {} connected from {}", subscriber_id, peer);

        tokio::spawn(async move {
            while let Some(message) = inbox.recv().await {
                let closing = matches!(message, Message::Close(_));
                if sink.send(message).await.is_err() || closing {
                    break;
                }
            }
            let _ = sink.close().await;
        });

        if !*shutdown.borrow() {
            loop {
                tokio::select! {
                    incoming = source.next() => match incoming {
                        Some(Ok(Message::Text(text))) => {
                            self.clone().spawn_request(text.to_string(), outbox.clone());
                        }
                        Some(Ok(Message::Close(_))) | None => break,
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            log::debug!("Subscriber {} read error: {}", subscriber_id, e);
                            break;
                        }
                    },
                    _ = shutdown.changed() => break,
                }
            }
        }

        if *shutdown.borrow() {
            let _ = outbox.send(Message::Close(None));
        }
        self.unsubscribe(subscriber_id);
        log::info!("Subscriber {} disconnected", subscriber_id);
    }

    fn spawn_request(self: Arc<Self>, text: String, outbox: Outbox) {
        tokio::spawn(async move {
            let reply = match serde_json::from_str::<ControlRequest>(&text) {
                Ok(request) => self.dispatch(request).await,
                Err(e) => ServerMessage::failure(
                    None,
                    &ValmonError::parse(format!("Malformed request: {}", e)),
                ),
            };

            match serde_json::to_string(&reply) {
                Ok(text) => {
                    let _ = outbox.send(Message::text(text));
                }
                Err(e) => log::error!("Failed to serialize response: {}", e),
            }
        });
    }
}

async fn accept_loop(
    service: Weak<MonitoringService>,
    listener: TcpListener,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    let Some(service) = service.upgrade() else {
                        break;
                    };
                    tokio::spawn(service.handle_connection(stream, peer, shutdown.clone()));
                }
                Err(e) => log::warn!("Failed to accept connection: {}", e),
            },
            _ = shutdown.changed() => break,
        }
    }
}

/// Absent params are treated as an empty object
fn params_of<T: DeserializeOwned>(params: Value) -> Result<T> {
    let params = if params.is_null() { json!({}) } else { params };
    serde_json::from_value(params)
        .map_err(|e| ValmonError::invalid_input(format!("Invalid params: {}", e)))
}
