use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::time::Duration;
use tempfile::TempDir;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use valmon::core::config::GlobalConfig;
use valmon::core::monitoring::{ControlRequest, MonitoringService};
use valmon::error::ValmonError;

use super::support::{context_with, FakeClient};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

fn fast_config() -> GlobalConfig {
    let mut config = GlobalConfig::default();
    config.monitoring.interval_ms = 200;
    config
}

async fn next_json(ws: &mut Client) -> Value {
    loop {
        let message = tokio::time::timeout(Duration::from_secs(10), ws.next())
            .await
            .expect("timed out waiting for a message")
            .expect("stream ended")
            .expect("read error");
        if let Message::Text(text) = message {
            return serde_json::from_str(text.as_str()).unwrap();
        }
    }
}

/// Skip pushes until the response to `id` arrives
async fn response_to(ws: &mut Client, id: Option<u64>) -> Value {
    loop {
        let value = next_json(ws).await;
        if value["type"] == "response" && value["id"] == json!(id) {
            return value;
        }
    }
}

async fn call(ws: &mut Client, id: u64, method: &str, params: Value) -> Value {
    let request = ControlRequest::new(id, method, params);
    ws.send(Message::text(serde_json::to_string(&request).unwrap()))
        .await
        .unwrap();
    response_to(ws, Some(id)).await
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_every_subscriber_receives_metrics() {
    let temp_dir = TempDir::new().unwrap();
    let service = MonitoringService::new(context_with(&temp_dir, fast_config()), FakeClient::ready());
    let addr = service.start(0).await.unwrap();

    let (mut first, _) = connect_async(format!("ws://{}", addr)).await.unwrap();
    let (mut second, _) = connect_async(format!("ws://{}", addr)).await.unwrap();

    for ws in [&mut first, &mut second] {
        assert_eq!(next_json(ws).await["type"], "status");
        loop {
            let value = next_json(ws).await;
            if value["type"] == "metrics" {
                assert!(value["data"]["timestamp"].is_string());
                assert!(value["data"]["system"]["cpu"]["coreCount"].as_u64().unwrap() > 0);
                break;
            }
        }
    }

    drop(first);
    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_eq!(service.subscriber_count(), 1);

    service.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_requests_over_socket() {
    let temp_dir = TempDir::new().unwrap();
    let service = MonitoringService::new(context_with(&temp_dir, fast_config()), FakeClient::ready());
    let addr = service.start(0).await.unwrap();
    let (mut ws, _) = connect_async(format!("ws://{}", addr)).await.unwrap();

    let created = call(
        &mut ws,
        1,
        "environments.create",
        json!({"name": "ci", "port": 9300, "description": "from socket"}),
    )
    .await;
    assert_eq!(created["ok"], true);
    assert_eq!(created["data"]["port"], 9300);

    let duplicate = call(&mut ws, 2, "environments.create", json!({"name": "ci"})).await;
    assert_eq!(duplicate["ok"], false);
    assert_eq!(duplicate["status"], 409);

    let listed = call(&mut ws, 3, "environments.list", Value::Null).await;
    assert_eq!(listed["data"][0]["name"], "ci");

    let history = call(&mut ws, 4, "metrics.history", json!({"from": "2024-03-02", "to": "2024-03-01"})).await;
    assert_eq!(history["ok"], false);
    assert_eq!(history["status"], 400);

    ws.send(Message::text("{not json")).await.unwrap();
    let malformed = response_to(&mut ws, None).await;
    assert_eq!(malformed["ok"], false);
    assert_eq!(malformed["status"], 400);

    service.stop().await;
}

#[tokio::test]
async fn test_port_in_use_is_conflict() {
    let temp_dir = TempDir::new().unwrap();
    let ctx = context_with(&temp_dir, fast_config());

    let first = MonitoringService::new(ctx.clone(), FakeClient::ready());
    let addr = first.start(0).await.unwrap();

    let second = MonitoringService::new(ctx, FakeClient::ready());
    let err = second.start(addr.port()).await.unwrap_err();
    assert!(matches!(err, ValmonError::Conflict(_)), "got {:?}", err);
    assert!(!second.collector().is_collecting());

    first.stop().await;
}

#[cfg(unix)]
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_validator_lifecycle_over_socket() {
    use super::support::fake_validator;

    let temp_dir = TempDir::new().unwrap();
    let binary = fake_validator(&temp_dir, "validator.sh", "exec sleep 60");
    let mut config = fast_config();
    config.validator.binary = binary.to_string_lossy().into_owned();
    config.validator.stop_timeout_secs = 5;

    let service = MonitoringService::new(context_with(&temp_dir, config), FakeClient::ready());
    let addr = service.start(0).await.unwrap();
    let (mut ws, _) = connect_async(format!("ws://{}", addr)).await.unwrap();

    call(&mut ws, 1, "environments.create", json!({"name": "ci", "port": 9400})).await;

    let started = call(&mut ws, 2, "validator.start", json!({"environment": "ci"})).await;
    assert_eq!(started["ok"], true, "{}", started);
    let pid = started["data"]["pid"].as_u64().unwrap();

    let status = call(&mut ws, 3, "status", Value::Null).await;
    assert_eq!(status["data"]["status"]["running"], true);
    assert_eq!(status["data"]["status"]["pid"], pid);

    loop {
        let value = next_json(&mut ws).await;
        if value["type"] == "metrics" && value["data"]["operations"]["validator.start"].is_object() {
            assert_eq!(value["data"]["operations"]["validator.start"]["success"], true);
            break;
        }
    }

    let stopped = call(&mut ws, 4, "validator.stop", Value::Null).await;
    assert_eq!(stopped["data"]["stopped"], true);
    assert!(!service.validator_status().running);

    service.stop().await;
}
