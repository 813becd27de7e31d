//! Messages exchanged over the monitoring WebSocket.
//!
//! Clients send [`ControlRequest`]s; the server pushes [`ServerMessage`]s,
//! which are either unsolicited (`status`, `metrics`, `alert`) or answers to a
//! request (`response`).

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::environment::EnvironmentOptions;
use crate::core::metrics::{Alert, MetricSample};
use crate::core::supervisor::ValidatorStatus;
use crate::error::ValmonError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

impl ControlRequest {
    pub fn new(id: u64, method: impl Into<String>, params: Value) -> Self {
        Self {
            id: Some(id),
            method: method.into(),
            params,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub kind: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub status: ValidatorStatus,
    pub metrics: Option<MetricSample>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerMessage {
    Status {
        data: StatusSnapshot,
    },
    Metrics {
        data: MetricSample,
    },
    Alert {
        data: Alert,
    },
    Response {
        id: Option<u64>,
        ok: bool,
        status: u16,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        data: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<ErrorBody>,
    },
}

impl ServerMessage {
    pub fn success(id: Option<u64>, data: Value) -> Self {
        ServerMessage::Response {
            id,
            ok: true,
            status: 200,
            data: Some(data),
            error: None,
        }
    }

    pub fn failure(id: Option<u64>, err: &ValmonError) -> Self {
        ServerMessage::Response {
            id,
            ok: false,
            status: err.status_code(),
            data: None,
            error: Some(ErrorBody {
                kind: err.kind().to_string(),
                message: err.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HistoryParams {
    #[serde(alias = "start")]
    pub from: Option<NaiveDate>,
    #[serde(alias = "end")]
    pub to: Option<NaiveDate>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CleanupParams {
    pub retention_days: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NameParams {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateParams {
    pub name: String,
    #[serde(flatten)]
    pub options: EnvironmentOptions,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ResetParams {
    pub hard: bool,
}
