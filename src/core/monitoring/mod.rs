//! WebSocket control surface and live metrics push channel.

pub mod protocol;
mod service;

pub use protocol::{ControlRequest, ServerMessage, StatusSnapshot};
pub use service::MonitoringService;
