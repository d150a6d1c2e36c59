//! Connection to the collector.
//!
//! [`Transport`] is the outbound half the session drives. Inbound traffic is
//! decoded into [`InboundEvent`]s on the transport's callback thread and
//! posted to a channel the session drains.

pub mod socketio;

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::probe::ProbeResult;

pub use socketio::SocketIoTransport;

pub const EVENT_REGISTER: &str = "register";
pub const EVENT_HEARTBEAT: &str = "heartbeat";
pub const EVENT_REPORT: &str = "report_data";
pub const EVENT_PROBE_RESULT: &str = "tcping_result";

pub const EVENT_PROBE_REQUEST: &str = "request_tcping";
pub const EVENT_REGISTRATION_SUCCESS: &str = "registration_success";
pub const EVENT_REGISTRATION_FAILED: &str = "registration_failed";
pub const EVENT_CONNECTION_REPLACED: &str = "connection_replaced";
pub const EVENT_SERVER_ERROR: &str = "error";

/// Transport failure.
#[derive(Debug)]
pub enum TransportError {
    /// The handshake failed.
    Connect(String),
    /// The handshake did not finish in time.
    Timeout(Duration),
    Emit { event: String, reason: String },
    NotConnected,
    Disconnect(String),
}

impl std::fmt::Display for TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportError::Connect(e) => write!(f, "connect failed: {}", e),
            TransportError::Timeout(d) => write!(f, "connect timed out after {:?}", d),
            TransportError::Emit { event, reason } => write!(f, "emit {} failed: {}", event, reason),
            TransportError::NotConnected => write!(f, "not connected"),
            TransportError::Disconnect(e) => write!(f, "disconnect failed: {}", e),
        }
    }
}

impl std::error::Error for TransportError {}

/// Outbound half of the collector connection.
pub trait Transport: Send {
    fn connect(&mut self, timeout: Duration) -> Result<(), TransportError>;
    fn is_connected(&self) -> bool;
    fn emit(&mut self, event: &str, payload: Value) -> Result<(), TransportError>;
    fn disconnect(&mut self) -> Result<(), TransportError>;
}

/// Probe request sent by the collector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeRequest {
    pub host: String,
    pub port: i64,
    pub request_id: String,
}

/// Decoded inbound traffic.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    /// The underlying connection closed.
    Lost { reason: String },
    RegistrationConfirmed { socket_id: Option<String> },
    RegistrationRejected { error: String },
    ProbeRequested(ProbeRequest),
    /// Another connection took over this node name.
    ConnectionReplaced { message: String, new_socket_id: Option<String> },
    ServerError(String),
}

fn str_field(payload: &Value, key: &str) -> Option<String> {
    match payload.get(key)? {
        Value::String(s) => Some(s.clone()),
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

/// Ports arrive as numbers or numeric strings.
fn port_field(payload: &Value) -> Option<i64> {
    match payload.get("port")? {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Parses a probe request. Requests without a host or port are dropped.
pub fn parse_probe_request(payload: &Value) -> Option<ProbeRequest> {
    let host = str_field(payload, "host").filter(|h| !h.is_empty())?;
    let port = port_field(payload).filter(|p| *p != 0)?;
    let request_id = str_field(payload, "request_id").unwrap_or_else(|| "unknown".to_string());
    Some(ProbeRequest {
        host,
        port,
        request_id,
    })
}

/// Maps a named server event to an [`InboundEvent`].
pub fn decode_event(event: &str, payload: &Value) -> Option<InboundEvent> {
    match event {
        EVENT_REGISTRATION_SUCCESS => Some(InboundEvent::RegistrationConfirmed {
            socket_id: str_field(payload, "socket_id"),
        }),
        EVENT_REGISTRATION_FAILED => Some(InboundEvent::RegistrationRejected {
            error: str_field(payload, "error").unwrap_or_else(|| "unknown".to_string()),
        }),
        EVENT_PROBE_REQUEST => parse_probe_request(payload).map(InboundEvent::ProbeRequested),
        EVENT_CONNECTION_REPLACED => Some(InboundEvent::ConnectionReplaced {
            message: str_field(payload, "message").unwrap_or_default(),
            new_socket_id: str_field(payload, "new_socket_id"),
        }),
        EVENT_SERVER_ERROR => Some(InboundEvent::ServerError(match payload {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })),
        _ => None,
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RegisterPayload {
    pub node_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HeartbeatPayload {
    pub node_name: String,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
    pub version: String,
}

/// `tcping_result` body.
#[derive(Debug, Clone, Serialize)]
pub struct ProbeReply {
    #[serde(flatten)]
    pub result: ProbeResult,
    pub request_id: String,
    pub node_name: String,
    pub processing_time_ms: f64,
    pub timestamp: i64,
}

/// Milliseconds since the Unix epoch.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
