//! Client control protocol
//!
//! Text frames on the client socket carry one JSON object with a `type`
//! discriminator. Binary frames are raw audio and never pass through here.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::metrics::MetricsSummary;
use crate::reconnection::ConversationMessage;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProtocolError {
    #[error("malformed message: {0}")]
    Malformed(String),
    #[error("unknown message type: {0}")]
    UnknownType(String),
    #[error("message type {0} is not accepted from clients")]
    Unexpected(&'static str),
}

/// Every control message, in both directions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlMessage {
    // client -> relay
    Register {
        identity: String,
    },
    StartCall {
        #[serde(default)]
        identity: Option<String>,
        #[serde(default)]
        session_id: Option<String>,
    },
    Hangup {
        #[serde(default)]
        session_id: Option<String>,
    },
    Ping,
    AcknowledgeAlert {
        alert_id: String,
        #[serde(default)]
        acknowledged_by: Option<String>,
    },
    GetDiagnostics,

    // both directions
    /// Peer-to-peer signaling payload relayed verbatim to `target_identity`.
    WebrtcSignal {
        #[serde(default)]
        identity: Option<String>,
        target_identity: String,
        #[serde(default)]
        payload: Value,
    },

    // relay -> client
    Registered {
        success: bool,
    },
    SessionCreated {
        session_id: String,
        success: bool,
    },
    Pong,
    Error {
        error: String,
        #[serde(default)]
        success: bool,
    },
    /// Queued assistant audio on the client is stale and must be dropped.
    ClearBuffer,
    AlertAcknowledged {
        alert_id: String,
        success: bool,
    },
    ReconnectionRestored {
        session_id: String,
        mode: String,
    },
    RetryToolCall {
        tool_name: String,
        args: Value,
    },
    RestoreContext {
        context: Vec<ConversationMessage>,
    },
    Diagnostics {
        data: Diagnostics,
    },
}

/// Runtime state reported by `get_diagnostics`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Diagnostics {
    pub active_sessions: usize,
    pub registered_clients: usize,
    pub saved_states: usize,
    pub active_alerts: usize,
    pub channels: Vec<String>,
    pub tools: Vec<String>,
    pub metrics: MetricsSummary,
}

const KNOWN_TYPES: &[&str] = &[
    "register",
    "start_call",
    "hangup",
    "ping",
    "acknowledge_alert",
    "get_diagnostics",
    "webrtc_signal",
    "registered",
    "session_created",
    "pong",
    "error",
    "clear_buffer",
    "alert_acknowledged",
    "reconnection_restored",
    "retry_tool_call",
    "restore_context",
    "diagnostics",
];

impl ControlMessage {
    /// Parse a text frame. Unknown types and bad shapes are distinct errors.
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let value: Value =
            serde_json::from_str(text).map_err(|e| ProtocolError::Malformed(e.to_string()))?;
        let kind = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| ProtocolError::Malformed("missing type".to_string()))?;
        if !KNOWN_TYPES.contains(&kind) {
            return Err(ProtocolError::UnknownType(kind.to_string()));
        }
        serde_json::from_value(value).map_err(|e| ProtocolError::Malformed(e.to_string()))
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn error(message: impl Into<String>) -> Self {
        ControlMessage::Error {
            error: message.into(),
            success: false,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            ControlMessage::Register { .. } => "register",
            ControlMessage::StartCall { .. } => "start_call",
            ControlMessage::Hangup { .. } => "hangup",
            ControlMessage::Ping => "ping",
            ControlMessage::AcknowledgeAlert { .. } => "acknowledge_alert",
            ControlMessage::GetDiagnostics => "get_diagnostics",
            ControlMessage::WebrtcSignal { .. } => "webrtc_signal",
            ControlMessage::Registered { .. } => "registered",
            ControlMessage::SessionCreated { .. } => "session_created",
            ControlMessage::Pong => "pong",
            ControlMessage::Error { .. } => "error",
            ControlMessage::ClearBuffer => "clear_buffer",
            ControlMessage::AlertAcknowledged { .. } => "alert_acknowledged",
            ControlMessage::ReconnectionRestored { .. } => "reconnection_restored",
            ControlMessage::RetryToolCall { .. } => "retry_tool_call",
            ControlMessage::RestoreContext { .. } => "restore_context",
            ControlMessage::Diagnostics { .. } => "diagnostics",
        }
    }
}
