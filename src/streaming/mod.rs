//! Realtime AI backend leg
//!
//! Each relay session owns one bidirectional connection to the backend.
//!
//! # Architecture
//!
//! ```text
//!                        ┌──────────────────────┐
//! client audio ────────▶ │  BackendLink (send)  │ ──▶ backend
//!                        └──────────────────────┘
//!                        ┌──────────────────────┐
//! backend ─────────────▶ │ reader task (demux)  │ ──▶ audio_rx  (PCM fragments, flush/clear markers)
//!                        └──────────────────────┘ ──▶ events_rx (transcripts, tool calls, ...)
//! ```
//!
//! Turn completion and interruption are reported on both channels: as an
//! event for transcript bookkeeping, and as an in-band [`AudioItem`] marker so
//! the flush or clear lands after exactly the audio that preceded it.
//!
//! The reader task ends when the backend closes or errors, which closes both
//! receivers. Session code treats a closed event receiver as a lost backend.

mod protocol;
mod realtime_client;
mod transcript_aggregator;

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;

pub use protocol::{ClientMessage, FunctionCall, FunctionResponse, ServerMessage};
pub use realtime_client::{RealtimeConnector, RealtimeLink};
pub use transcript_aggregator::{TranscriptAggregator, TurnTranscript};

/// Capacity of the demuxed audio and event channels.
pub const BACKEND_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, thiserror::Error)]
pub enum BackendError {
    #[error("backend API key not configured")]
    MissingApiKey,
    #[error("failed to connect to backend: {0}")]
    ConnectionFailed(String),
    #[error("backend setup failed: {0}")]
    SetupFailed(String),
    #[error("backend protocol error: {0}")]
    Protocol(String),
    #[error("backend disconnected: {0}")]
    Disconnected(String),
    #[error("failed to send to backend: {0}")]
    SendFailed(String),
}

/// Semantic events decoded from backend frames.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendEvent {
    SetupComplete,
    /// Transcription of what the subject said.
    InputTranscript(String),
    /// Transcription of what the assistant said.
    OutputTranscript(String),
    TurnComplete,
    /// The subject spoke over the assistant; queued assistant audio is stale.
    Interrupted,
    ToolCall(Vec<FunctionCall>),
}

/// One item on the audio channel.
#[derive(Debug, Clone, PartialEq)]
pub enum AudioItem {
    /// PCM16 fragment from the assistant.
    Pcm(Vec<u8>),
    /// The turn ended; release whatever is buffered.
    Flush,
    /// The subject spoke over the assistant; buffered audio is stale.
    Clear,
}

impl AudioItem {
    /// Marker an event places on the audio channel, after the audio it follows.
    pub fn marker_for(event: &BackendEvent) -> Option<Self> {
        match event {
            BackendEvent::TurnComplete => Some(Self::Flush),
            BackendEvent::Interrupted => Some(Self::Clear),
            _ => None,
        }
    }
}

/// What a session needs to open its backend leg.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSetup {
    pub instructions: String,
    pub voice_name: String,
}

/// Sending half of an open backend connection.
#[async_trait]
pub trait BackendLink: Send + Sync + 'static {
    /// Forward raw PCM16 microphone audio.
    async fn send_audio(&self, pcm: &[u8]) -> Result<(), BackendError>;
    /// Inject a complete text turn.
    async fn send_text(&self, text: &str) -> Result<(), BackendError>;
    async fn send_tool_response(&self, responses: Vec<FunctionResponse>)
        -> Result<(), BackendError>;
    /// Close the connection. Idempotent.
    async fn close(&self);
}

/// An open backend connection with its demuxed receive channels.
pub struct BackendConnection {
    pub link: Arc<dyn BackendLink>,
    pub audio_rx: mpsc::Receiver<AudioItem>,
    pub events_rx: mpsc::Receiver<BackendEvent>,
}

impl std::fmt::Debug for BackendConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendConnection").finish_non_exhaustive()
    }
}

/// Opens backend connections. Returns only after the setup handshake succeeded.
#[async_trait]
pub trait BackendConnector: Send + Sync + 'static {
    async fn connect(&self, setup: &SessionSetup) -> Result<BackendConnection, BackendError>;
}

/// Human-readable meaning of a WebSocket close code, for logs.
pub fn describe_close_code(code: u16) -> &'static str {
    match code {
        1000 => "normal closure",
        1001 => "going away",
        1002 => "protocol error",
        1003 => "unsupported data",
        1005 => "no status received",
        1006 => "abnormal closure",
        1007 => "invalid payload",
        1008 => "policy violation (check API key and model access)",
        1009 => "message too big",
        1011 => "internal server error",
        1012 => "service restart",
        1013 => "try again later",
        _ => "unknown close code",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_error_display() {
        let err = BackendError::ConnectionFailed("timeout".to_string());
        assert!(err.to_string().contains("timeout"));
        assert!(BackendError::MissingApiKey.to_string().contains("API key"));
    }

    #[test]
    fn test_audio_markers() {
        assert_eq!(
            AudioItem::marker_for(&BackendEvent::TurnComplete),
            Some(AudioItem::Flush)
        );
        assert_eq!(
            AudioItem::marker_for(&BackendEvent::Interrupted),
            Some(AudioItem::Clear)
        );
        assert_eq!(
            AudioItem::marker_for(&BackendEvent::OutputTranscript("hi".into())),
            None
        );
    }

    #[test]
    fn test_describe_close_code() {
        assert_eq!(describe_close_code(1000), "normal closure");
        assert!(describe_close_code(1008).contains("policy"));
        assert_eq!(describe_close_code(4999), "unknown close code");
    }
}
