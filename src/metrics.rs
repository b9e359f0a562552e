//! Runtime counters for the relay
//!
//! Counters are lock-free atomics; the error history is a small bounded
//! deque behind a mutex. Reported to clients through `get_diagnostics`.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

/// Maximum number of errors to retain in history
const MAX_ERROR_HISTORY: usize = 20;

/// Record of an error that occurred during operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    /// Unix timestamp when error occurred (seconds)
    pub timestamp: u64,
    /// Category of error (e.g., "backend", "client", "tool", "escalation")
    pub error_type: String,
    /// Human-readable error message
    pub message: String,
    /// Associated session ID, if applicable
    pub session_id: Option<String>,
}

/// Point-in-time copy of all counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsSummary {
    pub connections_accepted: u64,
    pub sessions_started: u64,
    pub sessions_closed: u64,
    pub backend_reconnects: u64,
    pub reconnect_failures: u64,
    pub client_restores: u64,
    pub audio_frames_in: u64,
    pub audio_frames_out: u64,
    pub audio_bytes_out: u64,
    pub tool_calls: u64,
    pub alerts_started: u64,
    pub alerts_acknowledged: u64,
    pub total_errors: u64,
    /// Most recent error, if any
    pub last_error: Option<ErrorRecord>,
}

#[derive(Debug, Default)]
pub struct RelayMetrics {
    connections_accepted: AtomicU64,
    sessions_started: AtomicU64,
    sessions_closed: AtomicU64,
    backend_reconnects: AtomicU64,
    reconnect_failures: AtomicU64,
    client_restores: AtomicU64,
    audio_frames_in: AtomicU64,
    audio_frames_out: AtomicU64,
    audio_bytes_out: AtomicU64,
    tool_calls: AtomicU64,
    alerts_started: AtomicU64,
    alerts_acknowledged: AtomicU64,
    total_errors: AtomicU64,
    /// History of errors (newest first)
    errors: Mutex<VecDeque<ErrorRecord>>,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

impl RelayMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connection_accepted(&self) {
        bump(&self.connections_accepted);
    }

    pub fn session_started(&self) {
        bump(&self.sessions_started);
    }

    pub fn session_closed(&self) {
        bump(&self.sessions_closed);
    }

    pub fn backend_reconnected(&self) {
        bump(&self.backend_reconnects);
    }

    pub fn reconnect_failed(&self) {
        bump(&self.reconnect_failures);
    }

    pub fn client_restored(&self) {
        bump(&self.client_restores);
    }

    pub fn audio_in(&self) {
        bump(&self.audio_frames_in);
    }

    pub fn audio_out(&self, bytes: usize) {
        bump(&self.audio_frames_out);
        self.audio_bytes_out
            .fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn tool_called(&self) {
        bump(&self.tool_calls);
    }

    pub fn alert_started(&self) {
        bump(&self.alerts_started);
    }

    pub fn alert_acknowledged(&self) {
        bump(&self.alerts_acknowledged);
    }

    /// Record an error (not necessarily tied to a session)
    pub fn record_error(&self, error_type: &str, message: String, session_id: Option<String>) {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();

        let error = ErrorRecord {
            timestamp: now,
            error_type: error_type.to_string(),
            message,
            session_id,
        };

        log::debug!("Metrics: recording error - {:?}", error);
        bump(&self.total_errors);

        let Ok(mut errors) = self.errors.lock() else {
            return;
        };
        // Add to front (newest first)
        errors.push_front(error);
        while errors.len() > MAX_ERROR_HISTORY {
            errors.pop_back();
        }
    }

    /// Get the error history (newest first)
    pub fn get_errors(&self) -> Vec<ErrorRecord> {
        self.errors
            .lock()
            .map(|e| e.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn get_summary(&self) -> MetricsSummary {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        MetricsSummary {
            connections_accepted: load(&self.connections_accepted),
            sessions_started: load(&self.sessions_started),
            sessions_closed: load(&self.sessions_closed),
            backend_reconnects: load(&self.backend_reconnects),
            reconnect_failures: load(&self.reconnect_failures),
            client_restores: load(&self.client_restores),
            audio_frames_in: load(&self.audio_frames_in),
            audio_frames_out: load(&self.audio_frames_out),
            audio_bytes_out: load(&self.audio_bytes_out),
            tool_calls: load(&self.tool_calls),
            alerts_started: load(&self.alerts_started),
            alerts_acknowledged: load(&self.alerts_acknowledged),
            total_errors: load(&self.total_errors),
            last_error: self.errors.lock().ok().and_then(|e| e.front().cloned()),
        }
    }
}
