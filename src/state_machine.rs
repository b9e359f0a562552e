//! Session lifecycle state machine
//!
//! Every lifecycle change of a relay session goes through `reduce()`, which
//! returns the next state and the effects the session owner must run.
//! `Closed` is terminal: no event leaves it and no effect is produced from it.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Backend leg is being opened.
    #[default]
    Created,
    /// Audio and events flow in both directions.
    Active,
    /// Backend leg dropped; snapshot saved, recovery not started yet.
    Disconnected,
    /// Backoff loop is re-opening the backend leg.
    Reconnecting,
    Closed,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Created => "created",
            SessionState::Active => "active",
            SessionState::Disconnected => "disconnected",
            SessionState::Reconnecting => "reconnecting",
            SessionState::Closed => "closed",
        }
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, SessionState::Closed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    /// Backend acknowledged the session setup.
    BackendReady,
    /// Backend event stream ended without a hangup.
    BackendLost,
    ReconnectStarted,
    BackendRestored,
    ReconnectFailed,
    /// Client transport failed (read error, deadline, abrupt close).
    ClientLost,
    /// Explicit hangup or clean client close.
    Hangup,
    IdleTimeout,
    /// A newer session for the same identity took over.
    Replaced,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEffect {
    /// Send any buffered outbound audio to the client.
    FlushAudio,
    /// Persist a conversation snapshot for later restoration.
    SaveSnapshot,
    /// Replay the saved snapshot over the restored legs.
    ReplaySnapshot,
    /// Stop the session's pumps.
    CancelTasks,
    CloseBackend,
}

/// Reducer function: (state, event) -> (next_state, effects)
pub fn reduce(state: SessionState, event: SessionEvent) -> (SessionState, Vec<SessionEffect>) {
    use SessionEffect::*;
    use SessionEvent::*;
    use SessionState::*;

    match (state, event) {
        (Closed, _) => (Closed, vec![]),

        (Created, BackendReady) => (Active, vec![]),

        (Active, BackendLost) => (Disconnected, vec![SaveSnapshot]),
        (Disconnected, ReconnectStarted) => (Reconnecting, vec![]),
        (Reconnecting, BackendRestored) => (Active, vec![ReplaySnapshot]),
        (Reconnecting, ReconnectFailed) | (Disconnected, ReconnectFailed) => {
            (Closed, vec![CancelTasks, CloseBackend])
        }

        // The snapshot taken when the backend dropped already holds the buffered
        // audio; a second one would overwrite it with an empty buffer.
        (Disconnected, ClientLost) | (Reconnecting, ClientLost) => {
            (Closed, vec![CancelTasks, CloseBackend])
        }
        // The client is gone, so buffered audio goes into the snapshot instead of the wire.
        (_, ClientLost) => (Closed, vec![SaveSnapshot, CancelTasks, CloseBackend]),

        (_, Hangup) | (_, IdleTimeout) | (_, Replaced) => {
            (Closed, vec![FlushAudio, CancelTasks, CloseBackend])
        }

        (s, e) => {
            log::debug!("Session: ignoring {:?} in state {:?}", e, s);
            (s, vec![])
        }
    }
}
