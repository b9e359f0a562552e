//! Conversation snapshots and reconnection
//!
//! # Snapshot lifecycle
//!
//! ```text
//! leg drops ──▶ save_state ──▶ [held up to TTL] ──▶ restore_conversation (take + replay)
//!                                     │
//!                                     └── expired: removed by load or the sweep
//! ```
//!
//! At most one snapshot exists per identity; saving again replaces it.
//! Restoring removes the snapshot before replaying, so a snapshot is replayed
//! at most once even if two restores race.

use std::collections::HashMap;
use std::fmt::Display;
use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::backoff::BackoffPolicy;
use super::state::{
    ConversationMessage, ConversationMode, ConversationState, PendingToolCall,
};
use crate::settings::ReconnectionSettings;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LoadStateError {
    #[error("no saved state for {0}")]
    NotFound(String),
    #[error("saved state for {0} expired")]
    Expired(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReconnectError {
    #[error("reconnection cancelled after {attempts} attempts")]
    Cancelled { attempts: u32 },
    #[error("failed to reconnect after {attempts} attempts: {last_error}")]
    Exhausted { attempts: u32, last_error: String },
    #[error("conversation state has no identity")]
    MissingIdentity,
}

/// One replayed piece of a snapshot, in replay order.
#[derive(Debug, Clone, PartialEq)]
pub enum RestoreItem {
    /// Always first: tells the receiver a restoration is starting.
    Notice {
        session_id: String,
        mode: ConversationMode,
    },
    ToolCall(PendingToolCall),
    Audio(Vec<u8>),
    /// Always last, only when there is context to restore.
    Context(Vec<ConversationMessage>),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RestoreReport {
    pub tool_calls: usize,
    pub audio_chunks: usize,
    pub context_messages: usize,
    /// Items whose delivery failed; the rest of the replay still ran.
    pub failures: usize,
}

struct StoredState {
    state: ConversationState,
    saved_at: Instant,
}

pub struct ReconnectionManager {
    states: Mutex<HashMap<String, StoredState>>,
    policy: BackoffPolicy,
    ttl: Duration,
    sweep_interval: Duration,
}

impl ReconnectionManager {
    pub fn new(policy: BackoffPolicy, ttl: Duration, sweep_interval: Duration) -> Self {
        Self {
            states: Mutex::new(HashMap::new()),
            policy,
            ttl,
            sweep_interval,
        }
    }

    pub fn from_settings(settings: &ReconnectionSettings) -> Self {
        Self::new(
            BackoffPolicy::from_settings(settings),
            Duration::from_secs(settings.state_ttl_secs),
            Duration::from_secs(settings.sweep_interval_secs),
        )
    }

    pub fn policy(&self) -> &BackoffPolicy {
        &self.policy
    }

    fn states(&self) -> std::sync::MutexGuard<'_, HashMap<String, StoredState>> {
        self.states.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn is_expired(&self, stored: &StoredState) -> bool {
        stored.saved_at.elapsed() > self.ttl
    }

    /// Store a snapshot, replacing any previous one for the same identity.
    pub fn save_state(&self, mut state: ConversationState) -> Result<(), ReconnectError> {
        if state.identity.trim().is_empty() {
            return Err(ReconnectError::MissingIdentity);
        }
        state.disconnected_at = Some(chrono::Utc::now());
        log::info!(
            "Reconnection: saved state for session {} ({} tool calls, {} messages, {} audio chunks)",
            state.session_id,
            state.pending_tool_calls.len(),
            state.conversation_context.len(),
            state.pending_audio.len()
        );
        let identity = state.identity.clone();
        self.states().insert(
            identity,
            StoredState {
                state,
                saved_at: Instant::now(),
            },
        );
        Ok(())
    }

    /// Read a snapshot without removing it.
    pub fn load_state(&self, identity: &str) -> Result<ConversationState, LoadStateError> {
        let mut states = self.states();
        match states.get(identity) {
            None => Err(LoadStateError::NotFound(identity.to_string())),
            Some(stored) if self.is_expired(stored) => {
                states.remove(identity);
                Err(LoadStateError::Expired(identity.to_string()))
            }
            Some(stored) => Ok(stored.state.clone()),
        }
    }

    /// Remove and return a live snapshot.
    pub fn take_state(&self, identity: &str) -> Result<ConversationState, LoadStateError> {
        let mut states = self.states();
        match states.remove(identity) {
            None => Err(LoadStateError::NotFound(identity.to_string())),
            Some(stored) if self.is_expired(&stored) => {
                Err(LoadStateError::Expired(identity.to_string()))
            }
            Some(stored) => Ok(stored.state),
        }
    }

    pub fn delete_state(&self, identity: &str) -> bool {
        self.states().remove(identity).is_some()
    }

    pub fn saved_states(&self) -> usize {
        self.states().len()
    }

    /// Drop every expired snapshot. Returns how many were removed.
    pub fn clean_expired_states(&self) -> usize {
        let mut states = self.states();
        let before = states.len();
        let ttl = self.ttl;
        states.retain(|_, stored| stored.saved_at.elapsed() <= ttl);
        let removed = before - states.len();
        if removed > 0 {
            log::info!("Reconnection: removed {} expired states", removed);
        }
        removed
    }

    /// Periodic expiry sweep; runs until `cancel` fires.
    pub async fn run_cleanup_scheduler(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.sweep_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick fires immediately.
        ticker.tick().await;

        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    log::debug!("Reconnection: cleanup scheduler stopped");
                    break;
                }

                _ = ticker.tick() => {
                    self.clean_expired_states();
                }
            }
        }
    }

    /// Record a tool call on an existing snapshot. Returns false if there is none.
    pub fn add_pending_tool_call(&self, identity: &str, call: PendingToolCall) -> bool {
        self.with_live_state(identity, |state| state.push_tool_call(call))
    }

    pub fn add_audio_chunk(&self, identity: &str, chunk: Vec<u8>) -> bool {
        self.with_live_state(identity, |state| state.push_audio(chunk))
    }

    pub fn add_conversation_message(&self, identity: &str, message: ConversationMessage) -> bool {
        self.with_live_state(identity, |state| state.push_message(message))
    }

    fn with_live_state<F>(&self, identity: &str, f: F) -> bool
    where
        F: FnOnce(&mut ConversationState),
    {
        let mut states = self.states();
        match states.get_mut(identity) {
            Some(stored) if stored.saved_at.elapsed() <= self.ttl => {
                f(&mut stored.state);
                true
            }
            _ => false,
        }
    }

    /// Run `connect` under the backoff policy until it and `on_connected` both succeed.
    ///
    /// A failing `on_connected` counts as a failed attempt. Cancellation is
    /// checked before each attempt and interrupts both the sleep and the
    /// attempt itself.
    pub async fn attempt_reconnection<C, T, E, F, FFut, G, GFut>(
        &self,
        identity: &str,
        max_attempts: u32,
        cancel: &CancellationToken,
        mut connect: F,
        mut on_connected: G,
    ) -> Result<T, ReconnectError>
    where
        F: FnMut(u32) -> FFut,
        FFut: Future<Output = Result<C, E>>,
        G: FnMut(C) -> GFut,
        GFut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let max_attempts = max_attempts.max(1);
        let mut last_error = String::from("no attempt made");

        for attempt in 1..=max_attempts {
            if cancel.is_cancelled() {
                return Err(ReconnectError::Cancelled {
                    attempts: attempt - 1,
                });
            }

            let delay = self.policy.delay_before(attempt);
            if !delay.is_zero() {
                log::info!(
                    "Reconnection: {} retrying in {:?} (attempt {}/{})",
                    identity,
                    delay,
                    attempt,
                    max_attempts
                );
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        return Err(ReconnectError::Cancelled { attempts: attempt - 1 });
                    }
                    _ = tokio::time::sleep(delay) => {}
                }
            }

            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return Err(ReconnectError::Cancelled { attempts: attempt });
                }
                outcome = async {
                    let conn = connect(attempt).await?;
                    on_connected(conn).await
                } => outcome,
            };

            match outcome {
                Ok(value) => {
                    log::info!(
                        "Reconnection: {} reconnected on attempt {}",
                        identity,
                        attempt
                    );
                    return Ok(value);
                }
                Err(e) => {
                    log::warn!(
                        "Reconnection: {} attempt {}/{} failed: {}",
                        identity,
                        attempt,
                        max_attempts,
                        e
                    );
                    last_error = e.to_string();
                }
            }
        }

        log::error!(
            "Reconnection: {} giving up after {} attempts",
            identity,
            max_attempts
        );
        Err(ReconnectError::Exhausted {
            attempts: max_attempts,
            last_error,
        })
    }

    /// Replay a snapshot through `send` and remove it.
    ///
    /// Order: notice, each pending tool call, each audio chunk, then the
    /// retained context. A failed item is logged and the replay continues.
    pub async fn restore_conversation<S, Fut, E>(
        &self,
        identity: &str,
        mut send: S,
    ) -> Result<RestoreReport, LoadStateError>
    where
        S: FnMut(RestoreItem) -> Fut,
        Fut: Future<Output = Result<(), E>>,
        E: Display,
    {
        let state = self.take_state(identity)?;
        let mut report = RestoreReport::default();

        log::info!(
            "Reconnection: restoring session {} for {}",
            state.session_id,
            identity
        );

        let mut deliver = |item: RestoreItem| {
            let kind = match &item {
                RestoreItem::Notice { .. } => "notice",
                RestoreItem::ToolCall(_) => "tool call",
                RestoreItem::Audio(_) => "audio",
                RestoreItem::Context(_) => "context",
            };
            let fut = send(item);
            async move {
                match fut.await {
                    Ok(()) => true,
                    Err(e) => {
                        log::warn!("Reconnection: failed to replay {}: {}", kind, e);
                        false
                    }
                }
            }
        };

        if !deliver(RestoreItem::Notice {
            session_id: state.session_id.clone(),
            mode: state.mode,
        })
        .await
        {
            report.failures += 1;
        }

        for call in state.pending_tool_calls {
            if deliver(RestoreItem::ToolCall(call)).await {
                report.tool_calls += 1;
            } else {
                report.failures += 1;
            }
        }

        for chunk in state.pending_audio {
            if deliver(RestoreItem::Audio(chunk)).await {
                report.audio_chunks += 1;
            } else {
                report.failures += 1;
            }
        }

        if !state.conversation_context.is_empty() {
            let messages: Vec<ConversationMessage> =
                state.conversation_context.into_iter().collect();
            let count = messages.len();
            if deliver(RestoreItem::Context(messages)).await {
                report.context_messages = count;
            } else {
                report.failures += 1;
            }
        }

        log::info!("Reconnection: restore for {} finished: {:?}", identity, report);
        Ok(report)
    }
}
