//! One relayed conversation
//!
//! A session ties a client connection to a backend connection. It owns the
//! outbound audio buffer, the turn transcript, unanswered tool calls and the
//! lifecycle state. Each piece sits behind its own lock and no method holds
//! two of them at once.

use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::client::ClientHandle;
use super::protocol::ControlMessage;
use crate::audio::{pcm16_to_f32le, RelayBuffer};
use crate::directory::Subject;
use crate::metrics::RelayMetrics;
use crate::reconnection::{
    ConversationMessage, ConversationMode, ConversationState, PendingToolCall,
    MAX_CONTEXT_MESSAGES,
};
use crate::settings::{AudioSettings, OutputFormat};
use crate::state_machine::{reduce, SessionEffect, SessionEvent, SessionState};
use crate::streaming::{BackendError, BackendLink, SessionSetup, TurnTranscript};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

struct SessionInner {
    state: SessionState,
    last_activity: Instant,
    /// Text injected into the backend ahead of the next client audio frame.
    pending_insight: Option<String>,
    pending_tool_calls: Vec<PendingToolCall>,
    recent_messages: VecDeque<ConversationMessage>,
    transcript: TurnTranscript,
}

pub struct SessionParams {
    pub session_id: String,
    pub subject: Subject,
    pub mode: ConversationMode,
    pub setup: SessionSetup,
    pub client: ClientHandle,
    pub link: Arc<dyn BackendLink>,
    pub audio: AudioSettings,
    pub metrics: Arc<RelayMetrics>,
}

pub struct Session {
    id: String,
    subject: Subject,
    mode: ConversationMode,
    setup: SessionSetup,
    created_at: DateTime<Utc>,
    output_format: OutputFormat,
    client: ClientHandle,
    backend: RwLock<Arc<dyn BackendLink>>,
    inner: Mutex<SessionInner>,
    audio: Mutex<RelayBuffer>,
    inbound_tx: mpsc::Sender<Vec<u8>>,
    cancel: CancellationToken,
    metrics: Arc<RelayMetrics>,
}

impl Session {
    /// Create a session. The returned receiver carries client audio for the forwarder task.
    pub fn new(params: SessionParams) -> (Arc<Self>, mpsc::Receiver<Vec<u8>>) {
        let (inbound_tx, inbound_rx) = mpsc::channel(params.audio.inbound_queue_frames.max(1));
        let session = Arc::new(Self {
            id: params.session_id,
            subject: params.subject,
            mode: params.mode,
            setup: params.setup,
            created_at: Utc::now(),
            output_format: params.audio.output_format,
            client: params.client,
            backend: RwLock::new(params.link),
            inner: Mutex::new(SessionInner {
                state: SessionState::Created,
                last_activity: Instant::now(),
                pending_insight: None,
                pending_tool_calls: Vec::new(),
                recent_messages: VecDeque::new(),
                transcript: TurnTranscript::default(),
            }),
            audio: Mutex::new(RelayBuffer::new(params.audio.min_flush_bytes)),
            inbound_tx,
            cancel: CancellationToken::new(),
            metrics: params.metrics,
        });
        (session, inbound_rx)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn identity(&self) -> &str {
        &self.subject.identity
    }

    pub fn subject(&self) -> &Subject {
        &self.subject
    }

    pub fn mode(&self) -> ConversationMode {
        self.mode
    }

    pub fn setup(&self) -> &SessionSetup {
        &self.setup
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn client(&self) -> &ClientHandle {
        &self.client
    }

    /// Cancelled when the session closes; pumps select on it.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn state(&self) -> SessionState {
        lock(&self.inner).state
    }

    pub fn is_closed(&self) -> bool {
        self.state().is_closed()
    }

    pub fn send_control(&self, msg: ControlMessage) -> bool {
        self.client.send_control(msg)
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Apply a lifecycle event and run the effects the session owns.
    ///
    /// Returns all effects so the caller can run the ones it owns
    /// (`SaveSnapshot`, `ReplaySnapshot`).
    pub fn transition(&self, event: SessionEvent) -> Vec<SessionEffect> {
        let (from, to, effects) = {
            let mut inner = lock(&self.inner);
            let from = inner.state;
            let (to, effects) = reduce(from, event);
            inner.state = to;
            (from, to, effects)
        };

        if from != to {
            log::info!(
                "Session {}: {} -> {} ({:?})",
                self.id,
                from.as_str(),
                to.as_str(),
                event
            );
        }

        for effect in &effects {
            match effect {
                SessionEffect::FlushAudio => {
                    self.flush_audio();
                }
                SessionEffect::CancelTasks => self.cancel.cancel(),
                SessionEffect::CloseBackend => {
                    let link = self.backend();
                    tokio::spawn(async move { link.close().await });
                }
                SessionEffect::SaveSnapshot | SessionEffect::ReplaySnapshot => {}
            }
        }
        if to.is_closed() && !from.is_closed() {
            self.metrics.session_closed();
        }
        effects
    }

    pub fn touch(&self) {
        lock(&self.inner).last_activity = Instant::now();
    }

    pub fn idle_for(&self) -> Duration {
        lock(&self.inner).last_activity.elapsed()
    }

    // ------------------------------------------------------------------
    // Backend leg
    // ------------------------------------------------------------------

    pub fn backend(&self) -> Arc<dyn BackendLink> {
        self.backend
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Swap in a freshly connected backend link. The old one is closed.
    pub fn replace_backend(&self, link: Arc<dyn BackendLink>) {
        let old = {
            let mut guard = self.backend.write().unwrap_or_else(PoisonError::into_inner);
            std::mem::replace(&mut *guard, link)
        };
        tokio::spawn(async move { old.close().await });
    }

    /// Queue client audio for the forwarder. Never waits; a full queue drops the frame.
    pub fn queue_client_audio(&self, pcm: Vec<u8>) -> bool {
        self.touch();
        self.metrics.audio_in();
        match self.inbound_tx.try_send(pcm) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                log::warn!("Session {}: inbound audio queue full, dropping frame", self.id);
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// Forward one client frame, preceded by the pending insight if there is one.
    pub async fn forward_to_backend(&self, pcm: &[u8]) -> Result<(), BackendError> {
        let insight = lock(&self.inner).pending_insight.take();
        let link = self.backend();
        if let Some(text) = insight {
            log::debug!("Session {}: injecting pending insight", self.id);
            link.send_text(&text).await?;
        }
        link.send_audio(pcm).await
    }

    /// Replace the text injected before the next client audio frame.
    pub fn set_pending_insight(&self, text: impl Into<String>) {
        lock(&self.inner).pending_insight = Some(text.into());
    }

    pub fn has_pending_insight(&self) -> bool {
        lock(&self.inner).pending_insight.is_some()
    }

    // ------------------------------------------------------------------
    // Outbound audio
    // ------------------------------------------------------------------

    /// Add backend audio to the outbound buffer; writes a frame once the threshold is reached.
    pub fn relay_backend_audio(&self, fragment: &[u8]) {
        let mut buffer = lock(&self.audio);
        if let Some(frame) = buffer.append(fragment) {
            // Still under the buffer lock so frames leave in order.
            self.deliver(frame);
        }
    }

    /// Send whatever is buffered. Returns the number of bytes sent.
    pub fn flush_audio(&self) -> usize {
        let mut buffer = lock(&self.audio);
        match buffer.flush() {
            Some(frame) => {
                let len = frame.len();
                self.deliver(frame);
                len
            }
            None => 0,
        }
    }

    /// Barge-in on the audio side: drop buffered audio and tell the client to stop playing.
    pub fn clear_outbound_audio(&self) {
        let dropped = lock(&self.audio).clear();
        log::debug!("Session {}: barge-in, dropped {} bytes", self.id, dropped);
        self.client.send_control(ControlMessage::ClearBuffer);
    }

    /// Send replayed audio straight to the client, bypassing the buffer.
    pub fn replay_audio(&self, chunk: Vec<u8>) {
        self.flush_audio();
        let _guard = lock(&self.audio);
        self.deliver(chunk);
    }

    fn deliver(&self, frame: Vec<u8>) {
        let frame = match self.output_format {
            OutputFormat::Pcm16 => frame,
            OutputFormat::Float32le => pcm16_to_f32le(&frame),
        };
        self.metrics.audio_out(frame.len());
        self.client.send_audio(frame);
    }

    // ------------------------------------------------------------------
    // Conversation bookkeeping
    // ------------------------------------------------------------------

    pub fn push_user_transcript(&self, fragment: &str) {
        lock(&self.inner).transcript.push_user(fragment);
    }

    pub fn push_assistant_transcript(&self, fragment: &str) {
        lock(&self.inner).transcript.push_assistant(fragment);
    }

    /// Close the current turn and move its transcript into the recent messages.
    pub fn complete_turn(&self) {
        let lines = lock(&self.inner).transcript.complete();
        self.record_lines(lines);
    }

    /// The turn was cut short; keep what was said up to the interruption.
    pub fn interrupt_turn(&self) {
        let lines = lock(&self.inner).transcript.interrupt();
        self.record_lines(lines);
    }

    fn record_lines(&self, lines: Vec<(&'static str, String)>) {
        if lines.is_empty() {
            return;
        }
        let mut inner = lock(&self.inner);
        for (role, text) in lines {
            inner
                .recent_messages
                .push_back(ConversationMessage::new(role, text));
        }
        while inner.recent_messages.len() > MAX_CONTEXT_MESSAGES {
            inner.recent_messages.pop_front();
        }
    }

    /// Put restored messages ahead of anything recorded since. Only for a
    /// session other than the one that was snapshotted.
    pub fn seed_context(&self, messages: Vec<ConversationMessage>) {
        let mut inner = lock(&self.inner);
        let newer: Vec<ConversationMessage> = inner.recent_messages.drain(..).collect();
        inner.recent_messages.extend(messages);
        inner.recent_messages.extend(newer);
        while inner.recent_messages.len() > MAX_CONTEXT_MESSAGES {
            inner.recent_messages.pop_front();
        }
    }

    pub fn recent_messages(&self) -> Vec<ConversationMessage> {
        lock(&self.inner).recent_messages.iter().cloned().collect()
    }

    pub fn record_tool_call(&self, call_id: &str, tool_name: &str, args: serde_json::Value) {
        lock(&self.inner).pending_tool_calls.push(PendingToolCall {
            call_id: call_id.to_string(),
            tool_name: tool_name.to_string(),
            args,
            requested_at: Utc::now(),
        });
    }

    /// The backend received the response for `call_id`.
    pub fn resolve_tool_call(&self, call_id: &str) {
        lock(&self.inner)
            .pending_tool_calls
            .retain(|c| c.call_id != call_id);
    }

    pub fn pending_tool_calls(&self) -> Vec<PendingToolCall> {
        lock(&self.inner).pending_tool_calls.clone()
    }

    /// Capture everything needed to resume this conversation.
    ///
    /// Buffered outbound audio moves into the snapshot instead of the wire.
    pub fn snapshot(&self) -> ConversationState {
        let mut state = ConversationState::new(self.identity(), self.id.clone());
        state.mode = self.mode;
        {
            let inner = lock(&self.inner);
            state.pending_tool_calls = inner.pending_tool_calls.clone();
            for message in inner.recent_messages.iter().cloned() {
                state.push_message(message);
            }
        }
        if let Some(remainder) = lock(&self.audio).flush() {
            state.push_audio(remainder);
        }
        state
    }
}
