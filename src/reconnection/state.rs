use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::VecDeque;

/// Most recent conversation messages kept in a snapshot.
pub const MAX_CONTEXT_MESSAGES: usize = 20;

/// Undelivered audio chunks kept in a snapshot.
pub const MAX_PENDING_AUDIO_CHUNKS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationMode {
    #[default]
    Audio,
    Video,
}

impl ConversationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConversationMode::Audio => "audio",
            ConversationMode::Video => "video",
        }
    }
}

/// A tool call the backend requested that has not been answered yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingToolCall {
    /// Backend call id, used to match the eventual response.
    #[serde(default)]
    pub call_id: String,
    pub tool_name: String,
    pub args: Value,
    pub requested_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationMessage {
    /// "user" or "assistant"
    pub role: String,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

impl ConversationMessage {
    pub fn new(role: &str, text: impl Into<String>) -> Self {
        Self {
            role: role.to_string(),
            text: text.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Snapshot of a session taken when one of its legs dropped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationState {
    pub identity: String,
    pub session_id: String,
    pub mode: ConversationMode,
    pub pending_tool_calls: Vec<PendingToolCall>,
    /// Oldest first, at most `MAX_CONTEXT_MESSAGES`.
    pub conversation_context: VecDeque<ConversationMessage>,
    /// Outbound audio that never reached the client, oldest first.
    #[serde(skip)]
    pub pending_audio: VecDeque<Vec<u8>>,
    pub disconnected_at: Option<DateTime<Utc>>,
}

impl ConversationState {
    pub fn new(identity: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            session_id: session_id.into(),
            mode: ConversationMode::default(),
            pending_tool_calls: Vec::new(),
            conversation_context: VecDeque::new(),
            pending_audio: VecDeque::new(),
            disconnected_at: None,
        }
    }

    pub fn push_tool_call(&mut self, call: PendingToolCall) {
        self.pending_tool_calls.push(call);
    }

    /// Append a message, dropping the oldest beyond the cap.
    pub fn push_message(&mut self, message: ConversationMessage) {
        self.conversation_context.push_back(message);
        while self.conversation_context.len() > MAX_CONTEXT_MESSAGES {
            self.conversation_context.pop_front();
        }
    }

    /// Append an audio chunk, dropping the oldest beyond the cap.
    pub fn push_audio(&mut self, chunk: Vec<u8>) {
        if chunk.is_empty() {
            return;
        }
        self.pending_audio.push_back(chunk);
        while self.pending_audio.len() > MAX_PENDING_AUDIO_CHUNKS {
            self.pending_audio.pop_front();
        }
    }

    /// Render the retained context as plain text for re-priming the backend.
    pub fn context_transcript(&self) -> String {
        render_transcript(self.conversation_context.iter())
    }
}

/// One `role: text` line per message.
pub fn render_transcript<'a>(
    messages: impl IntoIterator<Item = &'a ConversationMessage>,
) -> String {
    messages
        .into_iter()
        .map(|m| format!("{}: {}", m.role, m.text))
        .collect::<Vec<_>>()
        .join("\n")
}
