//! Session recovery
//!
//! When either leg of a session drops, a snapshot of the conversation is
//! kept for a short time so the session can pick up where it left off:
//! the backend leg is re-opened under exponential backoff, and a client that
//! comes back with the same identity gets the snapshot replayed.

mod backoff;
mod manager;
mod state;

pub use backoff::BackoffPolicy;
pub use manager::{
    LoadStateError, ReconnectError, ReconnectionManager, RestoreItem, RestoreReport,
};
pub use state::{
    render_transcript, ConversationMessage, ConversationMode, ConversationState, PendingToolCall,
    MAX_CONTEXT_MESSAGES, MAX_PENDING_AUDIO_CHUNKS,
};
