//! Client-facing signaling and session relay
//!
//! # Architecture
//!
//! ```text
//!  client ws ──▶ read loop ──┬─ text ──▶ ControlMessage ──▶ handlers
//!                            └─ binary ─▶ Session inbound queue ──▶ backend
//!
//!  backend ──▶ audio pump ──▶ RelayBuffer ──▶ ClientHandle ──▶ writer task ──▶ client ws
//!          │   (PCM, plus flush on turn end and clear on barge-in)
//!          └─▶ event pump ──▶ transcripts / tools / recovery
//! ```
//!
//! `SessionRegistry` keeps at most one live session per identity.
//! `ClientRegistry` maps registered identities to connections for peer
//! signaling relay.

mod client;
mod protocol;
mod registry;
mod server;
mod session;

pub use client::{ClientHandle, OutboundFrame};
pub use protocol::{ControlMessage, Diagnostics, ProtocolError};
pub use registry::{ClientRegistry, SessionRegistry};
pub use server::{RelayDeps, RelayServer};
pub use session::{Session, SessionParams};
