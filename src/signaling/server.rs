//! Client-facing WebSocket server
//!
//! One task per connection reads frames under a rolling deadline. Text frames
//! are control messages; binary frames are microphone audio for the
//! connection's session. A writer task owns the sending half of the socket and
//! drains the connection's `ClientHandle` queue.
//!
//! Each session additionally runs three tasks, all stopped by the session's
//! cancellation token:
//!
//! - forwarder: client audio queue -> backend
//! - audio pump: backend audio -> relay buffer -> client, flushing at turn
//!   end and clearing on barge-in in step with the audio
//! - event pump: transcripts and tool calls; starts recovery when the backend
//!   leg drops

use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::client::{ClientHandle, OutboundFrame};
use super::protocol::{ControlMessage, Diagnostics, ProtocolError};
use super::registry::{ClientRegistry, SessionRegistry};
use super::session::{Session, SessionParams};
use crate::directory::{Directory, Subject};
use crate::escalation::EscalationService;
use crate::instructions::InstructionProvider;
use crate::metrics::RelayMetrics;
use crate::reconnection::{
    render_transcript, ConversationMode, ReconnectError, ReconnectionManager, RestoreItem,
    RestoreReport,
};
use crate::settings::{AudioSettings, SessionSettings, Settings};
use crate::state_machine::{SessionEffect, SessionEvent};
use crate::streaming::{
    describe_close_code, AudioItem, BackendConnection, BackendConnector, BackendError,
    BackendEvent, FunctionCall, FunctionResponse, SessionSetup,
};
use crate::tools::{response_body, ToolContext, ToolRegistry};

#[derive(Debug, thiserror::Error)]
enum ReplayError {
    #[error("client connection is gone")]
    ClientGone,
    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// Which session a snapshot is replayed into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReplayTarget {
    /// The session that was snapshotted, after its backend came back. Its
    /// recent messages are still current.
    SameSession,
    /// A fresh session for the identity, after the client reconnected.
    NewSession,
}

/// Shared services the server routes to.
pub struct RelayDeps {
    pub directory: Arc<dyn Directory>,
    pub connector: Arc<dyn BackendConnector>,
    pub instructions: Arc<dyn InstructionProvider>,
    pub tools: Arc<ToolRegistry>,
    pub escalation: Arc<EscalationService>,
    pub reconnection: Arc<ReconnectionManager>,
    pub metrics: Arc<RelayMetrics>,
}

pub struct RelayServer {
    directory: Arc<dyn Directory>,
    connector: Arc<dyn BackendConnector>,
    instructions: Arc<dyn InstructionProvider>,
    tools: Arc<ToolRegistry>,
    escalation: Arc<EscalationService>,
    reconnection: Arc<ReconnectionManager>,
    metrics: Arc<RelayMetrics>,
    sessions: SessionRegistry,
    clients: ClientRegistry,
    audio: AudioSettings,
    session_settings: SessionSettings,
    default_voice: String,
    shutdown: CancellationToken,
}

/// How a connection's read loop ended.
enum ConnectionExit {
    /// Close frame from the client.
    Closed,
    /// Read error, deadline or a stream that ended without a close frame.
    Failed(String),
    Shutdown,
}

/// Per-connection state owned by the read loop.
struct Connection {
    peer: SocketAddr,
    client: ClientHandle,
    /// Set by a successful `register`.
    identity: Option<String>,
    session: Option<Arc<Session>>,
}

impl RelayServer {
    pub fn new(deps: RelayDeps, settings: &Settings, shutdown: CancellationToken) -> Arc<Self> {
        Arc::new(Self {
            directory: deps.directory,
            connector: deps.connector,
            instructions: deps.instructions,
            tools: deps.tools,
            escalation: deps.escalation,
            reconnection: deps.reconnection,
            metrics: deps.metrics,
            sessions: SessionRegistry::new(),
            clients: ClientRegistry::new(),
            audio: settings.audio.clone(),
            session_settings: settings.session.clone(),
            default_voice: settings.backend.voice_name.clone(),
            shutdown,
        })
    }

    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    pub fn clients(&self) -> &ClientRegistry {
        &self.clients
    }

    /// Accept connections until shutdown, then close every session.
    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> std::io::Result<()> {
        log::info!("Signaling: listening on {}", listener.local_addr()?);
        self.spawn_background_tasks();

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.cancelled() => {
                    log::info!("Signaling: shutting down");
                    break;
                }

                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let server = self.clone();
                        tokio::spawn(async move { server.handle_connection(stream, peer).await });
                    }
                    Err(e) => log::warn!("Signaling: accept failed: {}", e),
                },
            }
        }

        for session in self.sessions.sessions() {
            self.end_session(&session, SessionEvent::Hangup);
        }
        Ok(())
    }

    fn spawn_background_tasks(self: &Arc<Self>) {
        let reconnection = self.reconnection.clone();
        let cancel = self.shutdown.child_token();
        tokio::spawn(async move { reconnection.run_cleanup_scheduler(cancel).await });

        let server = self.clone();
        tokio::spawn(async move { server.run_idle_sweeper().await });
    }

    async fn run_idle_sweeper(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.session_settings.idle_sweep_interval());
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    self.sweep_idle();
                }
            }
        }
    }

    /// Close sessions idle longer than the configured limit. Returns how many.
    pub fn sweep_idle(&self) -> usize {
        let limit = self.session_settings.idle_timeout();
        let mut closed = 0;
        for session in self.sessions.sessions() {
            let idle = session.idle_for();
            if idle > limit {
                log::info!(
                    "Signaling: closing idle session {} ({}s without activity)",
                    session.id(),
                    idle.as_secs()
                );
                self.end_session(&session, SessionEvent::IdleTimeout);
                closed += 1;
            }
        }
        closed
    }

    pub fn diagnostics(&self) -> Diagnostics {
        Diagnostics {
            active_sessions: self.sessions.len(),
            registered_clients: self.clients.len(),
            saved_states: self.reconnection.saved_states(),
            active_alerts: self.escalation.active_alerts().len(),
            channels: self
                .escalation
                .configured_channels()
                .iter()
                .map(|c| c.as_str().to_string())
                .collect(),
            tools: self.tools.names(),
            metrics: self.metrics.get_summary(),
        }
    }

    /// Queue an instruction override for the identity's live session.
    ///
    /// It is sent to the backend as a text turn right before the next client
    /// audio frame. Returns false if the identity has no live session.
    pub fn set_pending_insight(&self, identity: &str, text: impl Into<String>) -> bool {
        match self.sessions.get(identity) {
            Some(session) if !session.is_closed() => {
                session.set_pending_insight(text);
                true
            }
            _ => false,
        }
    }

    // ------------------------------------------------------------------
    // Connection loop
    // ------------------------------------------------------------------

    async fn handle_connection(self: Arc<Self>, stream: TcpStream, peer: SocketAddr) {
        let ws = match tokio_tungstenite::accept_async(stream).await {
            Ok(ws) => ws,
            Err(e) => {
                log::warn!("Signaling: handshake with {} failed: {}", peer, e);
                return;
            }
        };
        self.metrics.connection_accepted();
        log::info!("Signaling: client connected from {}", peer);

        let (mut sink, mut stream) = ws.split();
        let (client, mut outbound) = ClientHandle::channel();

        let writer = tokio::spawn(async move {
            while let Some(frame) = outbound.recv().await {
                let msg = match frame {
                    OutboundFrame::Control(msg) => match msg.to_json() {
                        Ok(text) => Message::Text(text),
                        Err(e) => {
                            log::warn!("Signaling: failed to encode {}: {}", msg.type_name(), e);
                            continue;
                        }
                    },
                    OutboundFrame::Audio(bytes) => Message::Binary(bytes),
                    OutboundFrame::Close => break,
                };
                if let Err(e) = sink.send(msg).await {
                    log::debug!("Signaling: write to {} failed: {}", peer, e);
                    break;
                }
            }
            let _ = sink.close().await;
        });

        let mut conn = Connection {
            peer,
            client: client.clone(),
            identity: None,
            session: None,
        };
        let deadline = self.session_settings.read_deadline();

        let exit = loop {
            let next = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break ConnectionExit::Shutdown,
                next = tokio::time::timeout(deadline, stream.next()) => next,
            };

            let msg = match next {
                Err(_) => break ConnectionExit::Failed("read deadline exceeded".to_string()),
                Ok(None) => break ConnectionExit::Failed("stream ended".to_string()),
                Ok(Some(Err(e))) => break ConnectionExit::Failed(e.to_string()),
                Ok(Some(Ok(msg))) => msg,
            };

            match msg {
                Message::Text(text) => self.handle_text(&mut conn, &text).await,
                Message::Binary(bytes) => self.handle_audio(&conn, bytes),
                Message::Close(frame) => {
                    match frame {
                        Some(f) => {
                            let code = u16::from(f.code);
                            log::info!(
                                "Signaling: {} closed ({} {})",
                                peer,
                                code,
                                describe_close_code(code)
                            );
                        }
                        None => log::info!("Signaling: {} closed", peer),
                    }
                    break ConnectionExit::Closed;
                }
                // Pings are answered by tungstenite itself.
                _ => {}
            }
        };

        self.finish_connection(conn, exit);
        client.close();
        let _ = writer.await;
    }

    fn finish_connection(&self, conn: Connection, exit: ConnectionExit) {
        if let Some(session) = &conn.session {
            match &exit {
                ConnectionExit::Failed(reason) => {
                    log::warn!(
                        "Signaling: lost client {} for session {}: {}",
                        conn.peer,
                        session.id(),
                        reason
                    );
                    self.end_session(session, SessionEvent::ClientLost);
                }
                ConnectionExit::Closed | ConnectionExit::Shutdown => {
                    self.end_session(session, SessionEvent::Hangup);
                }
            }
        }
        if let Some(identity) = &conn.identity {
            self.clients.unregister(identity, &conn.client);
        }
    }

    fn handle_audio(&self, conn: &Connection, bytes: Vec<u8>) {
        match &conn.session {
            Some(session) if !session.is_closed() => {
                session.queue_client_audio(bytes);
            }
            _ => log::trace!("Signaling: audio from {} without a session, dropped", conn.peer),
        }
    }

    async fn handle_text(self: &Arc<Self>, conn: &mut Connection, text: &str) {
        let msg = match ControlMessage::parse(text) {
            Ok(msg) => msg,
            Err(e) => {
                log::warn!("Signaling: bad control message from {}: {}", conn.peer, e);
                conn.client.send_control(ControlMessage::error(e.to_string()));
                return;
            }
        };
        log::debug!("Signaling: {} from {}", msg.type_name(), conn.peer);

        match msg {
            ControlMessage::Register { identity } => self.handle_register(conn, identity).await,
            ControlMessage::StartCall {
                identity,
                session_id,
            } => self.handle_start_call(conn, identity, session_id).await,
            ControlMessage::Hangup { session_id } => self.handle_hangup(conn, session_id),
            ControlMessage::Ping => {
                if let Some(session) = &conn.session {
                    session.touch();
                }
                conn.client.send_control(ControlMessage::Pong);
            }
            ControlMessage::AcknowledgeAlert {
                alert_id,
                acknowledged_by,
            } => {
                let by = acknowledged_by
                    .or_else(|| conn.identity.clone())
                    .unwrap_or_else(|| "client".to_string());
                let success = self.escalation.acknowledge_alert(&alert_id, &by);
                conn.client
                    .send_control(ControlMessage::AlertAcknowledged { alert_id, success });
            }
            ControlMessage::GetDiagnostics => {
                conn.client.send_control(ControlMessage::Diagnostics {
                    data: self.diagnostics(),
                });
            }
            ControlMessage::WebrtcSignal {
                identity,
                target_identity,
                payload,
            } => self.relay_signal(conn, identity, target_identity, payload),
            other => {
                let err = ProtocolError::Unexpected(other.type_name());
                log::warn!("Signaling: {} from {}", err, conn.peer);
                conn.client.send_control(ControlMessage::error(err.to_string()));
            }
        }
    }

    async fn lookup_subject(&self, conn: &Connection, identity: &str) -> Option<Subject> {
        match self.directory.subject(identity).await {
            Ok(Some(subject)) => Some(subject),
            Ok(None) => {
                log::warn!("Signaling: unknown identity from {}", conn.peer);
                conn.client.send_control(ControlMessage::error("unknown identity"));
                None
            }
            Err(e) => {
                log::error!("Signaling: directory lookup failed: {}", e);
                self.metrics
                    .record_error("directory", e.to_string(), None);
                conn.client
                    .send_control(ControlMessage::error("directory unavailable"));
                None
            }
        }
    }

    async fn handle_register(&self, conn: &mut Connection, identity: String) {
        if self.lookup_subject(conn, &identity).await.is_none() {
            return;
        }
        if let Some(previous) = conn.identity.replace(identity.clone()) {
            if previous != identity {
                self.clients.unregister(&previous, &conn.client);
            }
        }
        self.clients.register(&identity, conn.client.clone());
        log::info!("Signaling: {} registered", conn.peer);
        conn.client
            .send_control(ControlMessage::Registered { success: true });
    }

    async fn handle_start_call(
        self: &Arc<Self>,
        conn: &mut Connection,
        identity: Option<String>,
        session_id: Option<String>,
    ) {
        let Some(identity) = identity
            .filter(|i| !i.trim().is_empty())
            .or_else(|| conn.identity.clone())
        else {
            conn.client
                .send_control(ControlMessage::error("missing identity"));
            return;
        };
        let Some(subject) = self.lookup_subject(conn, &identity).await else {
            return;
        };

        let session_id = session_id
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| format!("session-{}", Uuid::new_v4().simple()));
        let setup = SessionSetup {
            instructions: self.instructions.instructions_for(&subject),
            voice_name: subject
                .voice_name
                .clone()
                .unwrap_or_else(|| self.default_voice.clone()),
        };

        let backend = match self.connector.connect(&setup).await {
            Ok(backend) => backend,
            Err(e) => {
                log::error!("Signaling: backend for session {} failed: {}", session_id, e);
                self.metrics
                    .record_error("backend", e.to_string(), Some(session_id));
                conn.client
                    .send_control(ControlMessage::error(format!("failed to start call: {}", e)));
                return;
            }
        };

        if let Some(previous) = conn.session.take() {
            if previous.identity() != identity {
                self.end_session(&previous, SessionEvent::Hangup);
            }
        }

        let BackendConnection {
            link,
            audio_rx,
            events_rx,
        } = backend;
        let (session, inbound_rx) = Session::new(SessionParams {
            session_id: session_id.clone(),
            subject,
            mode: ConversationMode::Audio,
            setup,
            client: conn.client.clone(),
            link,
            audio: self.audio.clone(),
            metrics: self.metrics.clone(),
        });
        session.transition(SessionEvent::BackendReady);
        self.sessions.insert(session.clone());
        self.metrics.session_started();
        conn.session = Some(session.clone());

        spawn_forwarder(session.clone(), inbound_rx);
        spawn_audio_pump(session.clone(), audio_rx);
        self.spawn_event_pump(session.clone(), events_rx);

        log::info!("Signaling: session {} started", session_id);
        session.send_control(ControlMessage::SessionCreated {
            session_id,
            success: true,
        });

        // A snapshot left by a dropped client is replayed into the new session.
        if let Some(report) = self.replay_snapshot(&session, ReplayTarget::NewSession).await {
            self.metrics.client_restored();
            log::info!(
                "Signaling: restored {} tool calls and {} messages into {}",
                report.tool_calls,
                report.context_messages,
                session.id()
            );
        }
    }

    fn handle_hangup(&self, conn: &mut Connection, session_id: Option<String>) {
        let Some(session) = conn.session.take() else {
            conn.client
                .send_control(ControlMessage::error("no active session"));
            return;
        };
        if let Some(requested) = session_id.filter(|s| !s.is_empty()) {
            if requested != session.id() {
                conn.client
                    .send_control(ControlMessage::error("session id does not match"));
                conn.session = Some(session);
                return;
            }
        }
        log::info!("Signaling: hangup for session {}", session.id());
        self.end_session(&session, SessionEvent::Hangup);
        self.reconnection.delete_state(session.identity());
    }

    fn relay_signal(
        &self,
        conn: &Connection,
        identity: Option<String>,
        target_identity: String,
        payload: serde_json::Value,
    ) {
        let Some(sender) = conn.identity.clone().or(identity) else {
            conn.client
                .send_control(ControlMessage::error("register before signaling"));
            return;
        };
        match self.clients.get(&target_identity) {
            Some(target) => {
                target.send_control(ControlMessage::WebrtcSignal {
                    identity: Some(sender),
                    target_identity,
                    payload,
                });
            }
            None => log::warn!("Signaling: signal target is not registered, dropped"),
        }
    }

    /// Apply a closing event, save a snapshot if asked to, and unregister the session.
    fn end_session(&self, session: &Arc<Session>, event: SessionEvent) {
        let effects = session.transition(event);
        if effects.contains(&SessionEffect::SaveSnapshot) {
            self.save_snapshot(session);
        }
        self.sessions.remove(session.identity(), session.id());
    }

    fn save_snapshot(&self, session: &Session) {
        if let Err(e) = self.reconnection.save_state(session.snapshot()) {
            log::warn!("Signaling: snapshot for {} not saved: {}", session.id(), e);
        }
    }

    // ------------------------------------------------------------------
    // Backend leg
    // ------------------------------------------------------------------

    fn spawn_event_pump(
        self: &Arc<Self>,
        session: Arc<Session>,
        mut events_rx: mpsc::Receiver<BackendEvent>,
    ) {
        let server = self.clone();
        tokio::spawn(async move {
            let cancel = session.cancel_token();
            loop {
                let event = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return,
                    event = events_rx.recv() => event,
                };
                match event {
                    Some(event) => server.handle_backend_event(&session, event).await,
                    None => break,
                }
            }
            if cancel.is_cancelled() || session.is_closed() {
                return;
            }
            server.recover_backend(session).await;
        });
    }

    async fn handle_backend_event(&self, session: &Arc<Session>, event: BackendEvent) {
        match event {
            BackendEvent::SetupComplete => {
                log::debug!("Signaling: session {} backend setup repeated", session.id())
            }
            BackendEvent::InputTranscript(text) => session.push_user_transcript(&text),
            BackendEvent::OutputTranscript(text) => session.push_assistant_transcript(&text),
            // The audio pump flushes or clears on the matching in-band marker.
            BackendEvent::TurnComplete => session.complete_turn(),
            BackendEvent::Interrupted => session.interrupt_turn(),
            BackendEvent::ToolCall(calls) => self.run_tool_calls(session, calls).await,
        }
    }

    async fn run_tool_calls(&self, session: &Arc<Session>, calls: Vec<FunctionCall>) {
        let ctx = ToolContext {
            session_id: session.id().to_string(),
            identity: session.identity().to_string(),
            subject: session.subject().clone(),
        };

        let mut responses = Vec::with_capacity(calls.len());
        for call in calls {
            session.record_tool_call(&call.id, &call.name, call.args.clone());
            self.metrics.tool_called();
            let outcome = self.tools.dispatch(&call.name, &ctx, call.args).await;
            if let Err(e) = &outcome {
                log::warn!("Signaling: tool {} failed: {}", call.name, e);
                self.metrics
                    .record_error("tool", e.to_string(), Some(ctx.session_id.clone()));
            }
            responses.push(FunctionResponse {
                id: call.id,
                name: call.name,
                response: response_body(&outcome),
            });
        }

        let answered: Vec<String> = responses.iter().map(|r| r.id.clone()).collect();
        match session.backend().send_tool_response(responses).await {
            Ok(()) => {
                for id in answered {
                    session.resolve_tool_call(&id);
                }
            }
            // Left pending so a snapshot carries them.
            Err(e) => log::warn!(
                "Signaling: tool response for {} not delivered: {}",
                session.id(),
                e
            ),
        }
    }

    /// The backend leg dropped under a live session: snapshot, reconnect, replay.
    async fn recover_backend(self: &Arc<Self>, session: Arc<Session>) {
        let effects = session.transition(SessionEvent::BackendLost);
        if !effects.contains(&SessionEffect::SaveSnapshot) {
            return;
        }
        self.save_snapshot(&session);
        session.transition(SessionEvent::ReconnectStarted);

        let identity = session.identity().to_string();
        let cancel = session.cancel_token();
        let connector = self.connector.clone();
        let setup = session.setup().clone();

        let result = self
            .reconnection
            .attempt_reconnection(
                &identity,
                self.reconnection.policy().max_attempts,
                &cancel,
                |attempt| {
                    let connector = connector.clone();
                    let setup = setup.clone();
                    let session_id = session.id().to_string();
                    async move {
                        log::debug!("Signaling: reconnect attempt {} for {}", attempt, session_id);
                        connector.connect(&setup).await
                    }
                },
                |backend: BackendConnection| {
                    let session = session.clone();
                    async move {
                        let BackendConnection {
                            link,
                            audio_rx,
                            events_rx,
                        } = backend;
                        if session.is_closed() {
                            link.close().await;
                            return Err(BackendError::Disconnected("session closed".to_string()));
                        }
                        session.replace_backend(link);
                        Ok((audio_rx, events_rx))
                    }
                },
            )
            .await;

        match result {
            Ok((audio_rx, events_rx)) => {
                let effects = session.transition(SessionEvent::BackendRestored);
                if !effects.contains(&SessionEffect::ReplaySnapshot) {
                    return;
                }
                self.metrics.backend_reconnected();
                spawn_audio_pump(session.clone(), audio_rx);
                self.spawn_event_pump(session.clone(), events_rx);
                self.replay_snapshot(&session, ReplayTarget::SameSession).await;
            }
            Err(ReconnectError::Cancelled { attempts }) => {
                log::info!(
                    "Signaling: reconnection for {} cancelled after {} attempts",
                    session.id(),
                    attempts
                );
            }
            Err(e) => {
                log::error!("Signaling: session {} lost its backend: {}", session.id(), e);
                self.metrics.reconnect_failed();
                self.metrics
                    .record_error("reconnect", e.to_string(), Some(session.id().to_string()));
                session.send_control(ControlMessage::error("reconnection failed"));
                session.transition(SessionEvent::ReconnectFailed);
                self.sessions.remove(session.identity(), session.id());
            }
        }
    }

    async fn replay_snapshot(
        &self,
        session: &Arc<Session>,
        target: ReplayTarget,
    ) -> Option<RestoreReport> {
        let restored = self
            .reconnection
            .restore_conversation(session.identity(), |item| {
                let session = session.clone();
                async move { replay_item(&session, item, target).await }
            })
            .await;
        match restored {
            Ok(report) => Some(report),
            Err(e) => {
                log::debug!("Signaling: nothing to restore for {}: {}", session.id(), e);
                None
            }
        }
    }
}

async fn replay_item(
    session: &Session,
    item: RestoreItem,
    target: ReplayTarget,
) -> Result<(), ReplayError> {
    let send = |msg: ControlMessage| {
        if session.send_control(msg) {
            Ok(())
        } else {
            Err(ReplayError::ClientGone)
        }
    };

    match item {
        RestoreItem::Notice { session_id, mode } => send(ControlMessage::ReconnectionRestored {
            session_id,
            mode: mode.as_str().to_string(),
        }),
        RestoreItem::ToolCall(call) => send(ControlMessage::RetryToolCall {
            tool_name: call.tool_name,
            args: call.args,
        }),
        RestoreItem::Audio(chunk) => {
            if session.client().is_closed() {
                return Err(ReplayError::ClientGone);
            }
            session.replay_audio(chunk);
            Ok(())
        }
        RestoreItem::Context(messages) => {
            let transcript = render_transcript(&messages);
            if target == ReplayTarget::NewSession {
                session.seed_context(messages.clone());
            }
            send(ControlMessage::RestoreContext { context: messages })?;
            session
                .backend()
                .send_text(&format!("Conversation so far:\n{}", transcript))
                .await?;
            Ok(())
        }
    }
}

fn spawn_forwarder(session: Arc<Session>, mut inbound_rx: mpsc::Receiver<Vec<u8>>) {
    tokio::spawn(async move {
        let cancel = session.cancel_token();
        loop {
            let frame = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                frame = inbound_rx.recv() => frame,
            };
            let Some(frame) = frame else { break };
            if let Err(e) = session.forward_to_backend(&frame).await {
                log::debug!("Signaling: session {} audio not forwarded: {}", session.id(), e);
            }
        }
    });
}

fn spawn_audio_pump(session: Arc<Session>, mut audio_rx: mpsc::Receiver<AudioItem>) {
    tokio::spawn(async move {
        let cancel = session.cancel_token();
        loop {
            let item = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                item = audio_rx.recv() => item,
            };
            match item {
                Some(AudioItem::Pcm(chunk)) => session.relay_backend_audio(&chunk),
                Some(AudioItem::Flush) => {
                    session.flush_audio();
                }
                Some(AudioItem::Clear) => session.clear_outbound_audio(),
                None => break,
            }
        }
    });
}
