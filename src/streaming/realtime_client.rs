//! Realtime AI backend WebSocket client
//!
//! # Connection Flow
//!
//! 1. `connect()` - Open the WebSocket, send `setup`, wait for `setupComplete`
//! 2. Spawn the reader task that demuxes frames into audio and events
//! 3. `send_audio()` / `send_text()` / `send_tool_response()` on the link
//! 4. `close()` - Clean shutdown
//!
//! Reconnection is not handled here; the session layer re-runs `connect()`
//! under its backoff policy.

use async_trait::async_trait;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio::time::timeout;
use tokio_tungstenite::{
    connect_async_with_config, tungstenite::Message, MaybeTlsStream, WebSocketStream,
};

use super::protocol::{ClientMessage, FunctionResponse, ServerMessage};
use super::{
    describe_close_code, AudioItem, BackendConnection, BackendConnector, BackendError,
    BackendEvent, BackendLink, SessionSetup, BACKEND_CHANNEL_CAPACITY,
};
use crate::settings::{ApiKey, BackendSettings};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Opens connections to the hosted realtime backend.
#[derive(Debug, Clone)]
pub struct RealtimeConnector {
    url: String,
    model: String,
    temperature: f32,
    api_key: ApiKey,
    connect_timeout: Duration,
    setup_timeout: Duration,
}

impl RealtimeConnector {
    pub fn from_settings(settings: &BackendSettings) -> Result<Self, BackendError> {
        let api_key = settings
            .api_key
            .clone()
            .ok_or(BackendError::MissingApiKey)?;
        Ok(Self {
            url: settings.url.clone(),
            model: settings.model.clone(),
            temperature: settings.temperature,
            api_key,
            connect_timeout: Duration::from_secs(settings.connect_timeout_secs),
            setup_timeout: Duration::from_secs(settings.setup_timeout_secs),
        })
    }

    fn endpoint(&self) -> String {
        let sep = if self.url.contains('?') { '&' } else { '?' };
        format!("{}{}key={}", self.url, sep, self.api_key.expose())
    }
}

#[async_trait]
impl BackendConnector for RealtimeConnector {
    async fn connect(&self, setup: &SessionSetup) -> Result<BackendConnection, BackendError> {
        // Never log the endpoint itself: it carries the key.
        log::info!("Connecting to realtime backend (model {})...", self.model);

        let (ws_stream, _response) = timeout(
            self.connect_timeout,
            connect_async_with_config(self.endpoint(), None, true),
        )
        .await
        .map_err(|_| BackendError::ConnectionFailed("Connection timeout".to_string()))?
        .map_err(|e| BackendError::ConnectionFailed(e.to_string()))?;

        let (mut write, mut read) = ws_stream.split();

        let setup_msg = ClientMessage::setup(
            &self.model,
            &setup.voice_name,
            &setup.instructions,
            self.temperature,
        );
        send_message(&mut write, &setup_msg).await?;

        log::debug!("Backend setup sent, waiting for setupComplete...");

        timeout(self.setup_timeout, async {
            while let Some(msg_result) = read.next().await {
                let bytes = match msg_result {
                    Ok(Message::Text(text)) => text.into_bytes(),
                    Ok(Message::Binary(bytes)) => bytes,
                    Ok(Message::Close(frame)) => {
                        let reason = match frame {
                            Some(f) => {
                                let code = u16::from(f.code);
                                format!("{} ({}): {}", code, describe_close_code(code), f.reason)
                            }
                            None => "closed without status".to_string(),
                        };
                        return Err(BackendError::SetupFailed(reason));
                    }
                    Ok(_) => continue,
                    Err(e) => return Err(BackendError::Protocol(e.to_string())),
                };
                match ServerMessage::parse(&bytes) {
                    Ok(msg) if msg.setup_complete.is_some() => return Ok(()),
                    Ok(_) => log::debug!("Ignoring frame while waiting for setupComplete"),
                    Err(e) => log::warn!("Failed to parse backend frame: {}", e),
                }
            }
            Err(BackendError::Disconnected("Stream ended during setup".to_string()))
        })
        .await
        .map_err(|_| BackendError::SetupFailed("Setup timeout".to_string()))??;

        log::info!("Backend session ready (voice {})", setup.voice_name);

        let (audio_tx, audio_rx) = mpsc::channel(BACKEND_CHANNEL_CAPACITY);
        let (events_tx, events_rx) = mpsc::channel(BACKEND_CHANNEL_CAPACITY);
        let closed = Arc::new(AtomicBool::new(false));
        let reader_closed = closed.clone();

        let reader_task = tokio::spawn(async move {
            read_loop(&mut read, audio_tx, events_tx).await;
            reader_closed.store(true, Ordering::SeqCst);
            log::debug!("Backend reader task exiting");
        });

        let link = RealtimeLink {
            write: Mutex::new(write),
            closed,
            reader_task,
        };

        Ok(BackendConnection {
            link: Arc::new(link),
            audio_rx,
            events_rx,
        })
    }
}

async fn read_loop(
    read: &mut futures_util::stream::SplitStream<WsStream>,
    audio_tx: mpsc::Sender<AudioItem>,
    events_tx: mpsc::Sender<BackendEvent>,
) {
    while let Some(msg_result) = read.next().await {
        let bytes = match msg_result {
            Ok(Message::Text(text)) => text.into_bytes(),
            Ok(Message::Binary(bytes)) => bytes,
            Ok(Message::Close(frame)) => {
                match frame {
                    Some(f) => {
                        let code = u16::from(f.code);
                        log::info!(
                            "Backend closed: {} ({}) {}",
                            code,
                            describe_close_code(code),
                            f.reason
                        );
                    }
                    None => log::info!("Backend closed without status"),
                }
                return;
            }
            Ok(_) => continue,
            Err(e) => {
                log::warn!("Backend WebSocket error: {}", e);
                return;
            }
        };

        let msg = match ServerMessage::parse(&bytes) {
            Ok(msg) => msg,
            Err(e) => {
                log::warn!("Failed to parse backend frame: {}", e);
                continue;
            }
        };

        let (audio, events) = msg.into_parts();
        let markers: Vec<AudioItem> = events.iter().filter_map(AudioItem::marker_for).collect();
        for item in audio.into_iter().map(AudioItem::Pcm).chain(markers) {
            if audio_tx.send(item).await.is_err() {
                log::debug!("Backend audio receiver dropped");
                return;
            }
        }
        for event in events {
            if events_tx.send(event).await.is_err() {
                log::debug!("Backend event receiver dropped");
                return;
            }
        }
    }
    log::info!("Backend stream ended");
}

async fn send_message(
    write: &mut SplitSink<WsStream, Message>,
    msg: &ClientMessage,
) -> Result<(), BackendError> {
    let json = serde_json::to_string(msg).map_err(|e| BackendError::Protocol(e.to_string()))?;
    write
        .send(Message::Text(json))
        .await
        .map_err(|e| BackendError::SendFailed(e.to_string()))
}

/// Handle to an open backend connection.
pub struct RealtimeLink {
    write: Mutex<SplitSink<WsStream, Message>>,
    closed: Arc<AtomicBool>,
    reader_task: tokio::task::JoinHandle<()>,
}

impl RealtimeLink {
    async fn send(&self, msg: &ClientMessage) -> Result<(), BackendError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BackendError::Disconnected("link closed".to_string()));
        }
        let mut write = self.write.lock().await;
        send_message(&mut write, msg).await
    }
}

#[async_trait]
impl BackendLink for RealtimeLink {
    async fn send_audio(&self, pcm: &[u8]) -> Result<(), BackendError> {
        self.send(&ClientMessage::audio(pcm)).await
    }

    async fn send_text(&self, text: &str) -> Result<(), BackendError> {
        self.send(&ClientMessage::text(text)).await
    }

    async fn send_tool_response(
        &self,
        responses: Vec<FunctionResponse>,
    ) -> Result<(), BackendError> {
        self.send(&ClientMessage::tool_response(responses)).await
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        log::info!("Disconnecting from realtime backend...");
        self.reader_task.abort();
        let mut write = self.write.lock().await;
        if let Err(e) = write.close().await {
            log::warn!("Error closing backend WebSocket: {}", e);
        }
    }
}

impl Drop for RealtimeLink {
    fn drop(&mut self) {
        self.reader_task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;
    use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
    use tokio_tungstenite::tungstenite::protocol::CloseFrame;

    fn settings_for(url: String) -> BackendSettings {
        BackendSettings {
            url,
            api_key: Some(ApiKey::new("test-key")),
            connect_timeout_secs: 2,
            setup_timeout_secs: 2,
            ..BackendSettings::default()
        }
    }

    #[test]
    fn test_missing_api_key() {
        let err = RealtimeConnector::from_settings(&BackendSettings::default()).unwrap_err();
        assert!(matches!(err, BackendError::MissingApiKey));
    }

    #[test]
    fn test_endpoint_appends_key() {
        let c = RealtimeConnector::from_settings(&settings_for("wss://h/ws".into())).unwrap();
        assert_eq!(c.endpoint(), "wss://h/ws?key=test-key");
        let c = RealtimeConnector::from_settings(&settings_for("wss://h/ws?a=1".into())).unwrap();
        assert_eq!(c.endpoint(), "wss://h/ws?a=1&key=test-key");
    }

    /// Minimal backend: acknowledges setup, sends one audio frame, then ends a turn with more audio.
    async fn fake_backend(listener: TcpListener) {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();

        let setup = ws.next().await.unwrap().unwrap();
        let setup: serde_json::Value = serde_json::from_str(setup.to_text().unwrap()).unwrap();
        assert_eq!(setup["setup"]["model"], "models/gemini-2.0-flash-exp");

        ws.send(Message::Binary(br#"{"setupComplete":{}}"#.to_vec()))
            .await
            .unwrap();
        ws.send(Message::Text(
            r#"{"serverContent":{"modelTurn":{"parts":[{"inlineData":{"mimeType":"audio/pcm","data":"AQI="}}]}}}"#
                .to_string(),
        ))
        .await
        .unwrap();

        let audio = ws.next().await.unwrap().unwrap();
        let audio: serde_json::Value = serde_json::from_str(audio.to_text().unwrap()).unwrap();
        assert!(audio["realtime_input"]["media_chunks"][0]["data"].is_string());

        ws.send(Message::Text(
            r#"{"serverContent":{"modelTurn":{"parts":[{"inlineData":{"mimeType":"audio/pcm","data":"AwQ="}}]},"inputTranscription":{"text":"hi"},"turnComplete":true}}"#
                .to_string(),
        ))
        .await
        .unwrap();
        let _ = ws.close(None).await;
    }

    #[tokio::test]
    async fn test_connect_and_demux_against_local_server() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(fake_backend(listener));

        let connector =
            RealtimeConnector::from_settings(&settings_for(format!("ws://{}/", addr))).unwrap();
        let setup = SessionSetup {
            instructions: "be kind".into(),
            voice_name: "Aoede".into(),
        };
        let mut conn = connector.connect(&setup).await.unwrap();

        assert_eq!(conn.audio_rx.recv().await, Some(AudioItem::Pcm(vec![1u8, 2])));

        conn.link.send_audio(&[0u8; 4]).await.unwrap();
        assert_eq!(
            conn.events_rx.recv().await,
            Some(BackendEvent::InputTranscript("hi".into()))
        );
        assert_eq!(conn.events_rx.recv().await, Some(BackendEvent::TurnComplete));
        // The flush marker follows the last fragment of the turn.
        assert_eq!(conn.audio_rx.recv().await, Some(AudioItem::Pcm(vec![3u8, 4])));
        assert_eq!(conn.audio_rx.recv().await, Some(AudioItem::Flush));
        // Backend closed: the event stream ends.
        assert_eq!(conn.events_rx.recv().await, None);

        conn.link.close().await;
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_setup_rejected_by_close() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            let _ = ws.next().await;
            let _ = ws
                .close(Some(CloseFrame {
                    code: CloseCode::Policy,
                    reason: "bad key".into(),
                }))
                .await;
        });

        let connector =
            RealtimeConnector::from_settings(&settings_for(format!("ws://{}/", addr))).unwrap();
        let err = connector
            .connect(&SessionSetup {
                instructions: String::new(),
                voice_name: "Aoede".into(),
            })
            .await
            .unwrap_err();
        match err {
            BackendError::SetupFailed(reason) => assert!(reason.contains("1008")),
            other => panic!("unexpected error {:?}", other),
        }
    }
}
