//! Realtime AI backend protocol types
//!
//! JSON message types for the bidirectional streaming backend.
//!
//! # Protocol Overview
//!
//! 1. Connect to `<url>?key=<api key>`
//! 2. Send `setup` (model, voice, system instruction)
//! 3. Receive `setupComplete`
//! 4. Stream microphone audio via `realtime_input.media_chunks`
//! 5. Receive `serverContent` (audio parts, transcriptions, turn markers)
//!    and `toolCall`; answer tool calls with `tool_response`

use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::BackendEvent;

/// MIME type of microphone audio sent to the backend.
pub const INPUT_AUDIO_MIME: &str = "audio/pcm;rate=16000";

// ============================================================================
// Client Messages (sent TO the backend)
// ============================================================================

/// Messages sent from the relay to the backend. Externally tagged: `{"setup": {...}}`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientMessage {
    Setup(Setup),
    RealtimeInput(RealtimeInput),
    ClientContent(ClientContent),
    ToolResponse(ToolResponse),
}

#[derive(Debug, Clone, Serialize)]
pub struct Setup {
    pub model: String,
    pub generation_config: GenerationConfig,
    pub system_instruction: Content,
}

#[derive(Debug, Clone, Serialize)]
pub struct GenerationConfig {
    pub response_modalities: Vec<String>,
    pub speech_config: SpeechConfig,
    pub temperature: f32,
}

#[derive(Debug, Clone, Serialize)]
pub struct SpeechConfig {
    pub voice_config: VoiceConfig,
}

#[derive(Debug, Clone, Serialize)]
pub struct VoiceConfig {
    pub prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Debug, Clone, Serialize)]
pub struct PrebuiltVoiceConfig {
    pub voice_name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    pub parts: Vec<TextPart>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TextPart {
    pub text: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RealtimeInput {
    pub media_chunks: Vec<MediaChunk>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MediaChunk {
    pub mime_type: String,
    /// Base64-encoded PCM16 audio
    pub data: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClientContent {
    pub turns: Vec<Content>,
    pub turn_complete: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ToolResponse {
    pub function_responses: Vec<FunctionResponse>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FunctionResponse {
    pub id: String,
    pub name: String,
    pub response: Value,
}

impl ClientMessage {
    pub fn setup(model: &str, voice_name: &str, instructions: &str, temperature: f32) -> Self {
        let model = if model.starts_with("models/") {
            model.to_string()
        } else {
            format!("models/{}", model)
        };
        Self::Setup(Setup {
            model,
            generation_config: GenerationConfig {
                response_modalities: vec!["AUDIO".to_string()],
                speech_config: SpeechConfig {
                    voice_config: VoiceConfig {
                        prebuilt_voice_config: PrebuiltVoiceConfig {
                            voice_name: voice_name.to_string(),
                        },
                    },
                },
                temperature,
            },
            system_instruction: Content {
                role: None,
                parts: vec![TextPart {
                    text: instructions.to_string(),
                }],
            },
        })
    }

    /// Wrap raw PCM16 bytes as one realtime media chunk.
    pub fn audio(pcm: &[u8]) -> Self {
        Self::RealtimeInput(RealtimeInput {
            media_chunks: vec![MediaChunk {
                mime_type: INPUT_AUDIO_MIME.to_string(),
                data: STANDARD.encode(pcm),
            }],
        })
    }

    /// A complete user turn carrying text.
    pub fn text(text: &str) -> Self {
        Self::ClientContent(ClientContent {
            turns: vec![Content {
                role: Some("user".to_string()),
                parts: vec![TextPart {
                    text: text.to_string(),
                }],
            }],
            turn_complete: true,
        })
    }

    pub fn tool_response(responses: Vec<FunctionResponse>) -> Self {
        Self::ToolResponse(ToolResponse {
            function_responses: responses,
        })
    }
}

// ============================================================================
// Server Messages (received FROM the backend)
// ============================================================================

/// One backend frame. Several sections may be present at once; unknown keys are ignored.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerMessage {
    #[serde(default)]
    pub setup_complete: Option<Value>,
    #[serde(default)]
    pub server_content: Option<ServerContent>,
    #[serde(default)]
    pub tool_call: Option<ToolCall>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerContent {
    #[serde(default)]
    pub model_turn: Option<ModelTurn>,
    #[serde(default)]
    pub turn_complete: bool,
    #[serde(default)]
    pub interrupted: bool,
    #[serde(default)]
    pub input_transcription: Option<Transcription>,
    #[serde(default)]
    pub output_transcription: Option<Transcription>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ModelTurn {
    #[serde(default)]
    pub parts: Vec<Part>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    #[serde(default)]
    pub inline_data: Option<InlineData>,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InlineData {
    #[serde(default)]
    pub mime_type: String,
    /// Base64-encoded payload
    pub data: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Transcription {
    #[serde(default)]
    pub text: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCall {
    #[serde(default)]
    pub function_calls: Vec<FunctionCall>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FunctionCall {
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub args: Value,
}

impl ServerMessage {
    pub fn parse(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }

    /// Split a frame into decoded audio fragments and semantic events, in frame order.
    ///
    /// Audio parts that fail to decode are logged and skipped.
    pub fn into_parts(self) -> (Vec<Vec<u8>>, Vec<BackendEvent>) {
        let mut audio = Vec::new();
        let mut events = Vec::new();

        if self.setup_complete.is_some() {
            events.push(BackendEvent::SetupComplete);
        }

        if let Some(content) = self.server_content {
            if let Some(t) = content.input_transcription {
                if !t.text.is_empty() {
                    events.push(BackendEvent::InputTranscript(t.text));
                }
            }
            if let Some(t) = content.output_transcription {
                if !t.text.is_empty() {
                    events.push(BackendEvent::OutputTranscript(t.text));
                }
            }
            if content.interrupted {
                events.push(BackendEvent::Interrupted);
            }
            if let Some(turn) = content.model_turn {
                for part in turn.parts {
                    let Some(inline) = part.inline_data else {
                        continue;
                    };
                    if !inline.mime_type.is_empty() && !inline.mime_type.starts_with("audio/pcm") {
                        log::debug!("Backend: skipping inline data of type {}", inline.mime_type);
                        continue;
                    }
                    match STANDARD.decode(inline.data.as_bytes()) {
                        Ok(bytes) => audio.push(bytes),
                        Err(e) => log::warn!("Backend: failed to decode audio part: {}", e),
                    }
                }
            }
            if content.turn_complete {
                events.push(BackendEvent::TurnComplete);
            }
        }

        if let Some(call) = self.tool_call {
            if !call.function_calls.is_empty() {
                events.push(BackendEvent::ToolCall(call.function_calls));
            }
        }

        (audio, events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_setup_serialization() {
        let msg = ClientMessage::setup("gemini-2.0-flash-exp", "Aoede", "Be kind", 0.6);
        let v = serde_json::to_value(&msg).unwrap();

        assert_eq!(v["setup"]["model"], "models/gemini-2.0-flash-exp");
        assert_eq!(
            v["setup"]["generation_config"]["response_modalities"],
            json!(["AUDIO"])
        );
        assert_eq!(
            v["setup"]["generation_config"]["speech_config"]["voice_config"]
                ["prebuilt_voice_config"]["voice_name"],
            "Aoede"
        );
        assert_eq!(v["setup"]["system_instruction"]["parts"][0]["text"], "Be kind");
        assert!(v["setup"]["system_instruction"].get("role").is_none());
    }

    #[test]
    fn test_audio_serialization() {
        let msg = ClientMessage::audio(&[1, 2, 3, 4]);
        let v = serde_json::to_value(&msg).unwrap();
        let chunk = &v["realtime_input"]["media_chunks"][0];
        assert_eq!(chunk["mime_type"], INPUT_AUDIO_MIME);
        assert_eq!(chunk["data"], STANDARD.encode([1u8, 2, 3, 4]));
    }

    #[test]
    fn test_text_and_tool_response_serialization() {
        let v = serde_json::to_value(ClientMessage::text("hello")).unwrap();
        assert_eq!(v["client_content"]["turn_complete"], true);
        assert_eq!(v["client_content"]["turns"][0]["role"], "user");

        let v = serde_json::to_value(ClientMessage::tool_response(vec![FunctionResponse {
            id: "call-1".into(),
            name: "alert_family".into(),
            response: json!({"result": "ok"}),
        }]))
        .unwrap();
        assert_eq!(v["tool_response"]["function_responses"][0]["id"], "call-1");
    }

    #[test]
    fn test_server_content_with_audio_and_turn_complete() {
        let frame = json!({
            "serverContent": {
                "modelTurn": {"parts": [
                    {"inlineData": {"mimeType": "audio/pcm;rate=24000", "data": STANDARD.encode([9u8, 9])}},
                    {"text": "thinking"}
                ]},
                "outputTranscription": {"text": "Hi there"},
                "turnComplete": true
            }
        });
        let msg = ServerMessage::parse(frame.to_string().as_bytes()).unwrap();
        let (audio, events) = msg.into_parts();

        assert_eq!(audio, vec![vec![9u8, 9]]);
        assert_eq!(
            events,
            vec![
                BackendEvent::OutputTranscript("Hi there".into()),
                BackendEvent::TurnComplete
            ]
        );
    }

    #[test]
    fn test_tool_call_and_setup_complete() {
        let frame = json!({
            "setupComplete": {},
            "toolCall": {"functionCalls": [
                {"id": "c1", "name": "alert_family", "args": {"reason": "fell", "severity": "critica"}}
            ]}
        });
        let (audio, events) = ServerMessage::parse(frame.to_string().as_bytes())
            .unwrap()
            .into_parts();
        assert!(audio.is_empty());
        assert_eq!(events[0], BackendEvent::SetupComplete);
        match &events[1] {
            BackendEvent::ToolCall(calls) => {
                assert_eq!(calls[0].name, "alert_family");
                assert_eq!(calls[0].args["severity"], "critica");
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_interrupted_and_bad_audio() {
        let frame = json!({
            "serverContent": {
                "interrupted": true,
                "modelTurn": {"parts": [{"inlineData": {"mimeType": "audio/pcm", "data": "***"}}]}
            },
            "usageMetadata": {"totalTokenCount": 10}
        });
        let (audio, events) = ServerMessage::parse(frame.to_string().as_bytes())
            .unwrap()
            .into_parts();
        assert!(audio.is_empty());
        assert_eq!(events, vec![BackendEvent::Interrupted]);
    }
}
