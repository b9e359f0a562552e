use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::escalation::AlertPriority;

const SETTINGS_DIR_NAME: &str = "care-relay";
const SETTINGS_FILE_NAME: &str = "settings.json";

/// Environment variable pointing at an explicit settings file.
pub const SETTINGS_PATH_ENV: &str = "CARE_RELAY_SETTINGS";

pub const DEFAULT_BACKEND_URL: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Address the client-facing WebSocket server binds to.
    pub listen_addr: String,

    /// JSON file with known subjects and their caregiver contacts.
    pub directory_path: Option<PathBuf>,

    /// Where escalation results are appended (JSON lines). Defaults to the data dir.
    pub audit_log_path: Option<PathBuf>,

    pub backend: BackendSettings,
    pub audio: AudioSettings,
    pub session: SessionSettings,
    pub reconnection: ReconnectionSettings,
    pub escalation: EscalationSettings,

    /// Provider credentials. Only ever read from the environment.
    #[serde(skip)]
    pub credentials: ChannelCredentials,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".to_string(),
            directory_path: None,
            audit_log_path: None,
            backend: BackendSettings::default(),
            audio: AudioSettings::default(),
            session: SessionSettings::default(),
            reconnection: ReconnectionSettings::default(),
            escalation: EscalationSettings::default(),
            credentials: ChannelCredentials::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendSettings {
    /// Base WebSocket URL of the realtime AI backend (the API key is appended as `?key=`).
    pub url: String,
    pub model: String,
    /// Voice used when the subject has no preferred voice.
    pub voice_name: String,
    pub temperature: f32,
    pub connect_timeout_secs: u64,
    /// How long to wait for the backend to acknowledge the setup message.
    pub setup_timeout_secs: u64,
    /// System instruction template. `{name}` is replaced with the subject's name.
    pub instruction_template: String,
    #[serde(skip)]
    pub api_key: Option<ApiKey>,
}

/// Backend API key. Debug output is redacted.
#[derive(Clone, PartialEq, Eq)]
pub struct ApiKey(String);

impl ApiKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ApiKey(***)")
    }
}

impl Default for BackendSettings {
    fn default() -> Self {
        Self {
            url: DEFAULT_BACKEND_URL.to_string(),
            model: "gemini-2.0-flash-exp".to_string(),
            voice_name: "Aoede".to_string(),
            temperature: 0.6,
            connect_timeout_secs: 10,
            setup_timeout_secs: 10,
            instruction_template: "You are a warm, patient companion talking with {name}. \
                Keep answers short and clear. If {name} reports a fall, pain, or any emergency, \
                call the alert_family tool right away."
                .to_string(),
            api_key: None,
        }
    }
}

/// PCM encoding of audio frames sent to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    Pcm16,
    Float32le,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioSettings {
    /// Backend audio is accumulated until at least this many bytes are pending.
    pub min_flush_bytes: usize,
    pub output_format: OutputFormat,
    /// Client audio frames queued per session before new frames are dropped.
    pub inbound_queue_frames: usize,
}

impl Default for AudioSettings {
    fn default() -> Self {
        Self {
            min_flush_bytes: 9600,
            output_format: OutputFormat::Pcm16,
            inbound_queue_frames: 64,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    /// A connection with no inbound frame for this long is dropped.
    pub read_deadline_secs: u64,
    pub idle_timeout_secs: u64,
    pub idle_sweep_interval_secs: u64,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            read_deadline_secs: 60,
            idle_timeout_secs: 30 * 60,
            idle_sweep_interval_secs: 5 * 60,
        }
    }
}

impl SessionSettings {
    pub fn read_deadline(&self) -> Duration {
        Duration::from_secs(self.read_deadline_secs)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn idle_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.idle_sweep_interval_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectionSettings {
    pub base_delay_secs: u64,
    pub multiplier: u32,
    pub max_delay_secs: u64,
    pub max_attempts: u32,
    /// Saved conversation snapshots older than this are discarded.
    pub state_ttl_secs: u64,
    pub sweep_interval_secs: u64,
}

impl Default for ReconnectionSettings {
    fn default() -> Self {
        Self {
            base_delay_secs: 2,
            multiplier: 2,
            max_delay_secs: 30,
            max_attempts: 5,
            state_ttl_secs: 5 * 60,
            sweep_interval_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EscalationSettings {
    pub critical_timeout_secs: u64,
    pub high_timeout_secs: u64,
    pub medium_timeout_secs: u64,
    pub low_timeout_secs: u64,
    /// Public base URL the voice provider calls back on; `/callback/call-ack` is appended.
    pub callback_url: String,
}

impl Default for EscalationSettings {
    fn default() -> Self {
        Self {
            critical_timeout_secs: 30,
            high_timeout_secs: 2 * 60,
            medium_timeout_secs: 5 * 60,
            low_timeout_secs: 15 * 60,
            callback_url: "http://localhost:8080".to_string(),
        }
    }
}

impl EscalationSettings {
    pub fn ack_timeout(&self, priority: AlertPriority) -> Duration {
        let secs = match priority {
            AlertPriority::Critical => self.critical_timeout_secs,
            AlertPriority::High => self.high_timeout_secs,
            AlertPriority::Medium => self.medium_timeout_secs,
            AlertPriority::Low => self.low_timeout_secs,
        };
        Duration::from_secs(secs)
    }
}

/// Secrets for the alert providers. Never serialized, never logged.
#[derive(Clone, Default)]
pub struct ChannelCredentials {
    pub twilio_account_sid: Option<String>,
    pub twilio_auth_token: Option<String>,
    pub twilio_from_number: Option<String>,
    pub twilio_from_whatsapp: Option<String>,
    pub fcm_server_key: Option<String>,
    pub sendgrid_api_key: Option<String>,
    pub alert_from_email: Option<String>,
}

impl std::fmt::Debug for ChannelCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelCredentials")
            .field("twilio", &self.twilio_account_sid.is_some())
            .field("fcm", &self.fcm_server_key.is_some())
            .field("sendgrid", &self.sendgrid_api_key.is_some())
            .finish()
    }
}

pub fn settings_path() -> Option<PathBuf> {
    if let Ok(path) = std::env::var(SETTINGS_PATH_ENV) {
        if !path.trim().is_empty() {
            return Some(PathBuf::from(path));
        }
    }
    dirs::config_dir().map(|dir| dir.join(SETTINGS_DIR_NAME).join(SETTINGS_FILE_NAME))
}

/// Default location of the escalation audit log.
pub fn default_audit_log_path() -> Option<PathBuf> {
    dirs::data_dir().map(|dir| dir.join(SETTINGS_DIR_NAME).join("escalations.jsonl"))
}

/// Load settings from disk, then apply environment overrides.
///
/// A missing or unparseable file falls back to defaults with a warning.
pub fn load_settings() -> Settings {
    let mut settings = match settings_path() {
        Some(path) => load_settings_from(&path),
        None => {
            log::warn!("Settings: could not determine config directory");
            Settings::default()
        }
    };
    settings.apply_env_overrides(|key| std::env::var(key).ok());
    settings
}

pub fn load_settings_from(path: &Path) -> Settings {
    match std::fs::read_to_string(path) {
        Ok(contents) => match serde_json::from_str::<Settings>(&contents) {
            Ok(settings) => {
                log::info!("Settings: loaded {:?}", path);
                settings
            }
            Err(e) => {
                log::warn!("Settings: failed to parse {:?}: {}", path, e);
                Settings::default()
            }
        },
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            log::debug!("Settings: {:?} not found, using defaults", path);
            Settings::default()
        }
        Err(e) => {
            log::warn!("Settings: failed to read {:?}: {}", path, e);
            Settings::default()
        }
    }
}

impl Settings {
    /// Overlay environment values. `lookup` is injected so tests do not touch process env.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(addr) = get("CARE_RELAY_LISTEN_ADDR") {
            self.listen_addr = addr;
        }
        if let Some(model) = get("GEMINI_MODEL") {
            self.backend.model = model;
        }
        if let Some(url) = get("ALERT_CALLBACK_URL") {
            self.escalation.callback_url = url;
        }
        self.backend.api_key = get("GEMINI_API_KEY").map(ApiKey::new);

        self.credentials = ChannelCredentials {
            twilio_account_sid: get("TWILIO_ACCOUNT_SID"),
            twilio_auth_token: get("TWILIO_AUTH_TOKEN"),
            twilio_from_number: get("TWILIO_FROM_NUMBER"),
            twilio_from_whatsapp: get("TWILIO_FROM_WHATSAPP"),
            fcm_server_key: get("FCM_SERVER_KEY"),
            sendgrid_api_key: get("SENDGRID_API_KEY"),
            alert_from_email: get("ALERT_FROM_EMAIL"),
        };
    }
}
