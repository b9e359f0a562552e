//! Twilio REST adapters: SMS, WhatsApp and voice calls.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

use super::channels::{
    emergency_message, ChannelAdapter, ChannelError, Delivery, VoiceCallAdapter,
};
use crate::settings::ChannelCredentials;

const TWILIO_API_BASE: &str = "https://api.twilio.com";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

pub(crate) fn http_client() -> Client {
    Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .build()
        .unwrap_or_else(|e| {
            log::warn!("HTTP client builder failed ({}), using defaults", e);
            Client::new()
        })
}

#[derive(Debug, Deserialize)]
struct TwilioResponse {
    #[serde(default)]
    sid: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error_message: Option<String>,
}

/// Authenticated Twilio account.
pub struct TwilioClient {
    account_sid: String,
    auth_token: String,
    api_base: String,
    http: Client,
}

impl TwilioClient {
    pub fn new(account_sid: String, auth_token: String) -> Self {
        Self {
            account_sid,
            auth_token,
            api_base: TWILIO_API_BASE.to_string(),
            http: http_client(),
        }
    }

    pub fn from_credentials(creds: &ChannelCredentials) -> Option<Self> {
        match (&creds.twilio_account_sid, &creds.twilio_auth_token) {
            (Some(sid), Some(token)) => Some(Self::new(sid.clone(), token.clone())),
            _ => None,
        }
    }

    /// Point at a different API host (tests, regional edges).
    pub fn with_api_base(mut self, base: impl Into<String>) -> Self {
        self.api_base = base.into();
        self
    }

    fn endpoint(&self, resource: &str) -> String {
        format!(
            "{}/2010-04-01/Accounts/{}/{}.json",
            self.api_base.trim_end_matches('/'),
            self.account_sid,
            resource
        )
    }

    async fn post_form(
        &self,
        resource: &str,
        form: &[(&str, &str)],
    ) -> Result<Delivery, ChannelError> {
        let response = self
            .http
            .post(self.endpoint(resource))
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .form(form)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        let parsed = serde_json::from_str::<TwilioResponse>(&body).ok();

        if !status.is_success() {
            let message = parsed
                .and_then(|p| p.message.or(p.error_message))
                .unwrap_or(body);
            return Err(ChannelError::Rejected {
                status: status.as_u16(),
                message,
            });
        }

        match parsed {
            Some(TwilioResponse {
                error_message: Some(err),
                ..
            }) if !err.is_empty() => Err(ChannelError::Rejected {
                status: status.as_u16(),
                message: err,
            }),
            Some(p) => {
                log::debug!("Twilio {}: sid={:?} status={:?}", resource, p.sid, p.status);
                Ok(Delivery {
                    success: true,
                    message_id: p.sid,
                })
            }
            None => Ok(Delivery {
                success: true,
                message_id: None,
            }),
        }
    }

    pub async fn send_message(
        &self,
        to: &str,
        from: &str,
        body: &str,
    ) -> Result<Delivery, ChannelError> {
        self.post_form("Messages", &[("To", to), ("From", from), ("Body", body)])
            .await
    }

    pub async fn place_call(
        &self,
        to: &str,
        from: &str,
        twiml: &str,
        status_callback: &str,
    ) -> Result<Delivery, ChannelError> {
        self.post_form(
            "Calls",
            &[
                ("To", to),
                ("From", from),
                ("Twiml", twiml),
                ("StatusCallback", status_callback),
                ("StatusCallbackEvent", "answered completed"),
            ],
        )
        .await
    }
}

fn whatsapp_address(number: &str) -> String {
    if number.starts_with("whatsapp:") {
        number.to_string()
    } else {
        format!("whatsapp:{}", number)
    }
}

fn xml_escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

/// Voice script: reads the alert, then waits for one key press that posts to `callback_url`.
pub fn call_twiml(subject_name: &str, reason: &str, callback_url: &str) -> String {
    format!(
        "<Response><Say>{}</Say><Gather numDigits=\"1\" action=\"{}\" method=\"POST\">\
         <Say>Press any key to confirm you received this alert.</Say></Gather></Response>",
        xml_escape(&emergency_message(subject_name, reason)),
        xml_escape(callback_url)
    )
}

pub struct TwilioSms {
    client: Arc<TwilioClient>,
    from: String,
}

impl TwilioSms {
    pub fn new(client: Arc<TwilioClient>, from: String) -> Self {
        Self { client, from }
    }
}

#[async_trait]
impl ChannelAdapter for TwilioSms {
    async fn send(
        &self,
        target: &str,
        subject_name: &str,
        reason: &str,
    ) -> Result<Delivery, ChannelError> {
        let body = emergency_message(subject_name, reason);
        self.client.send_message(target, &self.from, &body).await
    }
}

pub struct TwilioWhatsApp {
    client: Arc<TwilioClient>,
    from: String,
}

impl TwilioWhatsApp {
    pub fn new(client: Arc<TwilioClient>, from: String) -> Self {
        Self { client, from }
    }
}

#[async_trait]
impl ChannelAdapter for TwilioWhatsApp {
    async fn send(
        &self,
        target: &str,
        subject_name: &str,
        reason: &str,
    ) -> Result<Delivery, ChannelError> {
        let body = emergency_message(subject_name, reason);
        self.client
            .send_message(
                &whatsapp_address(target),
                &whatsapp_address(&self.from),
                &body,
            )
            .await
    }
}

pub struct TwilioVoice {
    client: Arc<TwilioClient>,
    from: String,
}

impl TwilioVoice {
    pub fn new(client: Arc<TwilioClient>, from: String) -> Self {
        Self { client, from }
    }
}

#[async_trait]
impl VoiceCallAdapter for TwilioVoice {
    async fn call(
        &self,
        phone_number: &str,
        subject_name: &str,
        reason: &str,
        callback_url: &str,
    ) -> Result<Delivery, ChannelError> {
        let twiml = call_twiml(subject_name, reason, callback_url);
        self.client
            .place_call(phone_number, &self.from, &twiml, callback_url)
            .await
    }
}
