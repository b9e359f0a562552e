//! Email alerts through the SendGrid v3 API.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;

use super::channels::{emergency_message, emergency_title, ChannelAdapter, ChannelError, Delivery};
use super::twilio::http_client;

const SENDGRID_SEND_URL: &str = "https://api.sendgrid.com/v3/mail/send";

pub struct SendGridEmail {
    api_key: String,
    from: String,
    url: String,
    http: Client,
}

impl SendGridEmail {
    pub fn new(api_key: String, from: String) -> Self {
        Self {
            api_key,
            from,
            url: SENDGRID_SEND_URL.to_string(),
            http: http_client(),
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }
}

fn mail_payload(from: &str, to: &str, subject_name: &str, reason: &str) -> serde_json::Value {
    json!({
        "personalizations": [{"to": [{"email": to}]}],
        "from": {"email": from},
        "subject": emergency_title(subject_name),
        "content": [{
            "type": "text/plain",
            "value": emergency_message(subject_name, reason),
        }],
    })
}

#[async_trait]
impl ChannelAdapter for SendGridEmail {
    async fn send(
        &self,
        target: &str,
        subject_name: &str,
        reason: &str,
    ) -> Result<Delivery, ChannelError> {
        let response = self
            .http
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(&mail_payload(&self.from, target, subject_name, reason))
            .send()
            .await?;

        let status = response.status();
        let message_id = response
            .headers()
            .get("X-Message-Id")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        if status.is_success() {
            Ok(Delivery {
                success: true,
                message_id,
            })
        } else {
            let message = response.text().await.unwrap_or_default();
            Err(ChannelError::Rejected {
                status: status.as_u16(),
                message,
            })
        }
    }
}
