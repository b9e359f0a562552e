//! Push notifications through FCM.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

use super::channels::{emergency_message, emergency_title, ChannelAdapter, ChannelError, Delivery};
use super::twilio::http_client;

const FCM_SEND_URL: &str = "https://fcm.googleapis.com/fcm/send";

#[derive(Debug, Deserialize)]
struct FcmResponse {
    #[serde(default)]
    success: u32,
    #[serde(default)]
    results: Vec<FcmResult>,
}

#[derive(Debug, Deserialize)]
struct FcmResult {
    #[serde(default)]
    message_id: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

pub struct FcmPush {
    server_key: String,
    url: String,
    http: Client,
}

impl FcmPush {
    pub fn new(server_key: String) -> Self {
        Self {
            server_key,
            url: FCM_SEND_URL.to_string(),
            http: http_client(),
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }
}

fn push_payload(token: &str, subject_name: &str, reason: &str) -> serde_json::Value {
    json!({
        "to": token,
        "priority": "high",
        "notification": {
            "title": emergency_title(subject_name),
            "body": emergency_message(subject_name, reason),
            "sound": "default",
        },
        "data": {
            "type": "emergency",
            "subject_name": subject_name,
            "reason": reason,
        },
    })
}

#[async_trait]
impl ChannelAdapter for FcmPush {
    async fn send(
        &self,
        target: &str,
        subject_name: &str,
        reason: &str,
    ) -> Result<Delivery, ChannelError> {
        let response = self
            .http
            .post(&self.url)
            .header("Authorization", format!("key={}", self.server_key))
            .json(&push_payload(target, subject_name, reason))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ChannelError::Rejected {
                status: status.as_u16(),
                message,
            });
        }

        let body: FcmResponse = response
            .json()
            .await
            .map_err(|e| ChannelError::Request(e.to_string()))?;
        let first = body.results.into_iter().next();

        if body.success == 0 {
            let message = first
                .and_then(|r| r.error)
                .unwrap_or_else(|| "push not delivered".to_string());
            return Err(ChannelError::Rejected {
                status: status.as_u16(),
                message,
            });
        }

        Ok(Delivery {
            success: true,
            message_id: first.and_then(|r| r.message_id),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_shape() {
        let payload = push_payload("tok", "Maria", "fell");
        assert_eq!(payload["to"], "tok");
        assert_eq!(payload["priority"], "high");
        assert_eq!(payload["data"]["type"], "emergency");
        assert!(payload["notification"]["body"]
            .as_str()
            .unwrap()
            .contains("Maria"));
    }
}
