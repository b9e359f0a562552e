//! Delivery channel seams
//!
//! Every provider sits behind one of two traits so the cascade can run
//! against fakes in tests. A channel left as `None` is "not configured".

use async_trait::async_trait;
use std::sync::Arc;

use super::DeliveryChannel;

#[derive(Debug, Clone, thiserror::Error)]
pub enum ChannelError {
    #[error("{0} not configured")]
    NotConfigured(DeliveryChannel),
    #[error("request failed: {0}")]
    Request(String),
    #[error("provider rejected message ({status}): {message}")]
    Rejected { status: u16, message: String },
}

impl From<reqwest::Error> for ChannelError {
    fn from(e: reqwest::Error) -> Self {
        ChannelError::Request(e.to_string())
    }
}

/// Provider acknowledgment of one delivery.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Delivery {
    pub success: bool,
    pub message_id: Option<String>,
}

impl Delivery {
    pub fn accepted(message_id: impl Into<String>) -> Self {
        Self {
            success: true,
            message_id: Some(message_id.into()),
        }
    }
}

/// Message-style channel (push, WhatsApp, SMS, email).
#[async_trait]
pub trait ChannelAdapter: Send + Sync + 'static {
    async fn send(&self, target: &str, subject_name: &str, reason: &str)
        -> Result<Delivery, ChannelError>;
}

/// Outbound voice call. The provider hits `callback_url` when the callee presses a key.
#[async_trait]
pub trait VoiceCallAdapter: Send + Sync + 'static {
    async fn call(
        &self,
        phone_number: &str,
        subject_name: &str,
        reason: &str,
        callback_url: &str,
    ) -> Result<Delivery, ChannelError>;
}

/// Configured adapters, one slot per cascade channel.
#[derive(Clone, Default)]
pub struct ChannelSet {
    pub push: Option<Arc<dyn ChannelAdapter>>,
    pub whatsapp: Option<Arc<dyn ChannelAdapter>>,
    pub sms: Option<Arc<dyn ChannelAdapter>>,
    pub email: Option<Arc<dyn ChannelAdapter>>,
    pub call: Option<Arc<dyn VoiceCallAdapter>>,
}

impl ChannelSet {
    pub fn message_adapter(&self, channel: DeliveryChannel) -> Option<&Arc<dyn ChannelAdapter>> {
        match channel {
            DeliveryChannel::Push => self.push.as_ref(),
            DeliveryChannel::WhatsApp => self.whatsapp.as_ref(),
            DeliveryChannel::Sms => self.sms.as_ref(),
            DeliveryChannel::Email => self.email.as_ref(),
            DeliveryChannel::Call => None,
        }
    }

    pub fn is_configured(&self, channel: DeliveryChannel) -> bool {
        match channel {
            DeliveryChannel::Call => self.call.is_some(),
            other => self.message_adapter(other).is_some(),
        }
    }

    pub fn configured(&self) -> Vec<DeliveryChannel> {
        super::CASCADE
            .into_iter()
            .filter(|c| self.is_configured(*c))
            .collect()
    }
}

impl std::fmt::Debug for ChannelSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.configured()).finish()
    }
}

/// Text used by SMS, WhatsApp and email bodies.
pub fn emergency_message(subject_name: &str, reason: &str) -> String {
    format!(
        "ALERT: {} needs urgent help. Reason: {}. Please check on them right away.",
        subject_name, reason
    )
}

pub fn emergency_title(subject_name: &str) -> String {
    format!("Emergency: {}", subject_name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_set_has_nothing_configured() {
        let set = ChannelSet::default();
        assert!(set.configured().is_empty());
        assert!(set.message_adapter(DeliveryChannel::Push).is_none());
    }

    #[test]
    fn test_message_template() {
        let text = emergency_message("Maria", "fell in the kitchen");
        assert!(text.starts_with("ALERT: Maria needs urgent help."));
        assert!(text.contains("fell in the kitchen"));
    }

    #[test]
    fn test_not_configured_display() {
        let err = ChannelError::NotConfigured(DeliveryChannel::Sms);
        assert_eq!(err.to_string(), "sms not configured");
    }
}
