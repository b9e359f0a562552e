//! Caregiver alert escalation
//!
//! When the assistant decides a subject needs help, caregivers are reached
//! through a cascade of channels until one of them acknowledges.
//!
//! ```text
//! push ──▶ whatsapp ──▶ sms ──▶ email ──▶ call (primary caregiver only)
//!   │          │          │        │
//!   └── wait for ack (skipped for critical) ──▶ stop on ack / cancel
//! ```

mod audit;
mod channels;
mod email;
mod push;
mod service;
mod twilio;
mod types;

use std::sync::Arc;

pub use audit::{AuditError, EscalationAudit, JsonlAuditLog, MemoryAudit};
pub use channels::{
    emergency_message, ChannelAdapter, ChannelError, ChannelSet, Delivery, VoiceCallAdapter,
};
pub use email::SendGridEmail;
pub use push::FcmPush;
pub use service::{EscalationService, MISSED_CALL_REASON};
pub use twilio::{TwilioClient, TwilioSms, TwilioVoice, TwilioWhatsApp};
pub use types::{
    Acknowledgment, ActiveAlert, AlertAttempt, AlertPriority, CaregiverContact, DeliveryChannel,
    EscalationResult, CASCADE,
};

use crate::settings::ChannelCredentials;

/// Build the provider adapters that have credentials. Missing ones stay `None`.
pub fn channels_from_credentials(creds: &ChannelCredentials) -> ChannelSet {
    let mut set = ChannelSet::default();

    if let Some(key) = &creds.fcm_server_key {
        set.push = Some(Arc::new(FcmPush::new(key.clone())));
    }

    if let Some(client) = TwilioClient::from_credentials(creds) {
        let client = Arc::new(client);
        if let Some(from) = &creds.twilio_from_whatsapp {
            set.whatsapp = Some(Arc::new(TwilioWhatsApp::new(client.clone(), from.clone())));
        }
        if let Some(from) = &creds.twilio_from_number {
            set.sms = Some(Arc::new(TwilioSms::new(client.clone(), from.clone())));
            set.call = Some(Arc::new(TwilioVoice::new(client, from.clone())));
        }
    }

    if let (Some(key), Some(from)) = (&creds.sendgrid_api_key, &creds.alert_from_email) {
        set.email = Some(Arc::new(SendGridEmail::new(key.clone(), from.clone())));
    }

    set
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channels_from_credentials() {
        let creds = ChannelCredentials {
            twilio_account_sid: Some("AC1".into()),
            twilio_auth_token: Some("tok".into()),
            twilio_from_number: Some("+1555".into()),
            fcm_server_key: Some("fcm".into()),
            ..ChannelCredentials::default()
        };
        let set = channels_from_credentials(&creds);
        assert_eq!(
            set.configured(),
            vec![
                DeliveryChannel::Push,
                DeliveryChannel::Sms,
                DeliveryChannel::Call
            ]
        );
    }

    #[test]
    fn test_no_credentials_no_channels() {
        let set = channels_from_credentials(&ChannelCredentials::default());
        assert!(set.configured().is_empty());
    }
}
