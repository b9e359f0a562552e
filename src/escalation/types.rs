use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Urgency of an alert. Decides how long to wait for an acknowledgment per channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertPriority {
    Critical,
    High,
    Medium,
    Low,
}

impl AlertPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertPriority::Critical => "critical",
            AlertPriority::High => "high",
            AlertPriority::Medium => "medium",
            AlertPriority::Low => "low",
        }
    }
}

impl std::fmt::Display for AlertPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryChannel {
    Push,
    WhatsApp,
    Sms,
    Email,
    Call,
}

/// Fixed cascade order, least intrusive first.
pub const CASCADE: [DeliveryChannel; 5] = [
    DeliveryChannel::Push,
    DeliveryChannel::WhatsApp,
    DeliveryChannel::Sms,
    DeliveryChannel::Email,
    DeliveryChannel::Call,
];

impl DeliveryChannel {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryChannel::Push => "push",
            DeliveryChannel::WhatsApp => "whatsapp",
            DeliveryChannel::Sms => "sms",
            DeliveryChannel::Email => "email",
            DeliveryChannel::Call => "call",
        }
    }

    /// The contact address this channel delivers to, if the contact has one.
    pub fn address<'a>(&self, contact: &'a CaregiverContact) -> Option<&'a str> {
        let value = match self {
            DeliveryChannel::Push => contact.push_token.as_deref(),
            DeliveryChannel::WhatsApp | DeliveryChannel::Sms | DeliveryChannel::Call => {
                contact.phone_number.as_deref()
            }
            DeliveryChannel::Email => contact.email.as_deref(),
        };
        value.filter(|v| !v.trim().is_empty())
    }
}

impl std::fmt::Display for DeliveryChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaregiverContact {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub push_token: Option<String>,
    #[serde(default)]
    pub phone_number: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    /// 1 is the primary contact.
    #[serde(default = "default_priority")]
    pub priority: u32,
}

fn default_priority() -> u32 {
    1
}

/// One delivery try on one channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertAttempt {
    pub channel: DeliveryChannel,
    /// Contact id the attempt targeted, if any.
    pub contact_id: Option<String>,
    pub success: bool,
    pub message_id: Option<String>,
    pub error: Option<String>,
    pub attempted_at: DateTime<Utc>,
    pub latency_ms: u64,
}

/// Auditable outcome of one cascade.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EscalationResult {
    pub alert_id: String,
    pub subject_name: String,
    pub reason: String,
    pub priority: AlertPriority,
    pub attempts: Vec<AlertAttempt>,
    pub acknowledged: bool,
    pub acknowledged_by: Option<String>,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Last channel that delivered successfully.
    pub final_channel: Option<DeliveryChannel>,
    /// The cascade was stopped by its cancellation token.
    #[serde(default)]
    pub cancelled: bool,
}

impl EscalationResult {
    pub fn successful_attempts(&self) -> usize {
        self.attempts.iter().filter(|a| a.success).count()
    }
}

/// Summary of a cascade still in progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveAlert {
    pub alert_id: String,
    pub subject_name: String,
    pub reason: String,
    pub priority: AlertPriority,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Acknowledgment {
    pub by: String,
    pub at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contact() -> CaregiverContact {
        CaregiverContact {
            id: "c1".into(),
            name: "Ana".into(),
            push_token: Some("tok".into()),
            phone_number: Some("  ".into()),
            email: None,
            priority: 1,
        }
    }

    #[test]
    fn test_cascade_order() {
        let names: Vec<_> = CASCADE.iter().map(|c| c.as_str()).collect();
        assert_eq!(names, vec!["push", "whatsapp", "sms", "email", "call"]);
    }

    #[test]
    fn test_channel_address_ignores_blank_values() {
        let c = contact();
        assert_eq!(DeliveryChannel::Push.address(&c), Some("tok"));
        assert_eq!(DeliveryChannel::Sms.address(&c), None);
        assert_eq!(DeliveryChannel::Email.address(&c), None);
    }

    #[test]
    fn test_serde_names() {
        assert_eq!(
            serde_json::to_string(&DeliveryChannel::WhatsApp).unwrap(),
            "\"whatsapp\""
        );
        assert_eq!(
            serde_json::to_string(&AlertPriority::Critical).unwrap(),
            "\"critical\""
        );
        let c: CaregiverContact = serde_json::from_str(r#"{"id":"x","name":"Y"}"#).unwrap();
        assert_eq!(c.priority, 1);
    }
}
