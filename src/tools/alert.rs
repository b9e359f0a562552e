use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::{ToolContext, ToolError, ToolHandler};
use crate::directory::Directory;
use crate::escalation::{AlertPriority, EscalationService};

pub const ALERT_FAMILY: &str = "alert_family";

/// Upper bound on one background cascade.
const CASCADE_TIME_LIMIT: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Deserialize)]
struct AlertArgs {
    reason: String,
    #[serde(default)]
    severity: Option<String>,
}

/// Map the model's severity word to a priority. Missing severity means high.
pub fn priority_from_severity(severity: Option<&str>) -> AlertPriority {
    let Some(raw) = severity else {
        return AlertPriority::High;
    };
    match raw.trim().to_lowercase().as_str() {
        "critica" | "crítica" | "critical" => AlertPriority::Critical,
        "" | "alta" | "high" => AlertPriority::High,
        "media" | "média" | "medium" => AlertPriority::Medium,
        _ => AlertPriority::Low,
    }
}

/// Starts a caregiver escalation in the background and answers immediately.
pub struct AlertFamilyTool {
    escalation: Arc<EscalationService>,
    directory: Arc<dyn Directory>,
    shutdown: CancellationToken,
    time_limit: Duration,
}

impl AlertFamilyTool {
    pub fn new(
        escalation: Arc<EscalationService>,
        directory: Arc<dyn Directory>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            escalation,
            directory,
            shutdown,
            time_limit: CASCADE_TIME_LIMIT,
        }
    }
}

#[async_trait]
impl ToolHandler for AlertFamilyTool {
    async fn call(&self, ctx: &ToolContext, args: Value) -> Result<Value, ToolError> {
        let args: AlertArgs =
            serde_json::from_value(args).map_err(|e| ToolError::InvalidArgs(e.to_string()))?;
        if args.reason.trim().is_empty() {
            return Err(ToolError::InvalidArgs("reason must not be empty".to_string()));
        }
        let priority = priority_from_severity(args.severity.as_deref());

        let contacts = self
            .directory
            .contacts_for(ctx.subject.id)
            .await
            .map_err(|e| ToolError::Failed(e.to_string()))?;

        log::warn!(
            "Tools: alert_family for session {} ({}, {} contacts)",
            ctx.session_id,
            priority,
            contacts.len()
        );

        let contact_count = contacts.len();
        let escalation = self.escalation.clone();
        let subject_name = ctx.subject.name.clone();
        let reason = args.reason;
        let cancel = self.shutdown.child_token();
        let limit = self.time_limit;

        tokio::spawn(async move {
            let deadline = {
                let cancel = cancel.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(limit).await;
                    cancel.cancel();
                })
            };
            let result = escalation
                .send_emergency_alert(&cancel, &subject_name, &reason, priority, &contacts)
                .await;
            deadline.abort();
            log::info!(
                "Tools: escalation {} done (acknowledged: {})",
                result.alert_id,
                result.acknowledged
            );
        });

        Ok(json!({
            "status": "alert_started",
            "priority": priority.as_str(),
            "contacts": contact_count,
            "message": "The family is being notified.",
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::{StaticDirectory, Subject, SubjectRecord};
    use crate::escalation::{CaregiverContact, ChannelSet, MemoryAudit};
    use crate::metrics::RelayMetrics;
    use crate::settings::EscalationSettings;

    #[test]
    fn test_severity_mapping() {
        assert_eq!(priority_from_severity(Some("critica")), AlertPriority::Critical);
        assert_eq!(priority_from_severity(Some("Crítica")), AlertPriority::Critical);
        assert_eq!(priority_from_severity(Some("alta")), AlertPriority::High);
        assert_eq!(priority_from_severity(None), AlertPriority::High);
        assert_eq!(priority_from_severity(Some("media")), AlertPriority::Medium);
        assert_eq!(priority_from_severity(Some("baixa")), AlertPriority::Low);
    }

    fn subject() -> Subject {
        Subject {
            id: 3,
            identity: "999".into(),
            name: "Maria".into(),
            voice_name: None,
        }
    }

    #[tokio::test]
    async fn test_call_starts_cascade_and_returns() {
        let audit = Arc::new(MemoryAudit::new());
        let escalation = Arc::new(EscalationService::new(
            ChannelSet::default(),
            audit.clone(),
            EscalationSettings::default(),
            Arc::new(RelayMetrics::new()),
        ));
        let directory = Arc::new(StaticDirectory::from_records(vec![SubjectRecord {
            subject: subject(),
            contacts: vec![CaregiverContact {
                id: "c1".into(),
                name: "Ana".into(),
                push_token: None,
                phone_number: None,
                email: None,
                priority: 1,
            }],
        }]));
        let tool = AlertFamilyTool::new(escalation, directory, CancellationToken::new());
        let ctx = ToolContext {
            session_id: "s1".into(),
            identity: "999".into(),
            subject: subject(),
        };

        let out = tool
            .call(&ctx, json!({"reason": "fell", "severity": "critica"}))
            .await
            .unwrap();
        assert_eq!(out["status"], "alert_started");
        assert_eq!(out["priority"], "critical");
        assert_eq!(out["contacts"], 1);

        // Nothing is configured, so the background cascade finishes quickly.
        for _ in 0..50 {
            if !audit.records().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let records = audit.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].attempts.len(), 5);
        assert!(!records[0].acknowledged);
    }

    #[tokio::test]
    async fn test_missing_reason_is_invalid() {
        let escalation = Arc::new(EscalationService::new(
            ChannelSet::default(),
            Arc::new(MemoryAudit::new()),
            EscalationSettings::default(),
            Arc::new(RelayMetrics::new()),
        ));
        let tool = AlertFamilyTool::new(
            escalation,
            Arc::new(StaticDirectory::empty()),
            CancellationToken::new(),
        );
        let ctx = ToolContext {
            session_id: "s1".into(),
            identity: "999".into(),
            subject: subject(),
        };
        let err = tool.call(&ctx, json!({"severity": "alta"})).await.unwrap_err();
        assert!(matches!(err, ToolError::InvalidArgs(_)));
    }
}
