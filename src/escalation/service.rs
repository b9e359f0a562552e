//! Alert cascade
//!
//! Channels are tried in `CASCADE` order. After a channel delivers to at least
//! one caregiver, non-critical alerts wait up to the priority's timeout for an
//! acknowledgment before moving on. Critical alerts never wait. An
//! acknowledgment or a cancellation stops the cascade at the next boundary.

use chrono::Utc;
use dashmap::DashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::audit::EscalationAudit;
use super::channels::{ChannelError, ChannelSet, Delivery};
use super::types::{
    Acknowledgment, ActiveAlert, AlertAttempt, AlertPriority, CaregiverContact, DeliveryChannel,
    EscalationResult, CASCADE,
};
use crate::metrics::RelayMetrics;
use crate::settings::EscalationSettings;

pub const MISSED_CALL_REASON: &str = "Did not answer the scheduled check-in call";

#[derive(Default)]
struct AckState {
    finished: bool,
    ack: Option<Acknowledgment>,
}

/// Bookkeeping for a cascade that is still running.
struct LiveAlert {
    summary: ActiveAlert,
    state: Mutex<AckState>,
    /// Flips to true on the first acknowledgment.
    acked: watch::Sender<bool>,
}

impl LiveAlert {
    fn is_acknowledged(&self) -> bool {
        *self.acked.borrow()
    }
}

enum AckWait {
    Acknowledged,
    TimedOut,
    Cancelled,
}

pub struct EscalationService {
    channels: ChannelSet,
    audit: Arc<dyn EscalationAudit>,
    settings: EscalationSettings,
    live: DashMap<String, Arc<LiveAlert>>,
    metrics: Arc<RelayMetrics>,
}

impl EscalationService {
    pub fn new(
        channels: ChannelSet,
        audit: Arc<dyn EscalationAudit>,
        settings: EscalationSettings,
        metrics: Arc<RelayMetrics>,
    ) -> Self {
        log::info!("Escalation: configured channels {:?}", channels);
        Self {
            channels,
            audit,
            settings,
            live: DashMap::new(),
            metrics,
        }
    }

    /// Run a full cascade and return its auditable result.
    ///
    /// Cancelling `cancel` stops the cascade at the next boundary; the partial
    /// result is still audited and returned.
    pub async fn send_emergency_alert(
        &self,
        cancel: &CancellationToken,
        subject_name: &str,
        reason: &str,
        priority: AlertPriority,
        contacts: &[CaregiverContact],
    ) -> EscalationResult {
        let alert_id = format!("alert-{}", uuid::Uuid::new_v4().simple());
        let started_at = Utc::now();

        let mut contacts = contacts.to_vec();
        contacts.sort_by_key(|c| c.priority);

        let (acked_tx, mut acked_rx) = watch::channel(false);
        let live = Arc::new(LiveAlert {
            summary: ActiveAlert {
                alert_id: alert_id.clone(),
                subject_name: subject_name.to_string(),
                reason: reason.to_string(),
                priority,
                started_at,
            },
            state: Mutex::new(AckState::default()),
            acked: acked_tx,
        });
        self.live.insert(alert_id.clone(), live.clone());
        self.metrics.alert_started();

        log::warn!(
            "Escalation {}: {} alert for {} ({} contacts): {}",
            alert_id,
            priority,
            subject_name,
            contacts.len(),
            reason
        );

        let mut result = EscalationResult {
            alert_id: alert_id.clone(),
            subject_name: subject_name.to_string(),
            reason: reason.to_string(),
            priority,
            attempts: Vec::new(),
            acknowledged: false,
            acknowledged_by: None,
            acknowledged_at: None,
            started_at,
            completed_at: None,
            final_channel: None,
            cancelled: false,
        };

        let ack_timeout = self.settings.ack_timeout(priority);

        for channel in CASCADE {
            if live.is_acknowledged() {
                log::info!("Escalation {}: acknowledged, stopping cascade", alert_id);
                break;
            }
            if cancel.is_cancelled() {
                log::warn!("Escalation {}: cancelled before {}", alert_id, channel);
                result.cancelled = true;
                break;
            }

            let delivered = self
                .try_channel(channel, &alert_id, subject_name, reason, &contacts, &mut result)
                .await;
            if !delivered {
                continue;
            }
            result.final_channel = Some(channel);

            if priority == AlertPriority::Critical {
                continue;
            }

            match wait_for_ack(&mut acked_rx, ack_timeout, cancel).await {
                AckWait::Acknowledged => {
                    log::info!("Escalation {}: acknowledged after {}", alert_id, channel);
                    break;
                }
                AckWait::TimedOut => {
                    log::info!(
                        "Escalation {}: no acknowledgment within {:?} after {}",
                        alert_id,
                        ack_timeout,
                        channel
                    );
                }
                AckWait::Cancelled => {
                    log::warn!("Escalation {}: cancelled while waiting", alert_id);
                    result.cancelled = true;
                    break;
                }
            }
        }

        self.finish(&live, &mut result).await;
        result
    }

    /// Medium-priority alert for a subject who missed a check-in call.
    pub async fn send_missed_call_alert(
        &self,
        cancel: &CancellationToken,
        subject_name: &str,
        contacts: &[CaregiverContact],
    ) -> EscalationResult {
        self.send_emergency_alert(
            cancel,
            subject_name,
            MISSED_CALL_REASON,
            AlertPriority::Medium,
            contacts,
        )
        .await
    }

    /// Record an acknowledgment. Returns false if the alert is unknown or already finished.
    pub fn acknowledge_alert(&self, alert_id: &str, acknowledged_by: &str) -> bool {
        let Some(live) = self.live.get(alert_id).map(|e| e.value().clone()) else {
            log::info!("Escalation {}: acknowledgment for unknown alert", alert_id);
            return false;
        };

        {
            let Ok(mut state) = live.state.lock() else {
                return false;
            };
            if state.finished {
                return false;
            }
            if state.ack.is_none() {
                state.ack = Some(Acknowledgment {
                    by: acknowledged_by.to_string(),
                    at: Utc::now(),
                });
                self.metrics.alert_acknowledged();
            }
        }

        live.acked.send_replace(true);
        log::info!("Escalation {}: acknowledged by {}", alert_id, acknowledged_by);
        true
    }

    /// Cascades still running, oldest first.
    pub fn active_alerts(&self) -> Vec<ActiveAlert> {
        let mut alerts: Vec<ActiveAlert> = self
            .live
            .iter()
            .map(|e| e.value().summary.clone())
            .collect();
        alerts.sort_by_key(|a| a.started_at);
        alerts
    }

    pub fn configured_channels(&self) -> Vec<DeliveryChannel> {
        self.channels.configured()
    }

    fn callback_url(&self, alert_id: &str) -> String {
        format!(
            "{}/callback/call-ack?alert_id={}",
            self.settings.callback_url.trim_end_matches('/'),
            alert_id
        )
    }

    /// Deliver on one channel. Returns true if at least one caregiver was reached.
    async fn try_channel(
        &self,
        channel: DeliveryChannel,
        alert_id: &str,
        subject_name: &str,
        reason: &str,
        contacts: &[CaregiverContact],
        result: &mut EscalationResult,
    ) -> bool {
        if channel == DeliveryChannel::Call {
            let Some(adapter) = self.channels.call.as_ref() else {
                result.attempts.push(failed_attempt(
                    channel,
                    None,
                    ChannelError::NotConfigured(channel).to_string(),
                ));
                return false;
            };
            // Calls only go to the primary caregiver.
            let primary = contacts
                .iter()
                .find(|c| c.priority == 1)
                .and_then(|c| channel.address(c).map(|addr| (c, addr)));
            let Some((contact, phone)) = primary else {
                result.attempts.push(failed_attempt(
                    channel,
                    None,
                    "no primary contact with a phone number".to_string(),
                ));
                return false;
            };
            let callback = self.callback_url(alert_id);
            let started = Instant::now();
            let outcome = adapter.call(phone, subject_name, reason, &callback).await;
            let attempt = record_attempt(channel, &contact.id, started, outcome);
            log_attempt(alert_id, &attempt);
            let success = attempt.success;
            result.attempts.push(attempt);
            return success;
        }

        let Some(adapter) = self.channels.message_adapter(channel) else {
            result.attempts.push(failed_attempt(
                channel,
                None,
                ChannelError::NotConfigured(channel).to_string(),
            ));
            return false;
        };

        let targets: Vec<(&CaregiverContact, &str)> = contacts
            .iter()
            .filter_map(|c| channel.address(c).map(|addr| (c, addr)))
            .collect();
        if targets.is_empty() {
            result.attempts.push(failed_attempt(
                channel,
                None,
                format!("no contact with a {} address", channel),
            ));
            return false;
        }

        let mut delivered = false;
        for (contact, address) in targets {
            let started = Instant::now();
            let outcome = adapter.send(address, subject_name, reason).await;
            let attempt = record_attempt(channel, &contact.id, started, outcome);
            log_attempt(alert_id, &attempt);
            delivered |= attempt.success;
            result.attempts.push(attempt);
        }
        delivered
    }

    async fn finish(&self, live: &LiveAlert, result: &mut EscalationResult) {
        let alert_id = result.alert_id.clone();
        if let Ok(mut state) = live.state.lock() {
            state.finished = true;
            if let Some(ack) = state.ack.clone() {
                result.acknowledged = true;
                result.acknowledged_by = Some(ack.by);
                result.acknowledged_at = Some(ack.at);
            }
        }
        self.live.remove(&alert_id);
        result.completed_at = Some(Utc::now());

        if result.acknowledged {
            log::info!(
                "Escalation {}: finished, acknowledged ({} attempts)",
                alert_id,
                result.attempts.len()
            );
        } else {
            log::warn!(
                "Escalation {}: finished WITHOUT acknowledgment ({} attempts, {} delivered)",
                alert_id,
                result.attempts.len(),
                result.successful_attempts()
            );
            self.metrics.record_error(
                "escalation",
                format!("alert {} was not acknowledged", alert_id),
                None,
            );
        }

        if let Err(e) = self.audit.record(result).await {
            log::error!("Escalation {}: failed to write audit record: {}", alert_id, e);
        }
    }
}

async fn wait_for_ack(
    acked_rx: &mut watch::Receiver<bool>,
    timeout: Duration,
    cancel: &CancellationToken,
) -> AckWait {
    tokio::select! {
        biased;

        _ = cancel.cancelled() => AckWait::Cancelled,
        waited = tokio::time::timeout(timeout, acked_rx.wait_for(|acked| *acked)) => {
            match waited {
                Ok(Ok(_)) => AckWait::Acknowledged,
                _ => AckWait::TimedOut,
            }
        }
    }
}

fn failed_attempt(
    channel: DeliveryChannel,
    contact_id: Option<String>,
    error: String,
) -> AlertAttempt {
    AlertAttempt {
        channel,
        contact_id,
        success: false,
        message_id: None,
        error: Some(error),
        attempted_at: Utc::now(),
        latency_ms: 0,
    }
}

fn record_attempt(
    channel: DeliveryChannel,
    contact_id: &str,
    started: Instant,
    outcome: Result<Delivery, ChannelError>,
) -> AlertAttempt {
    let latency_ms = started.elapsed().as_millis() as u64;
    let (success, message_id, error) = match outcome {
        Ok(Delivery {
            success: true,
            message_id,
        }) => (true, message_id, None),
        Ok(Delivery { message_id, .. }) => {
            (false, message_id, Some("provider reported failure".to_string()))
        }
        Err(e) => (false, None, Some(e.to_string())),
    };
    AlertAttempt {
        channel,
        contact_id: Some(contact_id.to_string()),
        success,
        message_id,
        error,
        attempted_at: Utc::now(),
        latency_ms,
    }
}

fn log_attempt(alert_id: &str, attempt: &AlertAttempt) {
    match &attempt.error {
        None => log::info!(
            "Escalation {}: {} delivered to contact {:?} in {}ms",
            alert_id,
            attempt.channel,
            attempt.contact_id,
            attempt.latency_ms
        ),
        Some(err) => log::warn!(
            "Escalation {}: {} failed for contact {:?}: {}",
            alert_id,
            attempt.channel,
            attempt.contact_id,
            err
        ),
    }
}
