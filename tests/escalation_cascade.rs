use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use care_relay::escalation::{
    AlertPriority, CaregiverContact, ChannelAdapter, ChannelError, ChannelSet, Delivery,
    DeliveryChannel, EscalationResult, EscalationService, MemoryAudit, VoiceCallAdapter,
    MISSED_CALL_REASON,
};
use care_relay::metrics::RelayMetrics;
use care_relay::settings::EscalationSettings;

#[derive(Default)]
struct FakeChannel {
    fail: bool,
    sent: Mutex<Vec<String>>,
}

impl FakeChannel {
    fn ok() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn failing() -> Arc<Self> {
        Arc::new(Self {
            fail: true,
            ..Self::default()
        })
    }

    fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChannelAdapter for FakeChannel {
    async fn send(
        &self,
        target: &str,
        _subject_name: &str,
        _reason: &str,
    ) -> Result<Delivery, ChannelError> {
        self.sent.lock().unwrap().push(target.to_string());
        if self.fail {
            Err(ChannelError::Rejected {
                status: 500,
                message: "provider down".into(),
            })
        } else {
            Ok(Delivery::accepted(format!("msg-{}", target)))
        }
    }
}

#[derive(Default)]
struct FakeCall {
    fail: bool,
    calls: Mutex<Vec<(String, String)>>,
}

#[async_trait]
impl VoiceCallAdapter for FakeCall {
    async fn call(
        &self,
        phone_number: &str,
        _subject_name: &str,
        _reason: &str,
        callback_url: &str,
    ) -> Result<Delivery, ChannelError> {
        self.calls
            .lock()
            .unwrap()
            .push((phone_number.to_string(), callback_url.to_string()));
        if self.fail {
            Err(ChannelError::Request("no answer".into()))
        } else {
            Ok(Delivery::accepted("CA123"))
        }
    }
}

struct Fakes {
    push: Arc<FakeChannel>,
    whatsapp: Arc<FakeChannel>,
    sms: Arc<FakeChannel>,
    email: Arc<FakeChannel>,
    call: Arc<FakeCall>,
}

impl Fakes {
    fn all(fail: bool) -> Self {
        let make = || if fail { FakeChannel::failing() } else { FakeChannel::ok() };
        Self {
            push: make(),
            whatsapp: make(),
            sms: make(),
            email: make(),
            call: Arc::new(FakeCall {
                fail,
                ..FakeCall::default()
            }),
        }
    }

    fn channel_set(&self) -> ChannelSet {
        ChannelSet {
            push: Some(self.push.clone()),
            whatsapp: Some(self.whatsapp.clone()),
            sms: Some(self.sms.clone()),
            email: Some(self.email.clone()),
            call: Some(self.call.clone()),
        }
    }
}

fn contact(id: &str, priority: u32) -> CaregiverContact {
    CaregiverContact {
        id: id.into(),
        name: format!("Caregiver {}", id),
        push_token: Some(format!("token-{}", id)),
        phone_number: Some(format!("+55{}", priority)),
        email: Some(format!("{}@example.com", id)),
        priority,
    }
}

fn service(channels: ChannelSet) -> (Arc<EscalationService>, Arc<MemoryAudit>) {
    let audit = Arc::new(MemoryAudit::new());
    let service = Arc::new(EscalationService::new(
        channels,
        audit.clone(),
        EscalationSettings::default(),
        Arc::new(RelayMetrics::new()),
    ));
    (service, audit)
}

fn channels_tried(result: &EscalationResult) -> Vec<DeliveryChannel> {
    result.attempts.iter().map(|a| a.channel).collect()
}

#[tokio::test(start_paused = true)]
async fn test_high_priority_stops_on_acknowledgment() {
    let fakes = Fakes::all(false);
    let (service, audit) = service(fakes.channel_set());
    let cancel = CancellationToken::new();

    let task = {
        let service = service.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            service
                .send_emergency_alert(
                    &cancel,
                    "Maria",
                    "fell in the kitchen",
                    AlertPriority::High,
                    &[contact("ana", 1)],
                )
                .await
        })
    };

    tokio::time::sleep(Duration::from_secs(1)).await;
    let active = service.active_alerts();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].priority, AlertPriority::High);
    assert!(service.acknowledge_alert(&active[0].alert_id, "ana"));

    let result = task.await.unwrap();
    assert!(result.acknowledged);
    assert_eq!(result.acknowledged_by.as_deref(), Some("ana"));
    assert_eq!(channels_tried(&result), vec![DeliveryChannel::Push]);
    assert_eq!(result.successful_attempts(), 1);
    assert_eq!(result.final_channel, Some(DeliveryChannel::Push));
    assert!(fakes.whatsapp.sent().is_empty());
    assert!(fakes.call.calls.lock().unwrap().is_empty());

    assert!(service.active_alerts().is_empty());
    assert_eq!(audit.records().len(), 1);
    assert_eq!(audit.records()[0].alert_id, result.alert_id);
}

#[tokio::test(start_paused = true)]
async fn test_full_exhaustion_records_every_channel() {
    let fakes = Fakes::all(true);
    let (service, audit) = service(fakes.channel_set());
    let start = Instant::now();

    let result = service
        .send_emergency_alert(
            &CancellationToken::new(),
            "Maria",
            "no response",
            AlertPriority::High,
            &[contact("ana", 1)],
        )
        .await;

    assert_eq!(
        channels_tried(&result),
        vec![
            DeliveryChannel::Push,
            DeliveryChannel::WhatsApp,
            DeliveryChannel::Sms,
            DeliveryChannel::Email,
            DeliveryChannel::Call,
        ]
    );
    assert!(result.attempts.iter().all(|a| !a.success && a.error.is_some()));
    assert!(!result.acknowledged);
    assert_eq!(result.final_channel, None);
    assert!(result.completed_at.is_some());
    // Failed channels never wait for an acknowledgment.
    assert_eq!(start.elapsed(), Duration::ZERO);
    assert_eq!(audit.records().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_critical_never_waits() {
    let fakes = Fakes::all(false);
    let (service, _audit) = service(fakes.channel_set());
    let start = Instant::now();

    let result = service
        .send_emergency_alert(
            &CancellationToken::new(),
            "Maria",
            "chest pain",
            AlertPriority::Critical,
            &[contact("ana", 1)],
        )
        .await;

    assert_eq!(start.elapsed(), Duration::ZERO);
    assert_eq!(result.attempts.len(), 5);
    assert_eq!(result.successful_attempts(), 5);
    assert!(!result.acknowledged);
    assert_eq!(result.final_channel, Some(DeliveryChannel::Call));
}

#[tokio::test(start_paused = true)]
async fn test_unacknowledged_waits_full_timeout_per_channel() {
    let fakes = Fakes::all(false);
    let (service, _audit) = service(fakes.channel_set());
    let start = Instant::now();

    let result = service
        .send_emergency_alert(
            &CancellationToken::new(),
            "Maria",
            "dizzy",
            AlertPriority::Medium,
            &[contact("ana", 1)],
        )
        .await;

    assert_eq!(result.attempts.len(), 5);
    assert_eq!(start.elapsed(), Duration::from_secs(5 * 300));
}

#[tokio::test]
async fn test_unconfigured_channels_are_recorded() {
    let push = FakeChannel::failing();
    let (service, _audit) = service(ChannelSet {
        push: Some(push.clone()),
        ..ChannelSet::default()
    });

    let result = service
        .send_emergency_alert(
            &CancellationToken::new(),
            "Maria",
            "fell",
            AlertPriority::Low,
            &[contact("ana", 1)],
        )
        .await;

    assert_eq!(result.attempts.len(), 5);
    assert_eq!(push.sent(), vec!["token-ana".to_string()]);
    for attempt in &result.attempts[1..] {
        assert!(attempt
            .error
            .as_deref()
            .unwrap_or_default()
            .contains("not configured"));
    }
}

#[tokio::test]
async fn test_fan_out_to_contacts_and_call_primary_only() {
    let fakes = Fakes::all(false);
    let mut channels = fakes.channel_set();
    channels.push = Some(FakeChannel::failing());
    channels.whatsapp = Some(FakeChannel::failing());
    channels.sms = Some(FakeChannel::failing());
    channels.email = Some(FakeChannel::failing());
    let (service, _audit) = service(channels);

    // Listed out of order; the primary is still the one called.
    let contacts = vec![contact("bob", 2), contact("ana", 1)];
    let result = service
        .send_emergency_alert(
            &CancellationToken::new(),
            "Maria",
            "fell",
            AlertPriority::Critical,
            &contacts,
        )
        .await;

    let sms: Vec<_> = result
        .attempts
        .iter()
        .filter(|a| a.channel == DeliveryChannel::Sms)
        .collect();
    assert_eq!(sms.len(), 2);
    assert_eq!(sms[0].contact_id.as_deref(), Some("ana"));
    assert_eq!(sms[1].contact_id.as_deref(), Some("bob"));

    let calls = fakes.call.calls.lock().unwrap().clone();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0, "+551");
    assert!(calls[0]
        .1
        .ends_with(&format!("/callback/call-ack?alert_id={}", result.alert_id)));
    assert_eq!(result.final_channel, Some(DeliveryChannel::Call));
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_returns_partial_result() {
    let fakes = Fakes::all(false);
    let (service, audit) = service(fakes.channel_set());
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(10)).await;
            cancel.cancel();
        });
    }
    let start = Instant::now();

    let result = service
        .send_emergency_alert(&cancel, "Maria", "fell", AlertPriority::High, &[contact("ana", 1)])
        .await;

    assert!(result.cancelled);
    assert!(!result.acknowledged);
    assert_eq!(channels_tried(&result), vec![DeliveryChannel::Push]);
    assert_eq!(start.elapsed(), Duration::from_secs(10));
    assert_eq!(audit.records().len(), 1);
}

#[tokio::test]
async fn test_late_acknowledgment_is_rejected() {
    let fakes = Fakes::all(true);
    let (service, _audit) = service(fakes.channel_set());

    let result = service
        .send_emergency_alert(
            &CancellationToken::new(),
            "Maria",
            "fell",
            AlertPriority::High,
            &[contact("ana", 1)],
        )
        .await;

    assert!(!service.acknowledge_alert(&result.alert_id, "ana"));
    assert!(!service.acknowledge_alert("alert-unknown", "ana"));
}

#[tokio::test]
async fn test_missed_call_alert_is_medium_priority() {
    let fakes = Fakes::all(true);
    let (service, _audit) = service(fakes.channel_set());

    let result = service
        .send_missed_call_alert(&CancellationToken::new(), "Maria", &[contact("ana", 1)])
        .await;

    assert_eq!(result.priority, AlertPriority::Medium);
    assert_eq!(result.reason, MISSED_CALL_REASON);
}
