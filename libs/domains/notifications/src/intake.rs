//! Event intake: decodes bus messages and routes them to the immediate or
//! digest path, then turns the outcome into an ack/nack decision.

use crate::delivery::DeliveryEngine;
use crate::digest::{AddOutcome, DigestAggregator};
use crate::error::NotificationError;
use crate::models::{DeliveryOrder, EventEnvelope, NotificationEvent, Subscription};
use crate::store::NotificationStore;
use crate::templates::{IMMEDIATE_TEMPLATE, ImmediateData, NotificationView, Renderer, to_template_data};
use async_trait::async_trait;
use chrono::Utc;
use metrics::counter;
use std::collections::HashMap;
use std::sync::Arc;
use stream_worker::{BusMessage, Disposition, StreamHandler};
use tracing::{debug, error, info, warn};

/// What happened to one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IntakeOutcome {
    /// Immediate email sent and marked as sent.
    Delivered,
    /// Added to the user's pending digest.
    Queued,
    /// Already pending in the user's digest.
    Duplicate,
    /// User does not want instant email.
    Skipped,
    /// Payload could not be decoded.
    Malformed,
    /// Template missing or failed.
    RenderFailed,
    /// Delivery rejected or retries exhausted.
    DeliveryFailed,
    /// Store lookup or mark-as-sent failed.
    StoreFailed,
    /// Anything else.
    Internal,
}

impl IntakeOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            IntakeOutcome::Delivered => "delivered",
            IntakeOutcome::Queued => "queued",
            IntakeOutcome::Duplicate => "duplicate",
            IntakeOutcome::Skipped => "skipped",
            IntakeOutcome::Malformed => "malformed",
            IntakeOutcome::RenderFailed => "render_failed",
            IntakeOutcome::DeliveryFailed => "delivery_failed",
            IntakeOutcome::StoreFailed => "store_failed",
            IntakeOutcome::Internal => "internal",
        }
    }
}

/// Maps intake outcomes to bus dispositions.
///
/// Every outcome acks unless overridden. Acking failures means a failed
/// immediate notification is never retried through the bus; the error log
/// and the `intake_events_total` counter are the only trace of it.
#[derive(Debug, Clone, Default)]
pub struct AckPolicy {
    overrides: HashMap<IntakeOutcome, Disposition>,
}

impl AckPolicy {
    pub fn with(mut self, outcome: IntakeOutcome, disposition: Disposition) -> Self {
        self.overrides.insert(outcome, disposition);
        self
    }

    /// Redeliver events whose store access failed.
    pub fn nack_on_store_failure(self) -> Self {
        self.with(IntakeOutcome::StoreFailed, Disposition::Nack)
    }

    pub fn disposition(&self, outcome: IntakeOutcome) -> Disposition {
        self.overrides
            .get(&outcome)
            .copied()
            .unwrap_or(Disposition::Ack)
    }
}

pub struct EventIntake {
    store: Arc<dyn NotificationStore>,
    renderer: Arc<dyn Renderer>,
    engine: Arc<DeliveryEngine>,
    aggregator: Arc<DigestAggregator>,
    policy: AckPolicy,
    preferences_base_url: String,
}

impl EventIntake {
    pub fn new(
        store: Arc<dyn NotificationStore>,
        renderer: Arc<dyn Renderer>,
        engine: Arc<DeliveryEngine>,
        aggregator: Arc<DigestAggregator>,
        preferences_base_url: impl Into<String>,
    ) -> Self {
        Self {
            store,
            renderer,
            engine,
            aggregator,
            policy: AckPolicy::default(),
            preferences_base_url: preferences_base_url.into(),
        }
    }

    pub fn with_policy(mut self, policy: AckPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Handle one raw event and decide how to settle it.
    pub async fn handle(&self, subscription: Subscription, payload: &[u8]) -> Disposition {
        let outcome = self.process(subscription, payload).await;
        let disposition = self.policy.disposition(outcome);

        counter!(
            "intake_events_total",
            "subscription" => subscription.as_str(),
            "outcome" => outcome.as_str(),
            "disposition" => disposition.as_str()
        )
        .increment(1);
        debug!(
            subscription = %subscription,
            outcome = outcome.as_str(),
            disposition = %disposition,
            "Event handled"
        );

        disposition
    }

    /// Run the event through its path and report what happened.
    pub async fn process(&self, subscription: Subscription, payload: &[u8]) -> IntakeOutcome {
        let event = match EventEnvelope::decode(payload, Utc::now()) {
            Ok(event) => event,
            Err(err) => {
                warn!(
                    subscription = %subscription,
                    payload_len = payload.len(),
                    error = %err,
                    "Discarding malformed event"
                );
                return IntakeOutcome::Malformed;
            }
        };

        match subscription {
            Subscription::Immediate => self.deliver_immediately(event).await,
            Subscription::Daily => self.queue_for_digest(event).await,
        }
    }

    async fn queue_for_digest(&self, event: NotificationEvent) -> IntakeOutcome {
        let user_id = event.user_id;
        let recipient_email = event.recipient_email.clone();
        match self.aggregator.add(user_id, recipient_email, event).await {
            AddOutcome::Queued { .. } => IntakeOutcome::Queued,
            AddOutcome::Duplicate => IntakeOutcome::Duplicate,
        }
    }

    async fn deliver_immediately(&self, event: NotificationEvent) -> IntakeOutcome {
        let preference = match self.store.instant_delivery_preference(event.user_id).await {
            Ok(preference) => preference,
            Err(err) => return failure(&event, "preference lookup", err),
        };

        if !preference.should_send {
            debug!(user_id = %event.user_id, notification_id = %event.id, "Instant email disabled");
            return IntakeOutcome::Skipped;
        }

        let Some(to) = event.recipient_email.clone().or(preference.email) else {
            warn!(
                user_id = %event.user_id,
                notification_id = %event.id,
                "Instant email wanted but no address known"
            );
            return IntakeOutcome::Skipped;
        };

        let data = ImmediateData {
            notification: NotificationView {
                title: event.title.clone(),
                content: event.body.clone(),
                source_url: event.source_url.clone(),
                created_at: event.occurred_at,
            },
            subscription_name: event.subscription_label.clone(),
            preferences_url: format!("{}?userId={}", self.preferences_base_url, event.user_id),
        };
        let html = match to_template_data(&data)
            .and_then(|data| self.renderer.render(IMMEDIATE_TEMPLATE, &data))
        {
            Ok(html) => html,
            Err(err) => return failure(&event, "render", err),
        };

        let order = DeliveryOrder::new(to, format!("New notification: {}", event.title), html);
        if let Err(err) = self.engine.send(&order).await {
            return failure(&event, "delivery", err);
        }

        if let Err(err) = self.store.mark_as_sent(&[event.id]).await {
            return failure(&event, "mark as sent", err);
        }

        info!(user_id = %event.user_id, notification_id = %event.id, "Immediate notification delivered");
        IntakeOutcome::Delivered
    }
}

fn failure(event: &NotificationEvent, stage: &'static str, err: NotificationError) -> IntakeOutcome {
    error!(
        user_id = %event.user_id,
        notification_id = %event.id,
        stage,
        error_class = err.class(),
        error = %err,
        "Immediate notification failed"
    );
    match err {
        NotificationError::Store(_) => IntakeOutcome::StoreFailed,
        NotificationError::Template(_) => IntakeOutcome::RenderFailed,
        NotificationError::TransientDelivery(_)
        | NotificationError::RejectedDelivery(_)
        | NotificationError::DeliveryExhausted { .. } => IntakeOutcome::DeliveryFailed,
        NotificationError::Decode(_) => IntakeOutcome::Malformed,
        NotificationError::Config(_) | NotificationError::Internal(_) => IntakeOutcome::Internal,
    }
}

/// Binds an [`EventIntake`] to one subscription for a stream worker.
pub struct IntakeHandler {
    intake: Arc<EventIntake>,
    subscription: Subscription,
}

impl IntakeHandler {
    pub fn new(intake: Arc<EventIntake>, subscription: Subscription) -> Self {
        Self {
            intake,
            subscription,
        }
    }
}

#[async_trait]
impl StreamHandler for IntakeHandler {
    async fn handle(&self, message: &BusMessage) -> Disposition {
        debug!(
            message_id = %message.id,
            subscription = %self.subscription,
            delivery_count = message.delivery_count,
            "Received notification message"
        );
        self.intake.handle(self.subscription, &message.payload).await
    }

    fn name(&self) -> &'static str {
        match self.subscription {
            Subscription::Immediate => "immediate-intake",
            Subscription::Daily => "daily-intake",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delivery::RetryPolicy;
    use crate::models::InstantPreference;
    use crate::providers::{MockEmailProvider, SentEmail};
    use crate::store::MockNotificationStore;
    use crate::templates::MockRenderer;
    use mockall::Sequence;
    use mockall::predicate::eq;
    use std::time::Duration;
    use uuid::Uuid;

    const PREFS: &str = "https://app.nifya.com/settings/notifications";

    struct Mocks {
        store: MockNotificationStore,
        renderer: MockRenderer,
        provider: MockEmailProvider,
    }

    impl Mocks {
        fn new() -> Self {
            let mut provider = MockEmailProvider::new();
            provider.expect_name().return_const("mock");
            Self {
                store: MockNotificationStore::new(),
                renderer: MockRenderer::new(),
                provider,
            }
        }

        fn build(self) -> EventIntake {
            self.build_with_retries(
                RetryPolicy::default()
                    .with_max_retries(1)
                    .with_base_delay(Duration::from_millis(1)),
            )
        }

        fn build_with_retries(self, policy: RetryPolicy) -> EventIntake {
            let store: Arc<dyn NotificationStore> = Arc::new(self.store);
            let renderer: Arc<dyn Renderer> = Arc::new(self.renderer);
            let engine = Arc::new(DeliveryEngine::new(Arc::new(self.provider), policy));
            let aggregator = Arc::new(DigestAggregator::new(
                Arc::clone(&store),
                Arc::clone(&renderer),
                Arc::clone(&engine),
                PREFS,
            ));
            EventIntake::new(store, renderer, engine, aggregator, PREFS)
        }
    }

    fn payload(user_id: Uuid, notification_id: Uuid, email: Option<&str>) -> Vec<u8> {
        let mut value = serde_json::json!({
            "userId": user_id,
            "notification": {
                "id": notification_id,
                "title": "Resolution 42",
                "content": "Body",
                "sourceUrl": "https://boe.es/42",
                "subscriptionName": "BOE"
            }
        });
        if let Some(email) = email {
            value["email"] = serde_json::json!(email);
        }
        value.to_string().into_bytes()
    }

    #[test]
    fn test_default_policy_acks_everything() {
        let policy = AckPolicy::default();
        for outcome in [
            IntakeOutcome::Delivered,
            IntakeOutcome::Malformed,
            IntakeOutcome::DeliveryFailed,
            IntakeOutcome::StoreFailed,
            IntakeOutcome::Internal,
        ] {
            assert_eq!(policy.disposition(outcome), Disposition::Ack);
        }
        assert_eq!(
            policy
                .nack_on_store_failure()
                .disposition(IntakeOutcome::StoreFailed),
            Disposition::Nack
        );
    }

    #[tokio::test]
    async fn test_malformed_daily_event_is_acked_without_queueing() {
        let intake = Mocks::new().build();

        let disposition = intake.handle(Subscription::Daily, b"{not json").await;

        assert_eq!(disposition, Disposition::Ack);
        assert_eq!(intake.aggregator.pending_summary().await.users, 0);
    }

    #[tokio::test]
    async fn test_daily_event_is_queued_and_duplicate_tolerated() {
        let intake = Mocks::new().build();
        let raw = payload(Uuid::new_v4(), Uuid::new_v4(), Some("ana@example.com"));

        assert_eq!(intake.process(Subscription::Daily, &raw).await, IntakeOutcome::Queued);
        assert_eq!(intake.process(Subscription::Daily, &raw).await, IntakeOutcome::Duplicate);
        assert_eq!(intake.handle(Subscription::Daily, &raw).await, Disposition::Ack);
        assert_eq!(intake.aggregator.pending_summary().await.notifications, 1);
    }

    #[tokio::test]
    async fn test_opted_out_user_gets_no_email() {
        let user = Uuid::new_v4();
        let mut mocks = Mocks::new();
        mocks
            .store
            .expect_instant_delivery_preference()
            .with(eq(user))
            .returning(|_| {
                Ok(InstantPreference {
                    should_send: false,
                    email: Some("ana@example.com".into()),
                })
            });
        mocks.renderer.expect_render().never();
        mocks.provider.expect_send().never();
        let intake = mocks.build();

        let raw = payload(user, Uuid::new_v4(), None);
        assert_eq!(intake.process(Subscription::Immediate, &raw).await, IntakeOutcome::Skipped);
        assert_eq!(intake.handle(Subscription::Immediate, &raw).await, Disposition::Ack);
    }

    #[tokio::test]
    async fn test_immediate_delivery_marks_sent() {
        let user = Uuid::new_v4();
        let notification = Uuid::new_v4();
        let mut mocks = Mocks::new();
        mocks
            .store
            .expect_instant_delivery_preference()
            .returning(|_| {
                Ok(InstantPreference {
                    should_send: true,
                    email: Some("pref@example.com".into()),
                })
            });
        mocks
            .renderer
            .expect_render()
            .withf(|template, _| template == IMMEDIATE_TEMPLATE)
            .returning(|_, _| Ok("<p>hi</p>".into()));
        mocks
            .provider
            .expect_send()
            .withf(|order| order.to == "pref@example.com" && order.subject.contains("Resolution 42"))
            .times(1)
            .returning(|_| Ok(SentEmail::default()));
        mocks
            .store
            .expect_mark_as_sent()
            .withf(move |ids| ids.to_vec() == vec![notification])
            .times(1)
            .returning(|_| Ok(()));
        let intake = mocks.build();

        let outcome = intake
            .process(Subscription::Immediate, &payload(user, notification, None))
            .await;

        assert_eq!(outcome, IntakeOutcome::Delivered);
    }

    #[tokio::test]
    async fn test_delivery_after_two_transient_failures_marks_sent_once() {
        let notification = Uuid::new_v4();
        let mut mocks = Mocks::new();
        mocks
            .store
            .expect_instant_delivery_preference()
            .returning(|_| {
                Ok(InstantPreference {
                    should_send: true,
                    email: Some("pref@example.com".into()),
                })
            });
        mocks
            .renderer
            .expect_render()
            .returning(|_, _| Ok("<p>hi</p>".into()));

        let mut seq = Sequence::new();
        mocks
            .provider
            .expect_send()
            .times(2)
            .in_sequence(&mut seq)
            .returning(|_| Err(NotificationError::TransientDelivery("421 try later".into())));
        mocks
            .provider
            .expect_send()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(SentEmail::default()));
        mocks
            .store
            .expect_mark_as_sent()
            .withf(move |ids| ids.to_vec() == vec![notification])
            .times(1)
            .returning(|_| Ok(()));

        // Default retry count; only the delay is shortened.
        let intake = mocks.build_with_retries(
            RetryPolicy::default().with_base_delay(Duration::from_millis(1)),
        );
        let raw = payload(Uuid::new_v4(), notification, None);

        assert_eq!(intake.process(Subscription::Immediate, &raw).await, IntakeOutcome::Delivered);
    }

    #[tokio::test]
    async fn test_failed_immediate_delivery_is_acked_and_not_marked() {
        let mut mocks = Mocks::new();
        mocks
            .store
            .expect_instant_delivery_preference()
            .returning(|_| {
                Ok(InstantPreference {
                    should_send: true,
                    email: None,
                })
            });
        mocks
            .renderer
            .expect_render()
            .returning(|_, _| Ok("<p>hi</p>".into()));
        mocks
            .provider
            .expect_send()
            .times(2)
            .returning(|_| Err(NotificationError::TransientDelivery("down".into())));
        mocks.store.expect_mark_as_sent().never();
        let intake = mocks.build();

        let raw = payload(Uuid::new_v4(), Uuid::new_v4(), Some("ana@example.com"));
        assert_eq!(intake.handle(Subscription::Immediate, &raw).await, Disposition::Ack);
    }

    #[tokio::test]
    async fn test_store_failure_can_be_nacked() {
        let mut mocks = Mocks::new();
        mocks
            .store
            .expect_instant_delivery_preference()
            .returning(|_| Err(NotificationError::Store("timeout".into())));
        let intake = mocks
            .build()
            .with_policy(AckPolicy::default().nack_on_store_failure());

        let raw = payload(Uuid::new_v4(), Uuid::new_v4(), None);
        assert_eq!(intake.handle(Subscription::Immediate, &raw).await, Disposition::Nack);
    }

    #[tokio::test]
    async fn test_handler_routes_bus_message() {
        let intake = Arc::new(Mocks::new().build());
        let handler = IntakeHandler::new(Arc::clone(&intake), Subscription::Daily);
        let message = BusMessage::new("1-0", payload(Uuid::new_v4(), Uuid::new_v4(), None));

        assert_eq!(handler.handle(&message).await, Disposition::Ack);
        assert_eq!(handler.name(), "daily-intake");
        assert_eq!(intake.aggregator.pending_summary().await.notifications, 1);
    }
}
