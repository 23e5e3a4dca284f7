//! Delivery engine: one rendered message, bounded retries, exponential backoff.

use crate::error::{NotificationError, NotificationResult};
use crate::models::{DeliveryOrder, DeliveryReceipt};
use crate::providers::{EmailProvider, SentEmail};
use metrics::counter;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Retry policy for a single delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry; doubles on each further retry.
    pub base_delay: Duration,
    /// Ceiling for any single backoff delay.
    pub max_delay: Duration,
    /// Upper bound for one transport attempt.
    pub attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(30_000),
            attempt_timeout: Duration::from_millis(30_000),
        }
    }
}

impl RetryPolicy {
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    /// Delay before retry number `retry` (0-based): `min(2^retry * base, max)`.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry);
        self.base_delay
            .checked_mul(factor)
            .map_or(self.max_delay, |d| d.min(self.max_delay))
    }
}

/// Outcome of one transport attempt.
enum AttemptOutcome {
    Delivered(SentEmail),
    Retryable(NotificationError),
    Fatal(NotificationError),
}

/// Sends a [`DeliveryOrder`] through an [`EmailProvider`], retrying
/// transient failures.
///
/// A started retry sequence always runs to success, a fatal failure or
/// exhaustion. Providers resolve credentials on each `send`, so every
/// attempt uses fresh ones.
pub struct DeliveryEngine {
    provider: Arc<dyn EmailProvider>,
    policy: RetryPolicy,
}

impl DeliveryEngine {
    pub fn new(provider: Arc<dyn EmailProvider>, policy: RetryPolicy) -> Self {
        Self { provider, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn provider_name(&self) -> &'static str {
        self.provider.name()
    }

    pub async fn health_check(&self) -> NotificationResult<bool> {
        self.provider.health_check().await
    }

    /// Deliver `order`.
    ///
    /// Fatal failures are returned as-is after one attempt. Retryable failures
    /// are retried up to `max_retries` times; after that the last error is
    /// wrapped in [`NotificationError::DeliveryExhausted`].
    pub async fn send(&self, order: &DeliveryOrder) -> NotificationResult<DeliveryReceipt> {
        let mut retry: u32 = 0;

        loop {
            let attempt = retry + 1;

            match self.attempt(order).await {
                AttemptOutcome::Delivered(sent) => {
                    self.record("delivered");
                    info!(
                        to = %order.to,
                        attempt,
                        provider = self.provider.name(),
                        message_id = ?sent.message_id,
                        "Email delivered"
                    );
                    return Ok(DeliveryReceipt {
                        attempts: attempt,
                        message_id: sent.message_id,
                    });
                }
                AttemptOutcome::Fatal(err) => {
                    self.record("fatal");
                    error!(
                        to = %order.to,
                        attempt,
                        error_class = err.class(),
                        error = %err,
                        "Email delivery failed permanently"
                    );
                    return Err(err);
                }
                AttemptOutcome::Retryable(err) => {
                    self.record("retryable");

                    if retry >= self.policy.max_retries {
                        error!(
                            to = %order.to,
                            attempts = attempt,
                            error_class = err.class(),
                            error = %err,
                            "Email delivery exhausted all retries"
                        );
                        return Err(NotificationError::DeliveryExhausted {
                            attempts: attempt,
                            last: Box::new(err),
                        });
                    }

                    let delay = self.policy.delay_for(retry);
                    warn!(
                        to = %order.to,
                        attempt,
                        next_attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        error_class = err.class(),
                        error = %err,
                        "Email delivery failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    retry += 1;
                }
            }
        }
    }

    async fn attempt(&self, order: &DeliveryOrder) -> AttemptOutcome {
        match tokio::time::timeout(self.policy.attempt_timeout, self.provider.send(order)).await {
            Ok(Ok(sent)) => AttemptOutcome::Delivered(sent),
            Ok(Err(err)) if err.is_retryable() => AttemptOutcome::Retryable(err),
            Ok(Err(err)) => AttemptOutcome::Fatal(err),
            Err(_) => AttemptOutcome::Retryable(NotificationError::TransientDelivery(format!(
                "attempt timed out after {}ms",
                self.policy.attempt_timeout.as_millis()
            ))),
        }
    }

    fn record(&self, outcome: &'static str) {
        counter!(
            "email_delivery_attempts_total",
            "provider" => self.provider.name(),
            "outcome" => outcome
        )
        .increment(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::MockEmailProvider;
    use async_trait::async_trait;
    use mockall::Sequence;

    fn order() -> DeliveryOrder {
        DeliveryOrder::new("ana@example.com", "Daily Notification Summary", "<p>hi</p>")
    }

    fn transient() -> NotificationError {
        NotificationError::TransientDelivery("connection reset".into())
    }

    fn engine(provider: MockEmailProvider, max_retries: u32) -> DeliveryEngine {
        DeliveryEngine::new(
            Arc::new(provider),
            RetryPolicy::default().with_max_retries(max_retries),
        )
    }

    fn mock_provider() -> MockEmailProvider {
        let mut provider = MockEmailProvider::new();
        provider.expect_name().return_const("mock");
        provider
    }

    #[test]
    fn test_delay_doubles_and_is_capped() {
        let policy = RetryPolicy::default();

        assert_eq!(policy.delay_for(0), Duration::from_secs(1));
        assert_eq!(policy.delay_for(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for(2), Duration::from_secs(4));
        assert_eq!(policy.delay_for(5), Duration::from_secs(30));
        assert_eq!(policy.delay_for(40), Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_on_first_attempt() {
        let mut provider = mock_provider();
        provider.expect_send().times(1).returning(|_| {
            Ok(SentEmail {
                message_id: Some("abc".into()),
            })
        });

        let receipt = engine(provider, 3).send(&order()).await.unwrap();

        assert_eq!(receipt.attempts, 1);
        assert_eq!(receipt.message_id.as_deref(), Some("abc"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_two_failures_then_success_uses_three_attempts() {
        let mut provider = mock_provider();
        let mut seq = Sequence::new();
        provider
            .expect_send()
            .times(2)
            .in_sequence(&mut seq)
            .returning(|_| Err(transient()));
        provider
            .expect_send()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(SentEmail::default()));

        let started = tokio::time::Instant::now();
        let receipt = engine(provider, 3).send(&order()).await.unwrap();

        assert_eq!(receipt.attempts, 3);
        // 1s + 2s of backoff
        assert_eq!(started.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_after_max_retries() {
        let mut provider = mock_provider();
        provider
            .expect_send()
            .times(4)
            .returning(|_| Err(transient()));

        let err = engine(provider, 3).send(&order()).await.unwrap_err();

        match err {
            NotificationError::DeliveryExhausted { attempts, last } => {
                assert_eq!(attempts, 4);
                assert!(matches!(*last, NotificationError::TransientDelivery(_)));
            }
            other => panic!("expected DeliveryExhausted, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_error_is_not_retried() {
        let mut provider = mock_provider();
        provider
            .expect_send()
            .times(1)
            .returning(|_| Err(NotificationError::RejectedDelivery("550 no such user".into())));

        let err = engine(provider, 3).send(&order()).await.unwrap_err();

        assert!(matches!(err, NotificationError::RejectedDelivery(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_retries_means_single_attempt() {
        let mut provider = mock_provider();
        provider
            .expect_send()
            .times(1)
            .returning(|_| Err(transient()));

        let err = engine(provider, 0).send(&order()).await.unwrap_err();

        assert!(matches!(err, NotificationError::DeliveryExhausted { attempts: 1, .. }));
    }

    /// Hangs on the first call, succeeds afterwards.
    struct SlowOnceProvider {
        calls: std::sync::atomic::AtomicU32,
    }

    #[async_trait]
    impl EmailProvider for SlowOnceProvider {
        async fn send(&self, _order: &DeliveryOrder) -> NotificationResult<SentEmail> {
            let call = self
                .calls
                .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            if call == 0 {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            Ok(SentEmail::default())
        }

        fn name(&self) -> &'static str {
            "slow"
        }

        async fn health_check(&self) -> NotificationResult<bool> {
            Ok(true)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempt_timeout_is_retried() {
        let provider = Arc::new(SlowOnceProvider {
            calls: std::sync::atomic::AtomicU32::new(0),
        });
        let engine = DeliveryEngine::new(
            provider,
            RetryPolicy::default()
                .with_attempt_timeout(Duration::from_millis(50))
                .with_base_delay(Duration::from_millis(10)),
        );

        let receipt = engine.send(&order()).await.unwrap();

        assert_eq!(receipt.attempts, 2);
    }
}
