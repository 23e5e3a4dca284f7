//! Generic subscription worker.
//!
//! `StreamWorker` pulls messages from a [`MessageSource`], hands them to a
//! [`StreamHandler`] one at a time, and settles each message only after the
//! handler has returned.

use crate::config::WorkerConfig;
use crate::error::StreamError;
use crate::metrics::SubscriptionMetrics;
use crate::registry::{Disposition, StreamHandler};
use crate::source::{BusMessage, MessageSource};
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

const MAX_BACKOFF_SECS: u64 = 30;

/// Sequential worker for one subscription.
///
/// A message is always settled exactly once: with the handler's
/// disposition, or with the panic disposition if the handler panics.
pub struct StreamWorker<S, H>
where
    S: MessageSource,
    H: StreamHandler,
{
    source: S,
    handler: Arc<H>,
    config: WorkerConfig,
    metrics: SubscriptionMetrics,
    on_panic: Disposition,
}

impl<S, H> StreamWorker<S, H>
where
    S: MessageSource,
    H: StreamHandler,
{
    pub fn new(source: S, handler: Arc<H>, config: WorkerConfig) -> Self {
        let metrics = SubscriptionMetrics::new(source.subscription(), handler.name());
        Self {
            source,
            handler,
            config,
            metrics,
            on_panic: Disposition::Ack,
        }
    }

    /// Disposition used when the handler panics (default: ack)
    pub fn with_panic_disposition(mut self, disposition: Disposition) -> Self {
        self.on_panic = disposition;
        self
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Run the worker loop until the shutdown channel flips to `true`.
    ///
    /// The message in flight when shutdown is requested is finished and
    /// settled before the loop exits.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<(), StreamError> {
        info!(
            subscription = %self.source.subscription(),
            stream = %self.config.stream_name,
            consumer_id = %self.config.consumer_id,
            handler = %self.handler.name(),
            "Starting stream worker"
        );

        self.source.init().await?;

        let poll_interval = Duration::from_millis(self.config.poll_interval_ms);
        let mut consecutive_errors: u32 = 0;

        loop {
            if *shutdown.borrow() {
                info!("Received shutdown signal, stopping worker");
                break;
            }

            match self.poll_once(&shutdown).await {
                Ok(handled) => {
                    if consecutive_errors > 0 {
                        info!("Subscription recovered after {} errors", consecutive_errors);
                        consecutive_errors = 0;
                    }
                    if handled > 0 {
                        continue;
                    }
                }
                Err(e) => {
                    consecutive_errors += 1;
                    self.metrics.fetch_error();

                    if e.is_nogroup_error() {
                        warn!("Consumer group missing, recreating...");
                        if let Err(create_err) = self.source.init().await {
                            error!(error = %create_err, "Failed to recreate consumer group");
                        }
                    } else if e.is_connection_error() {
                        let backoff_secs =
                            std::cmp::min(2u64.pow(consecutive_errors.min(5)), MAX_BACKOFF_SECS);
                        warn!(
                            error = %e,
                            consecutive_errors = %consecutive_errors,
                            backoff_secs = %backoff_secs,
                            "Bus connection error, backing off"
                        );
                        tokio::time::sleep(Duration::from_secs(backoff_secs)).await;
                    } else {
                        error!(error = %e, "Error fetching messages");
                    }
                }
            }

            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Received shutdown signal, stopping worker");
                        break;
                    }
                }
                _ = tokio::time::sleep(poll_interval) => {}
            }
        }

        info!(subscription = %self.source.subscription(), "Stream worker stopped");
        Ok(())
    }

    /// Fetch one batch and handle it in order. Returns the number of
    /// messages handled.
    ///
    /// Messages left in the batch after shutdown was requested are not
    /// handled; the bus redelivers them.
    pub async fn poll_once(&self, shutdown: &watch::Receiver<bool>) -> Result<usize, StreamError> {
        let batch = self.source.fetch().await?;
        let mut handled = 0;

        for message in batch {
            if *shutdown.borrow() {
                debug!(message_id = %message.id, "Shutdown requested, leaving message unsettled");
                break;
            }
            self.handle_message(&message).await;
            handled += 1;
        }

        Ok(handled)
    }

    async fn handle_message(&self, message: &BusMessage) {
        self.metrics.message_received(message.is_redelivery());
        let start = Instant::now();

        let disposition = match AssertUnwindSafe(self.handler.handle(message))
            .catch_unwind()
            .await
        {
            Ok(disposition) => disposition,
            Err(_) => {
                self.metrics.handler_panicked();
                error!(
                    message_id = %message.id,
                    handler = %self.handler.name(),
                    disposition = %self.on_panic,
                    "Handler panicked"
                );
                self.on_panic
            }
        };

        let settled = match disposition {
            Disposition::Ack => self.source.ack(&message.id).await,
            Disposition::Nack => self.source.nack(&message.id).await,
        };

        match settled {
            Ok(()) => {
                self.metrics.message_settled(disposition, start.elapsed());
                debug!(
                    message_id = %message.id,
                    disposition = %disposition,
                    delivery_count = message.delivery_count,
                    "Settled message"
                );
            }
            Err(e) => {
                // Unsettled messages are redelivered after the ack deadline.
                self.metrics.settle_error();
                error!(
                    message_id = %message.id,
                    disposition = %disposition,
                    error = %e,
                    "Failed to settle message"
                );
            }
        }
    }
}
