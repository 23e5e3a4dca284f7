//! Prometheus metrics for subscriptions
//!
//! Provides observability into dispositions and handler latency.

use crate::registry::Disposition;
use metrics::{counter, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;
use std::time::Duration;
use tracing::{info, warn};

static PROMETHEUS_HANDLE: OnceCell<PrometheusHandle> = OnceCell::new();

/// Initialize Prometheus metrics
///
/// Call this once at startup. Subsequent calls are no-ops.
pub fn init_metrics() {
    if PROMETHEUS_HANDLE.get().is_some() {
        return;
    }

    match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => {
            let _ = PROMETHEUS_HANDLE.set(handle);
            info!("Prometheus metrics initialized");
        }
        Err(e) => warn!(error = %e, "Failed to install Prometheus recorder"),
    }
}

/// Get the Prometheus handle for rendering metrics
pub fn prometheus_handle() -> Option<&'static PrometheusHandle> {
    PROMETHEUS_HANDLE.get()
}

/// Render metrics in Prometheus format
pub fn render_metrics() -> String {
    prometheus_handle().map(|h| h.render()).unwrap_or_default()
}

/// Per-subscription metrics helper
#[derive(Clone)]
pub struct SubscriptionMetrics {
    subscription: String,
    handler: String,
}

impl SubscriptionMetrics {
    pub fn new(subscription: impl Into<String>, handler: impl Into<String>) -> Self {
        Self {
            subscription: subscription.into(),
            handler: handler.into(),
        }
    }

    pub fn message_received(&self, redelivery: bool) {
        counter!(
            "bus_messages_received_total",
            "subscription" => self.subscription.clone(),
            "redelivery" => if redelivery { "true" } else { "false" }
        )
        .increment(1);
    }

    pub fn message_settled(&self, disposition: Disposition, duration: Duration) {
        counter!(
            "bus_messages_settled_total",
            "subscription" => self.subscription.clone(),
            "handler" => self.handler.clone(),
            "disposition" => disposition.as_str()
        )
        .increment(1);

        histogram!(
            "bus_handler_duration_seconds",
            "subscription" => self.subscription.clone(),
            "handler" => self.handler.clone()
        )
        .record(duration.as_secs_f64());
    }

    pub fn handler_panicked(&self) {
        counter!(
            "bus_handler_panics_total",
            "subscription" => self.subscription.clone(),
            "handler" => self.handler.clone()
        )
        .increment(1);
    }

    pub fn fetch_error(&self) {
        counter!(
            "bus_fetch_errors_total",
            "subscription" => self.subscription.clone()
        )
        .increment(1);
    }

    pub fn settle_error(&self) {
        counter!(
            "bus_settle_errors_total",
            "subscription" => self.subscription.clone()
        )
        .increment(1);
    }
}
