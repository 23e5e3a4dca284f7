//! HTTP control surface.
//!
//! Thin handlers over the dispatch core: manual digest flushes, a test
//! email, pending-state inspection, health and Prometheus metrics.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use core_config::AppInfo;
use domain_notifications::templates::{TEST_TEMPLATE, TestEmailData, to_template_data};
use domain_notifications::{
    DeliveryEngine, DeliveryOrder, DigestAggregator, NotificationError, PendingSummary, Renderer,
};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

pub const TEST_EMAIL_SUBJECT: &str = "Test Email from Nifya Email Service";

/// Shared state for the control surface.
#[derive(Clone)]
pub struct AppState {
    pub aggregator: Arc<DigestAggregator>,
    pub engine: Arc<DeliveryEngine>,
    pub renderer: Arc<dyn Renderer>,
    pub test_email: String,
    pub subscriptions: Vec<String>,
    pub app_info: AppInfo,
}

/// Error body `{ "error": "..." }`. Details go to the log only.
#[derive(Debug)]
pub enum ApiError {
    Flush(NotificationError),
    TestEmail(NotificationError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let message = match &self {
            ApiError::Flush(e) => {
                error!(error = %e, "Digest flush failed");
                "Failed to process emails"
            }
            ApiError::TestEmail(e) => {
                error!(error = %e, "Test email failed");
                "Failed to send test email"
            }
        };
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": message })),
        )
            .into_response()
    }
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub name: &'static str,
    pub version: &'static str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FlushResponse {
    pub message: &'static str,
    pub users_processed: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub pending: PendingSummary,
    pub subscriptions: Vec<String>,
    pub provider: &'static str,
}

async fn root_handler() -> &'static str {
    "Email service is running"
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        name: state.app_info.name,
        version: state.app_info.version,
    })
}

async fn process_handler(State(state): State<AppState>) -> Result<Json<FlushResponse>, ApiError> {
    info!("Manual digest flush requested");
    let report = state.aggregator.flush().await.map_err(ApiError::Flush)?;

    Ok(Json(FlushResponse {
        message: "Email processing completed successfully",
        users_processed: report.users_processed,
    }))
}

async fn test_email_handler(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let data = to_template_data(&TestEmailData { sent_at: Utc::now() }).map_err(ApiError::TestEmail)?;
    let html = state
        .renderer
        .render(TEST_TEMPLATE, &data)
        .map_err(ApiError::TestEmail)?;

    let order = DeliveryOrder::new(state.test_email.as_str(), TEST_EMAIL_SUBJECT, html);
    let receipt = state.engine.send(&order).await.map_err(ApiError::TestEmail)?;

    info!(to = %order.to, attempts = receipt.attempts, "Test email sent");
    Ok(Json(json!({ "message": "Test email sent successfully" })))
}

async fn status_handler(State(state): State<AppState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        pending: state.aggregator.pending_summary().await,
        subscriptions: state.subscriptions.clone(),
        provider: state.engine.provider_name(),
    })
}

async fn metrics_handler() -> impl IntoResponse {
    (
        [("content-type", "text/plain; version=0.0.4")],
        stream_worker::render_metrics(),
    )
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root_handler))
        .route("/health", get(health_handler))
        .route("/process", post(process_handler))
        .route("/process-daily", post(process_handler))
        .route("/test-email", post(test_email_handler))
        .route("/status", get(status_handler))
        .route("/metrics", get(metrics_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
