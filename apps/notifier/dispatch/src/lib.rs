//! Notification Dispatch Service
//!
//! Consumes notification events from two Redis Stream subscriptions and
//! turns them into email, either immediately or as a daily digest.
//!
//! ## Architecture
//!
//! ```text
//! email-notifications:immediate      email-notifications:daily
//!   ↓ (StreamWorker)                   ↓ (StreamWorker)
//! EventIntake ───────────────────────→ DigestAggregator ← cron / POST /process
//!   ↓                                    ↓
//! DeliveryEngine (retry + backoff) ←─────┘
//!   ↓
//! EmailProvider (SendGrid/SMTP)
//! ```
//!
//! ## Features
//!
//! - One message in flight per subscription, acked after handling
//! - Daily digest on a cron schedule, plus manual flush over HTTP
//! - Graceful shutdown of workers, scheduler and HTTP server
//! - Prometheus metrics on `/metrics`

pub mod config;
pub mod routes;

use crate::config::DispatchConfig;
use crate::routes::AppState;
use core_config::database::DatabaseConfig;
use core_config::redis::RedisConfig;
use core_config::{Environment, FromEnv, app_info};
use domain_notifications::{
    DailyStream, DeliveryEngine, DigestAggregator, EmailProvider, EventIntake, ImmediateStream,
    IntakeHandler, NotificationStore, PgNotificationStore, Renderer, SendGridProvider,
    SmtpProvider, Subscription, TemplateEngine,
};
use eyre::{Result, WrapErr};
use std::sync::Arc;
use stream_worker::{RedisSubscription, StreamWorker, WorkerConfig};
use tokio::signal;
use tokio::sync::watch;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, warn};

/// Run the dispatch service until SIGINT or SIGTERM.
///
/// # Errors
///
/// Returns an error if configuration is invalid, Postgres or Redis stay
/// unreachable after retries, the email provider cannot be configured, or
/// the HTTP listener cannot bind.
pub async fn run() -> Result<()> {
    // Initialize tracing (env-aware: JSON for prod, pretty for dev)
    let environment = Environment::from_env();
    core_config::tracing::init_tracing(&environment);

    stream_worker::init_metrics();

    let app_info = app_info!();
    info!(
        name = %app_info.name,
        version = %app_info.version,
        "Starting notification dispatch service"
    );
    info!("Environment: {:?}", environment);

    let config = DispatchConfig::from_env().wrap_err("Invalid dispatch configuration")?;
    let db_config = DatabaseConfig::from_env().wrap_err("Invalid database configuration")?;
    let redis_config = RedisConfig::from_env().wrap_err("Invalid Redis configuration")?;

    let db = database::postgres::connect_with_retry(&db_config, None)
        .await
        .wrap_err("Failed to connect to PostgreSQL")?;
    let redis = database::redis::connect_with_retry(&redis_config, None)
        .await
        .wrap_err("Failed to connect to Redis")?;

    let provider = email_provider(&environment)?;
    let renderer: Arc<dyn Renderer> =
        Arc::new(TemplateEngine::new().wrap_err("Failed to initialize template engine")?);
    let store: Arc<dyn NotificationStore> = Arc::new(
        PgNotificationStore::new(db).with_lookback_hours(config.digest_lookback_hours),
    );
    let engine = Arc::new(DeliveryEngine::new(provider, config.retry_policy()));
    let aggregator = Arc::new(DigestAggregator::new(
        store.clone(),
        renderer.clone(),
        engine.clone(),
        config.preferences_base_url.as_str(),
    ));
    let intake = Arc::new(EventIntake::new(
        store,
        renderer.clone(),
        engine.clone(),
        aggregator.clone(),
        config.preferences_base_url.as_str(),
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    tokio::spawn(async move {
        if let Err(e) = shutdown_signal().await {
            error!("Error waiting for shutdown signal: {}", e);
        }
        let _ = shutdown_tx.send(true);
    });

    // Subscriptions
    let immediate_config = WorkerConfig::from_stream_def::<ImmediateStream>()
        .with_stream_name(config.immediate_stream.as_str());
    let daily_config = WorkerConfig::from_stream_def::<DailyStream>()
        .with_stream_name(config.daily_stream.as_str());
    let subscriptions = vec![
        immediate_config.consumer_group.clone(),
        daily_config.consumer_group.clone(),
    ];

    let immediate_worker = StreamWorker::new(
        RedisSubscription::new(redis.clone(), immediate_config.clone()),
        Arc::new(IntakeHandler::new(intake.clone(), Subscription::Immediate)),
        immediate_config,
    );
    let daily_worker = StreamWorker::new(
        RedisSubscription::new(redis, daily_config.clone()),
        Arc::new(IntakeHandler::new(intake, Subscription::Daily)),
        daily_config,
    );

    let immediate_handle = {
        let shutdown = shutdown_rx.clone();
        tokio::spawn(async move { immediate_worker.run(shutdown).await })
    };
    let daily_handle = {
        let shutdown = shutdown_rx.clone();
        tokio::spawn(async move { daily_worker.run(shutdown).await })
    };

    let mut scheduler = digest_scheduler(&config.digest_schedule, aggregator.clone()).await?;

    // HTTP control surface
    let state = AppState {
        aggregator,
        engine,
        renderer,
        test_email: config.test_email.clone(),
        subscriptions,
        app_info,
    };

    let address = config.server.address();
    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .wrap_err_with(|| format!("Failed to bind {}", address))?;
    info!(address = %address, "Control surface listening");

    let mut server_shutdown = shutdown_rx.clone();
    axum::serve(listener, routes::router(state))
        .with_graceful_shutdown(async move {
            let _ = server_shutdown.wait_for(|stop| *stop).await;
        })
        .await
        .wrap_err("HTTP server failed")?;

    if let Err(e) = scheduler.shutdown().await {
        warn!(error = %e, "Failed to stop digest scheduler");
    }

    for (name, handle) in [("immediate", immediate_handle), ("daily", daily_handle)] {
        match handle.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(subscription = name, error = %e, "Stream worker failed"),
            Err(e) => error!(subscription = name, error = %e, "Stream worker task aborted"),
        }
    }

    info!("Notification dispatch service stopped");
    Ok(())
}

/// SendGrid in production, SMTP (Mailpit/MailHog or Gmail OAuth2) otherwise.
fn email_provider(environment: &Environment) -> Result<Arc<dyn EmailProvider>> {
    match environment {
        Environment::Production => {
            info!("Using SendGrid provider for production");
            let provider = SendGridProvider::from_env().wrap_err(
                "SendGrid configuration error. Ensure SENDGRID_API_KEY and SENDGRID_FROM_EMAIL are set.",
            )?;
            Ok(Arc::new(provider))
        }
        Environment::Development => {
            info!("Using SMTP provider for development");
            let provider = SmtpProvider::from_env().wrap_err("SMTP configuration error")?;
            Ok(Arc::new(provider))
        }
    }
}

/// Start a scheduler that flushes the daily digest on `schedule`.
async fn digest_scheduler(
    schedule: &str,
    aggregator: Arc<DigestAggregator>,
) -> Result<JobScheduler> {
    info!(cron = schedule, "Scheduling daily digest");

    let scheduler = JobScheduler::new()
        .await
        .wrap_err("Failed to create digest scheduler")?;

    let job = Job::new_async(schedule, move |_uuid, _lock| {
        let aggregator = aggregator.clone();

        Box::pin(async move {
            info!("Running scheduled digest flush");

            match aggregator.flush().await {
                Ok(report) => {
                    info!(
                        users_processed = report.users_processed,
                        users_failed = report.users_failed,
                        notifications_sent = report.notifications_sent,
                        "Scheduled digest flush complete"
                    );
                }
                Err(e) => {
                    error!(error = %e, "Scheduled digest flush failed");
                }
            }
        })
    })
    .wrap_err_with(|| format!("Invalid DIGEST_SCHEDULE '{}'", schedule))?;

    scheduler.add(job).await.wrap_err("Failed to add digest job")?;
    scheduler
        .start()
        .await
        .wrap_err("Failed to start digest scheduler")?;

    Ok(scheduler)
}

/// Wait for a shutdown signal (SIGINT or SIGTERM)
async fn shutdown_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        let mut terminate = signal::unix::signal(signal::unix::SignalKind::terminate())?;

        tokio::select! {
            result = signal::ctrl_c() => {
                result?;
                info!("Received Ctrl+C, initiating shutdown...");
            },
            _ = terminate.recv() => {
                info!("Received SIGTERM, initiating shutdown...");
            },
        }
    }

    #[cfg(not(unix))]
    {
        signal::ctrl_c().await?;
        info!("Received Ctrl+C, initiating shutdown...");
    }

    Ok(())
}
