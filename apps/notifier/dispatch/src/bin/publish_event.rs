//! Publish a synthetic notification event onto a subscription stream.
//!
//! Run with: cargo run -p notifier_dispatch --bin publish_event -- --subscription daily

use chrono::Utc;
use clap::{Parser, ValueEnum};
use core_config::redis::RedisConfig;
use core_config::tracing::install_color_eyre;
use core_config::{FromEnv, env_or_default};
use domain_notifications::{DailyStream, EventEnvelope, ImmediateStream, NotificationEvent};
use eyre::{Result, WrapErr};
use stream_worker::{StreamDef, StreamProducer};
use uuid::Uuid;

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Target {
    Immediate,
    Daily,
}

#[derive(Parser)]
#[command(name = "publish_event")]
#[command(about = "Publish a test notification event to Redis Streams")]
struct Cli {
    /// Which subscription stream to publish to
    #[arg(short, long, value_enum, default_value = "immediate")]
    subscription: Target,

    /// Recipient user (random when omitted)
    #[arg(short, long)]
    user_id: Option<Uuid>,

    /// Recipient address carried on the event
    #[arg(short, long)]
    email: Option<String>,

    /// Subscription label shown in the email
    #[arg(short, long, default_value = "Test subscription")]
    label: String,

    #[arg(short, long, default_value = "Test notification")]
    title: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    install_color_eyre();
    let cli = Cli::parse();

    let redis_config = RedisConfig::from_env().wrap_err("REDIS_URL must be set")?;
    println!("Connecting to Redis at {}", redis_config.url);
    let redis = database::redis::connect(&redis_config)
        .await
        .wrap_err("Failed to connect to Redis")?;

    let stream = match cli.subscription {
        Target::Immediate => env_or_default("IMMEDIATE_STREAM", ImmediateStream::STREAM_NAME),
        Target::Daily => env_or_default("DAILY_STREAM", DailyStream::STREAM_NAME),
    };
    let producer = StreamProducer::new(redis, stream);

    let event = NotificationEvent {
        id: Uuid::new_v4(),
        user_id: cli.user_id.unwrap_or_else(Uuid::new_v4),
        title: cli.title,
        body: "This notification was published by the publish_event tool.".to_string(),
        source_url: String::new(),
        subscription_label: cli.label,
        occurred_at: Utc::now(),
        recipient_email: cli.email,
    };

    let message_id = producer
        .publish_json(&EventEnvelope::from(&event))
        .await
        .wrap_err("Failed to publish event")?;

    println!("Published to {}", producer.stream_name());
    println!("Notification ID: {}", event.id);
    println!("User ID: {}", event.user_id);
    println!("Stream ID: {}", message_id);

    Ok(())
}
