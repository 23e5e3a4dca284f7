//! Stream Worker Framework
//!
//! Event-bus plumbing for at-least-once subscriptions over Redis Streams.
//!
//! ## Features
//!
//! - **`MessageSource`**: `{id, payload}` messages with explicit `ack` / `nack`
//! - **Redis subscriptions**: one consumer group per subscription; unacknowledged
//!   entries are redelivered once their ack deadline elapses
//! - **Sequential worker**: `StreamWorker<S, H>` keeps one message in flight per
//!   subscription and settles it only after the handler returns
//! - **Prometheus metrics**: dispositions, handler latency, fetch errors
//!
//! ## Example
//!
//! ```ignore
//! use stream_worker::{RedisSubscription, StreamDef, StreamWorker, WorkerConfig};
//!
//! struct DailyStream;
//! impl StreamDef for DailyStream {
//!     const STREAM_NAME: &'static str = "email-notifications:daily";
//!     const CONSUMER_GROUP: &'static str = "email-notifications-daily-sub";
//! }
//!
//! let config = WorkerConfig::from_stream_def::<DailyStream>();
//! let source = RedisSubscription::new(redis, config.clone());
//! let worker = StreamWorker::new(source, handler, config);
//! worker.run(shutdown_rx).await?;
//! ```

mod config;
mod consumer;
mod error;
pub mod metrics;
mod producer;
mod registry;
mod source;
mod worker;

pub use config::WorkerConfig;
pub use consumer::RedisSubscription;
pub use error::StreamError;
pub use metrics::{init_metrics, render_metrics};
pub use producer::StreamProducer;
pub use registry::{Disposition, StreamDef, StreamHandler};
pub use source::{BusMessage, MessageSource};
pub use worker::StreamWorker;
