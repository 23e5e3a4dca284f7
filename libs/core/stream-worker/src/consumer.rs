//! Redis Streams subscription
//!
//! One consumer group per subscription. New entries come from
//! `XREADGROUP >`; entries left pending longer than the ack deadline are
//! reclaimed with `XCLAIM` and redelivered.

use crate::config::WorkerConfig;
use crate::error::StreamError;
use crate::source::{BusMessage, MessageSource};
use async_trait::async_trait;
use redis::RedisResult;
use redis::aio::ConnectionManager;
use tracing::{debug, info, warn};

/// Field holding the message payload in each stream entry
pub(crate) const PAYLOAD_FIELD: &str = "payload";

type StreamEntry = (String, Vec<(String, Vec<u8>)>);
type StreamEntries = Vec<StreamEntry>;

/// Redis Streams implementation of [`MessageSource`]
pub struct RedisSubscription {
    redis: ConnectionManager,
    config: WorkerConfig,
}

impl RedisSubscription {
    pub fn new(redis: ConnectionManager, config: WorkerConfig) -> Self {
        Self { redis, config }
    }

    pub fn stream_name(&self) -> &str {
        &self.config.stream_name
    }

    pub fn consumer_id(&self) -> &str {
        &self.config.consumer_id
    }

    /// Reclaim entries whose previous delivery was never settled
    async fn claim_expired(&self) -> Result<Vec<BusMessage>, StreamError> {
        let mut conn = self.redis.clone();

        // (id, consumer, idle ms, delivery count)
        let pending: RedisResult<Vec<(String, String, u64, u64)>> = redis::cmd("XPENDING")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg("IDLE")
            .arg(self.config.ack_deadline_ms)
            .arg("-")
            .arg("+")
            .arg(self.config.batch_size)
            .query_async(&mut conn)
            .await;

        let pending = match pending {
            Ok(p) => p,
            Err(e) if e.to_string().contains("NOGROUP") => return Ok(vec![]),
            Err(e) => return Err(StreamError::Redis(e)),
        };

        if pending.is_empty() {
            return Ok(vec![]);
        }

        let mut cmd = redis::cmd("XCLAIM");
        cmd.arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg(&self.config.consumer_id)
            .arg(self.config.ack_deadline_ms);
        for (id, _, _, _) in &pending {
            cmd.arg(id);
        }

        // Redis < 7 answers nil for pending ids whose entry was trimmed away.
        let claimed: Vec<Option<StreamEntry>> = cmd.query_async(&mut conn).await?;
        let (messages, missing) = settle_claimed(&pending, claimed);

        for id in missing {
            // Ids another consumer claimed first are also missing; only
            // entries gone from the stream are dropped.
            let entry: StreamEntries = redis::cmd("XRANGE")
                .arg(&self.config.stream_name)
                .arg(&id)
                .arg(&id)
                .query_async(&mut conn)
                .await?;
            if entry.is_empty() {
                warn!(
                    subscription = %self.config.consumer_group,
                    stream_id = %id,
                    "Dropping pending entry trimmed from the stream"
                );
                let _: i64 = redis::cmd("XACK")
                    .arg(&self.config.stream_name)
                    .arg(&self.config.consumer_group)
                    .arg(&id)
                    .query_async(&mut conn)
                    .await?;
            }
        }

        if !messages.is_empty() {
            warn!(
                subscription = %self.config.consumer_group,
                count = messages.len(),
                "Redelivering messages past their ack deadline"
            );
        }

        Ok(messages)
    }

    async fn read_new(&self) -> Result<Vec<BusMessage>, StreamError> {
        let mut conn = self.redis.clone();

        let mut cmd = redis::cmd("XREADGROUP");
        cmd.arg("GROUP")
            .arg(&self.config.consumer_group)
            .arg(&self.config.consumer_id);

        if let Some(timeout) = self.config.blocking_timeout_ms {
            cmd.arg("BLOCK").arg(timeout);
        }

        cmd.arg("COUNT")
            .arg(self.config.batch_size)
            .arg("STREAMS")
            .arg(&self.config.stream_name)
            .arg(">");

        let result: RedisResult<Option<Vec<(String, StreamEntries)>>> =
            cmd.query_async(&mut conn).await;

        match result {
            Ok(Some(streams)) => Ok(streams
                .into_iter()
                .flat_map(|(_, entries)| parse_entries(entries))
                .collect()),
            Ok(None) => Ok(vec![]),
            Err(e) => Err(StreamError::Redis(e)),
        }
    }

}

fn parse_entries(entries: StreamEntries) -> Vec<BusMessage> {
    entries
        .into_iter()
        .map(|(id, fields)| {
            let payload = fields
                .into_iter()
                .find(|(k, _)| k == PAYLOAD_FIELD)
                .map(|(_, v)| v);

            // Entries without a payload are still handed out so the
            // handler decides how to settle them.
            if payload.is_none() {
                warn!(stream_id = %id, "Missing 'payload' field in stream entry");
            }

            BusMessage::new(id, payload.unwrap_or_default())
        })
        .collect()
}

/// Pair an `XCLAIM` reply with the `XPENDING` rows it was issued for.
///
/// Returns the reclaimed messages, with delivery counts including this
/// delivery, and the pending ids that were not claimed.
fn settle_claimed(
    pending: &[(String, String, u64, u64)],
    claimed: Vec<Option<StreamEntry>>,
) -> (Vec<BusMessage>, Vec<String>) {
    let present: StreamEntries = claimed.into_iter().flatten().collect();
    let missing = pending
        .iter()
        .filter(|(id, ..)| !present.iter().any(|(claimed_id, _)| claimed_id == id))
        .map(|(id, ..)| id.clone())
        .collect();

    let mut messages = parse_entries(present);
    for message in &mut messages {
        if let Some((_, _, _, count)) = pending.iter().find(|(id, ..)| *id == message.id) {
            message.delivery_count = count + 1;
        }
    }

    (messages, missing)
}

#[async_trait]
impl MessageSource for RedisSubscription {
    fn subscription(&self) -> &str {
        &self.config.consumer_group
    }

    async fn init(&self) -> Result<(), StreamError> {
        let mut conn = self.redis.clone();

        let result: RedisResult<()> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg("0")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;

        match result {
            Ok(_) => {
                info!(
                    stream = %self.config.stream_name,
                    group = %self.config.consumer_group,
                    "Created consumer group"
                );
            }
            Err(e) if e.to_string().contains("BUSYGROUP") => {
                debug!(
                    stream = %self.config.stream_name,
                    group = %self.config.consumer_group,
                    "Consumer group already exists"
                );
            }
            Err(e) => return Err(StreamError::Redis(e)),
        }

        Ok(())
    }

    async fn fetch(&self) -> Result<Vec<BusMessage>, StreamError> {
        let reclaimed = self.claim_expired().await?;
        if !reclaimed.is_empty() {
            return Ok(reclaimed);
        }
        self.read_new().await
    }

    async fn ack(&self, id: &str) -> Result<(), StreamError> {
        let mut conn = self.redis.clone();

        let _: i64 = redis::cmd("XACK")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg(id)
            .query_async(&mut conn)
            .await?;

        debug!(stream_id = %id, "Acknowledged message");
        Ok(())
    }

    async fn nack(&self, id: &str) -> Result<(), StreamError> {
        // The entry stays in the pending list and is reclaimed by
        // `claim_expired` once the ack deadline passes.
        debug!(
            stream_id = %id,
            redeliver_after_ms = self.config.ack_deadline_ms,
            "Left message pending for redelivery"
        );
        Ok(())
    }
}
