//! Input partition backed by a Redis stream consumer group.
//!
//! Entries are read one at a time with `XREADGROUP ... COUNT 1`. On startup
//! the consumer first walks its own pending entries list (entries delivered
//! earlier but never acknowledged) and only then switches to new entries
//! (`>`). That walk is what makes a withheld ack lead to redelivery.

use std::sync::{Mutex, MutexGuard};

use redis::aio::ConnectionManager;
use redis::streams::{StreamId, StreamReadOptions, StreamReadReply};
use redis::AsyncCommands;

use rater_core::traits::{InboundMessage, JobSource};
use rater_core::AppError;

/// Payload field of a stream entry.
const PAYLOAD_FIELD: &str = "payload";

pub struct RedisStreamSource {
    conn: ConnectionManager,
    stream: String,
    group: String,
    consumer: String,
    block_ms: u64,
    /// Position within the pending backlog; `None` once it is exhausted.
    backlog_cursor: Mutex<Option<String>>,
}

impl RedisStreamSource {
    /// Attach to `stream` as `consumer` in `group`, creating the group (and
    /// the stream) if needed. A new group starts at the beginning of the
    /// stream.
    pub async fn open(
        mut conn: ConnectionManager,
        stream: &str,
        group: &str,
        consumer: &str,
        block_ms: u64,
    ) -> Result<Self, AppError> {
        let created: redis::RedisResult<()> =
            conn.xgroup_create_mkstream(stream, group, "0").await;
        match created {
            Ok(()) => tracing::info!(%stream, %group, "Created consumer group"),
            Err(e) if e.code() == Some("BUSYGROUP") => {}
            Err(e) => {
                return Err(AppError::BrokerError(format!(
                    "Failed to create consumer group {group} on {stream}: {e}"
                )));
            }
        }

        Ok(Self {
            conn,
            stream: stream.to_string(),
            group: group.to_string(),
            consumer: consumer.to_string(),
            block_ms,
            backlog_cursor: Mutex::new(Some("0".to_string())),
        })
    }

    pub fn stream(&self) -> &str {
        &self.stream
    }

    /// Acquires the cursor lock, recovering from poison if necessary.
    fn lock_cursor(&self) -> MutexGuard<'_, Option<String>> {
        self.backlog_cursor.lock().unwrap_or_else(|poisoned| {
            tracing::warn!(stream = %self.stream, "Recovered from poisoned mutex");
            poisoned.into_inner()
        })
    }

    async fn read_one(&self, id: &str, block: bool) -> Result<Option<StreamId>, AppError> {
        let mut options = StreamReadOptions::default()
            .group(&self.group, &self.consumer)
            .count(1);
        if block {
            options = options.block(self.block_ms as usize);
        }

        let mut conn = self.conn.clone();
        let reply: Option<StreamReadReply> = conn
            .xread_options(&[&self.stream], &[id], &options)
            .await
            .map_err(|e| AppError::BrokerError(format!("XREADGROUP failed: {e}")))?;

        Ok(reply
            .and_then(|reply| reply.keys.into_iter().next())
            .and_then(|key| key.ids.into_iter().next()))
    }
}

/// Convert a raw stream entry into an inbound message.
///
/// An entry without a readable payload still becomes a message (with an
/// empty payload) so the consumer discards and acknowledges it instead of
/// tripping over it forever.
fn to_message(entry: StreamId) -> InboundMessage {
    let payload: String = entry.get(PAYLOAD_FIELD).unwrap_or_default();
    InboundMessage::new(entry.id, payload)
}

impl JobSource for RedisStreamSource {
    async fn next_message(&self) -> Result<Option<InboundMessage>, AppError> {
        let cursor = self.lock_cursor().clone();

        if let Some(cursor) = cursor {
            match self.read_one(&cursor, false).await? {
                Some(entry) => {
                    *self.lock_cursor() = Some(entry.id.clone());
                    tracing::info!(
                        stream = %self.stream,
                        id = %entry.id,
                        "Redelivering pending entry"
                    );
                    return Ok(Some(to_message(entry)));
                }
                None => {
                    *self.lock_cursor() = None;
                }
            }
        }

        Ok(self.read_one(">", true).await?.map(to_message))
    }

    async fn ack(&self, message_id: &str) -> Result<(), AppError> {
        let mut conn = self.conn.clone();
        let _: i64 = conn
            .xack(&self.stream, &self.group, &[message_id])
            .await
            .map_err(|e| AppError::BrokerError(format!("XACK failed: {e}")))?;
        Ok(())
    }
}
