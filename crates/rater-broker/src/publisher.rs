use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use rater_core::job::JobResult;
use rater_core::traits::ResultPublisher;
use rater_core::AppError;

/// Writes each result as one entry on the output stream:
/// `XADD <stream> * key <owner_id> payload <json>`.
#[derive(Clone)]
pub struct RedisStreamPublisher {
    conn: ConnectionManager,
    stream: String,
}

impl RedisStreamPublisher {
    pub fn new(conn: ConnectionManager, stream: &str) -> Self {
        Self {
            conn,
            stream: stream.to_string(),
        }
    }

    pub fn stream(&self) -> &str {
        &self.stream
    }
}

impl ResultPublisher for RedisStreamPublisher {
    async fn publish(&self, key: &str, result: &JobResult) -> Result<(), AppError> {
        let payload = serde_json::to_string(result)?;

        let mut conn = self.conn.clone();
        let id: String = conn
            .xadd(&self.stream, "*", &[("key", key), ("payload", payload.as_str())])
            .await
            .map_err(|e| AppError::PublishError(format!("XADD to {} failed: {e}", self.stream)))?;

        tracing::debug!(stream = %self.stream, %key, %id, "Result written");
        Ok(())
    }
}
