use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use rater_core::job::JobRequest;
use rater_core::traits::HealthProbe;
use rater_core::AppError;

use crate::config::BrokerConfig;
use crate::publisher::RedisStreamPublisher;
use crate::source::RedisStreamSource;

/// Process-wide broker handle: owns the Redis client, vends sources and the
/// publisher.
///
/// Created once at startup; every clone shares the same multiplexed
/// publisher connection.
#[derive(Clone)]
pub struct Broker {
    client: redis::Client,
    conn: ConnectionManager,
    config: BrokerConfig,
}

impl Broker {
    /// Connect to Redis, retrying with exponential backoff.
    ///
    /// An unparseable URL fails immediately; connection failures are retried
    /// `connect_retry.retries` times before giving up.
    pub async fn connect(config: &BrokerConfig) -> Result<Self, AppError> {
        let client = redis::Client::open(config.url.as_str())
            .map_err(|e| AppError::ConfigError(format!("Invalid REDIS_URL: {e}")))?;

        let retry = &config.connect_retry;
        let mut attempt = 0;
        let conn = loop {
            match ConnectionManager::new(client.clone()).await {
                Ok(conn) => break conn,
                Err(e) if attempt < retry.retries => {
                    let delay = retry.backoff_duration(attempt);
                    tracing::warn!(
                        attempt = attempt + 1,
                        retries = retry.retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Broker connection failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    return Err(AppError::BrokerError(format!(
                        "Failed to connect after {} attempts: {e}",
                        attempt + 1
                    )));
                }
            }
        };

        tracing::info!(
            output_stream = %config.output_stream,
            consumer_group = %config.consumer_group,
            "Connected to broker"
        );

        Ok(Self {
            client,
            conn,
            config: config.clone(),
        })
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    /// Open a consumer on one input stream.
    ///
    /// Each source gets a dedicated connection, since its blocking reads
    /// would otherwise stall every other user of a shared connection.
    pub async fn source(&self, stream: &str) -> Result<RedisStreamSource, AppError> {
        let conn = ConnectionManager::new(self.client.clone())
            .await
            .map_err(|e| {
                AppError::BrokerError(format!("Failed to open consumer connection: {e}"))
            })?;

        RedisStreamSource::open(
            conn,
            stream,
            &self.config.consumer_group,
            &self.config.consumer_name,
            self.config.block_ms,
        )
        .await
    }

    /// Publisher writing to the configured output stream.
    pub fn publisher(&self) -> RedisStreamPublisher {
        RedisStreamPublisher::new(self.conn.clone(), &self.config.output_stream)
    }

    /// Append a job to an input stream. Returns the entry id.
    pub async fn submit(&self, stream: &str, job: &JobRequest) -> Result<String, AppError> {
        let mut conn = self.conn.clone();
        let payload = job.to_payload();
        let id: String = conn
            .xadd(
                stream,
                "*",
                &[("key", job.owner_id.as_str()), ("payload", payload.as_str())],
            )
            .await
            .map_err(|e| AppError::BrokerError(format!("XADD failed: {e}")))?;
        Ok(id)
    }
}

impl HealthProbe for Broker {
    async fn ping(&self) -> Result<(), AppError> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| AppError::BrokerError(format!("PING failed: {e}")))?;
        Ok(())
    }
}
