use std::time::Duration;

use rater_core::AppError;

const DEFAULT_INPUT_STREAM: &str = "image-processing";
const DEFAULT_OUTPUT_STREAM: &str = "image-processing-response";
const DEFAULT_CONSUMER_GROUP: &str = "image-processing-group";
const DEFAULT_CONSUMER_NAME: &str = "rater";
const DEFAULT_BLOCK_MS: u64 = 5000;

/// Backoff schedule for establishing the broker connection at startup.
///
/// Unrelated to the per-job analysis retry; this only covers the broker
/// being slow to come up.
#[derive(Debug, Clone)]
pub struct ConnectRetry {
    /// Retries after the first failed attempt.
    pub retries: u32,
    pub initial_backoff: Duration,
    pub multiplier: f64,
    pub max_backoff: Duration,
}

impl Default for ConnectRetry {
    fn default() -> Self {
        Self {
            retries: 10,
            initial_backoff: Duration::from_millis(300),
            multiplier: 2.0,
            max_backoff: Duration::from_secs(30),
        }
    }
}

impl ConnectRetry {
    /// Delay before retry number `attempt` (0-indexed).
    pub fn backoff_duration(&self, attempt: u32) -> Duration {
        let backoff =
            self.initial_backoff.as_millis() as f64 * self.multiplier.powi(attempt as i32);
        Duration::from_millis(backoff.min(self.max_backoff.as_millis() as f64) as u64)
    }
}

/// Redis Streams connection and topology settings.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    pub url: String,
    /// One stream per input partition; each gets its own sequential worker.
    pub input_streams: Vec<String>,
    pub output_stream: String,
    pub consumer_group: String,
    pub consumer_name: String,
    /// How long a read waits for new entries before returning empty.
    pub block_ms: u64,
    pub connect_retry: ConnectRetry,
}

impl BrokerConfig {
    /// Read configuration from environment variables.
    ///
    /// - `REDIS_URL` (required)
    /// - `RATER_INPUT_STREAMS` (comma-separated, defaults to `image-processing`)
    /// - `RATER_OUTPUT_STREAM` (defaults to `image-processing-response`)
    /// - `RATER_CONSUMER_GROUP` (defaults to `image-processing-group`)
    /// - `RATER_CONSUMER_NAME` (defaults to `rater-$HOSTNAME`, or `rater`)
    /// - `RATER_BLOCK_MS` (defaults to 5000)
    /// - `RATER_CONNECT_RETRIES` (defaults to 10)
    /// - `RATER_CONNECT_INITIAL_BACKOFF_MS` (defaults to 300)
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let url = lookup("REDIS_URL").ok_or_else(|| {
            AppError::ConfigError("REDIS_URL not set. Required for queue operations.".into())
        })?;

        let input_streams = match lookup("RATER_INPUT_STREAMS") {
            None => vec![DEFAULT_INPUT_STREAM.to_string()],
            Some(raw) => {
                let streams: Vec<String> = raw
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(String::from)
                    .collect();
                if streams.is_empty() {
                    return Err(AppError::ConfigError(
                        "RATER_INPUT_STREAMS must name at least one stream".into(),
                    ));
                }
                streams
            }
        };

        // Pending entries are owned by the consumer name; it must not change
        // across restarts.
        let consumer_name = lookup("RATER_CONSUMER_NAME")
            .or_else(|| lookup("HOSTNAME").map(|host| format!("rater-{host}")))
            .unwrap_or_else(|| DEFAULT_CONSUMER_NAME.to_string());

        let block_ms = parse_number(&lookup, "RATER_BLOCK_MS", DEFAULT_BLOCK_MS)?;

        let defaults = ConnectRetry::default();
        let retries = parse_number(&lookup, "RATER_CONNECT_RETRIES", defaults.retries as u64)?;
        let initial_backoff_ms = parse_number(
            &lookup,
            "RATER_CONNECT_INITIAL_BACKOFF_MS",
            defaults.initial_backoff.as_millis() as u64,
        )?;
        let connect_retry = ConnectRetry {
            retries: u32::try_from(retries).map_err(|_| {
                AppError::ConfigError(format!("RATER_CONNECT_RETRIES out of range: {retries}"))
            })?,
            initial_backoff: Duration::from_millis(initial_backoff_ms),
            ..defaults
        };

        Ok(Self {
            url,
            input_streams,
            output_stream: lookup("RATER_OUTPUT_STREAM")
                .unwrap_or_else(|| DEFAULT_OUTPUT_STREAM.to_string()),
            consumer_group: lookup("RATER_CONSUMER_GROUP")
                .unwrap_or_else(|| DEFAULT_CONSUMER_GROUP.to_string()),
            consumer_name,
            block_ms,
            connect_retry,
        })
    }
}

fn parse_number<F>(lookup: &F, key: &str, default: u64) -> Result<u64, AppError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|_| {
            AppError::ConfigError(format!(
                "Invalid {key} '{raw}': must be a non-negative integer"
            ))
        }),
    }
}
