use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;
use serde::ser::{Serialize, SerializeMap, Serializer};

use crate::record::ParsedRecord;

/// Status code carried by a successful result.
pub const STATUS_OK: u16 = 200;

/// Status code carried by a result whose attempts were exhausted.
pub const STATUS_FAILED: u16 = 400;

/// Envelope keys that parsed fields may never override on the wire.
const RESERVED_KEYS: [&str; 3] = ["user_id", "statuscode", "image_url"];

/// One analysis job, taken from an inbound queue message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobRequest {
    /// Reference to the subject of analysis (an image URL).
    pub resource_reference: String,
    /// Owner of the job; also the key of the published result.
    pub owner_id: String,
}

/// Wire shape of an inbound message. Unknown fields are ignored.
#[derive(Debug, Deserialize)]
struct InboundPayload {
    image_url: Option<String>,
    user_id: Option<String>,
}

/// Why an inbound message was dropped without publishing anything.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscardReason {
    /// The payload is not a JSON object of the expected shape.
    MalformedPayload(String),
    /// A required field is absent or empty.
    MissingField(&'static str),
}

impl fmt::Display for DiscardReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiscardReason::MalformedPayload(e) => write!(f, "malformed payload: {e}"),
            DiscardReason::MissingField(field) => write!(f, "missing field: {field}"),
        }
    }
}

impl JobRequest {
    pub fn new(resource_reference: impl Into<String>, owner_id: impl Into<String>) -> Self {
        Self {
            resource_reference: resource_reference.into(),
            owner_id: owner_id.into(),
        }
    }

    /// Parse and validate an inbound JSON payload.
    pub fn from_payload(payload: &str) -> Result<Self, DiscardReason> {
        let parsed: InboundPayload = serde_json::from_str(payload)
            .map_err(|e| DiscardReason::MalformedPayload(e.to_string()))?;

        let image_url = parsed
            .image_url
            .filter(|s| !s.is_empty())
            .ok_or(DiscardReason::MissingField("image_url"))?;
        let user_id = parsed
            .user_id
            .filter(|s| !s.is_empty())
            .ok_or(DiscardReason::MissingField("user_id"))?;

        Ok(Self::new(image_url, user_id))
    }

    /// Serialize as an inbound payload (used when submitting jobs).
    pub fn to_payload(&self) -> String {
        serde_json::json!({
            "image_url": self.resource_reference,
            "user_id": self.owner_id,
        })
        .to_string()
    }
}

/// The single result published for a job.
#[derive(Debug, Clone, PartialEq)]
pub enum JobResult {
    Success {
        owner_id: String,
        resource_reference: String,
        record: ParsedRecord,
    },
    Failure {
        owner_id: String,
        resource_reference: String,
        error: String,
    },
}

impl JobResult {
    pub fn success(job: &JobRequest, record: ParsedRecord) -> Self {
        JobResult::Success {
            owner_id: job.owner_id.clone(),
            resource_reference: job.resource_reference.clone(),
            record,
        }
    }

    pub fn failure(job: &JobRequest, error: impl Into<String>) -> Self {
        JobResult::Failure {
            owner_id: job.owner_id.clone(),
            resource_reference: job.resource_reference.clone(),
            error: error.into(),
        }
    }

    /// Message returned when every attempt failed to yield a valid record.
    pub fn exhausted_message(attempts: u32) -> String {
        format!("Failed to generate a valid score after {attempts} attempts")
    }

    pub fn owner_id(&self) -> &str {
        match self {
            JobResult::Success { owner_id, .. } | JobResult::Failure { owner_id, .. } => owner_id,
        }
    }

    pub fn status_code(&self) -> u16 {
        match self {
            JobResult::Success { .. } => STATUS_OK,
            JobResult::Failure { .. } => STATUS_FAILED,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, JobResult::Success { .. })
    }
}

impl Serialize for JobResult {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        match self {
            JobResult::Success {
                owner_id,
                resource_reference,
                record,
            } => {
                map.serialize_entry("user_id", owner_id)?;
                map.serialize_entry("statuscode", &STATUS_OK)?;
                map.serialize_entry("image_url", resource_reference)?;
                for (name, value) in record.iter() {
                    if !RESERVED_KEYS.contains(&name) {
                        map.serialize_entry(name, &value)?;
                    }
                }
            }
            JobResult::Failure {
                owner_id,
                resource_reference,
                error,
            } => {
                map.serialize_entry("user_id", owner_id)?;
                map.serialize_entry("statuscode", &STATUS_FAILED)?;
                map.serialize_entry("error", error)?;
                map.serialize_entry("image_url", resource_reference)?;
            }
        }
        map.end()
    }
}

/// How one inbound message ended.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    /// A valid record was produced and a 200 result was built.
    Completed(JobResult),
    /// Attempts were exhausted and a 400 result was built.
    Failed(JobResult),
    /// The message was dropped before any analysis; nothing is published.
    Discarded(DiscardReason),
}

impl JobOutcome {
    pub fn result(&self) -> Option<&JobResult> {
        match self {
            JobOutcome::Completed(result) | JobOutcome::Failed(result) => Some(result),
            JobOutcome::Discarded(_) => None,
        }
    }
}

/// When an input message is acknowledged relative to its result's publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AckPolicy {
    /// Acknowledge whether or not the publish succeeded (at most one publish).
    #[default]
    Always,
    /// Acknowledge only after a successful publish; a failed publish leaves the
    /// message pending for redelivery (at least one publish).
    OnPublish,
}

impl AckPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            AckPolicy::Always => "always",
            AckPolicy::OnPublish => "on-publish",
        }
    }

    pub fn should_ack(&self, published: bool) -> bool {
        match self {
            AckPolicy::Always => true,
            AckPolicy::OnPublish => published,
        }
    }
}

impl fmt::Display for AckPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for AckPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "always" => Ok(AckPolicy::Always),
            "on-publish" | "on_publish" => Ok(AckPolicy::OnPublish),
            _ => Err(format!("Unknown ack policy: {}", s)),
        }
    }
}

/// Bounded retry settings for the analysis call.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of analysis attempts per job (at least 1).
    pub max_attempts: u32,
    /// Pause between attempts.
    pub attempt_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            attempt_delay: Duration::ZERO,
        }
    }
}

impl RetryConfig {
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn with_attempt_delay(mut self, delay: Duration) -> Self {
        self.attempt_delay = delay;
        self
    }
}

/// Configuration for one sequential worker.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub worker_id: String,
    /// Sleep after a failed read from the input queue.
    pub error_backoff: Duration,
    pub ack_policy: AckPolicy,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_id: "worker-0".to_string(),
            error_backoff: Duration::from_secs(5),
            ack_policy: AckPolicy::default(),
        }
    }
}

impl WorkerConfig {
    pub fn with_worker_id(mut self, id: impl Into<String>) -> Self {
        self.worker_id = id.into();
        self
    }

    pub fn with_error_backoff(mut self, backoff: Duration) -> Self {
        self.error_backoff = backoff;
        self
    }

    pub fn with_ack_policy(mut self, policy: AckPolicy) -> Self {
        self.ack_policy = policy;
        self
    }
}
