use std::future::Future;

use crate::error::AppError;
use crate::job::JobResult;

/// Sends one subject to the external analysis service and returns its raw reply.
///
/// The conversational context is fixed at construction time; only the subject
/// reference varies between calls.
pub trait Analyzer: Send + Sync + Clone {
    fn analyze(
        &self,
        resource_reference: &str,
    ) -> impl Future<Output = Result<String, AppError>> + Send;
}

/// A message read from one input partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    /// Broker-assigned position, used for acknowledgement.
    pub id: String,
    /// Raw payload text, expected to be JSON.
    pub payload: String,
}

impl InboundMessage {
    pub fn new(id: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            payload: payload.into(),
        }
    }
}

/// Ordered stream of inbound messages from a single partition.
pub trait JobSource: Send + Sync {
    /// Wait for the next message.
    ///
    /// Returns `None` when nothing arrived within the source's own wait window;
    /// the caller simply asks again.
    fn next_message(&self) -> impl Future<Output = Result<Option<InboundMessage>, AppError>> + Send;

    /// Mark a message as consumed so it is not delivered again.
    fn ack(&self, message_id: &str) -> impl Future<Output = Result<(), AppError>> + Send;
}

/// Emits job results to the output queue.
pub trait ResultPublisher: Send + Sync + Clone {
    /// Publish exactly one message keyed by `key`. No internal retry.
    fn publish(
        &self,
        key: &str,
        result: &JobResult,
    ) -> impl Future<Output = Result<(), AppError>> + Send;
}

/// Liveness check of an external dependency, used by the health endpoint.
pub trait HealthProbe: Send + Sync + Clone + 'static {
    fn ping(&self) -> impl Future<Output = Result<(), AppError>> + Send;
}
