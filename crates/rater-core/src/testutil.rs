//! In-memory stand-ins for the analysis client, the input partition, the
//! output queue and the health probe.
//!
//! Clones share state through `Arc<Mutex<_>>`, so a test keeps one handle
//! and inspects what the worker did with the other.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use tokio_util::sync::CancellationToken;

use crate::error::AppError;
use crate::job::JobResult;
use crate::traits::{Analyzer, HealthProbe, InboundMessage, JobSource, ResultPublisher};
use crate::worker::{WorkerEvent, WorkerReporter};

// ---------------------------------------------------------------------------
// EventLog
// ---------------------------------------------------------------------------

/// Shared, ordered log of calls across several mocks.
///
/// Lets a test assert on interleaving, e.g. that a publish happened before
/// the next analysis call.
#[derive(Clone, Default)]
pub struct EventLog {
    entries: Arc<Mutex<Vec<String>>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, entry: impl Into<String>) {
        self.entries.lock().unwrap().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.entries.lock().unwrap().clone()
    }
}

// ---------------------------------------------------------------------------
// MockAnalyzer
// ---------------------------------------------------------------------------

/// Mock analysis client with scripted replies.
///
/// Queued responses are returned first, one per call. Once the queue is
/// empty, every call returns the fallback reply, or a transport error if
/// there is none.
#[derive(Clone)]
pub struct MockAnalyzer {
    responses: Arc<Mutex<Vec<Result<String, AppError>>>>,
    fallback: Option<String>,
    calls: Arc<Mutex<Vec<String>>>,
    log: Option<EventLog>,
}

impl MockAnalyzer {
    /// Every call returns `reply`.
    pub fn new(reply: &str) -> Self {
        Self {
            responses: Arc::new(Mutex::new(Vec::new())),
            fallback: Some(reply.to_string()),
            calls: Arc::new(Mutex::new(Vec::new())),
            log: None,
        }
    }

    /// Every call fails with a transport error.
    pub fn always_failing() -> Self {
        Self {
            responses: Arc::new(Mutex::new(Vec::new())),
            fallback: None,
            calls: Arc::new(Mutex::new(Vec::new())),
            log: None,
        }
    }

    pub fn with_responses(responses: Vec<Result<String, AppError>>) -> Self {
        Self {
            responses: Arc::new(Mutex::new(responses)),
            fallback: None,
            calls: Arc::new(Mutex::new(Vec::new())),
            log: None,
        }
    }

    pub fn with_log(mut self, log: EventLog) -> Self {
        self.log = Some(log);
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

impl Analyzer for MockAnalyzer {
    async fn analyze(&self, resource_reference: &str) -> Result<String, AppError> {
        self.calls
            .lock()
            .unwrap()
            .push(resource_reference.to_string());
        if let Some(log) = &self.log {
            log.push(format!("analyze {resource_reference}"));
        }

        let mut responses = self.responses.lock().unwrap();
        if !responses.is_empty() {
            return responses.remove(0);
        }
        match &self.fallback {
            Some(reply) => Ok(reply.clone()),
            None => Err(AppError::TransportError("connection refused".into())),
        }
    }
}

// ---------------------------------------------------------------------------
// MockJobSource
// ---------------------------------------------------------------------------

/// In-memory input partition.
///
/// Optionally cancels a token once all messages are handed out, so
/// `WorkerService::run` can be driven to completion in tests.
#[derive(Clone)]
pub struct MockJobSource {
    messages: Arc<Mutex<VecDeque<InboundMessage>>>,
    read_error: Arc<Mutex<Option<AppError>>>,
    ack_error: Arc<Mutex<Option<AppError>>>,
    acked: Arc<Mutex<Vec<String>>>,
    drained: Option<CancellationToken>,
}

impl MockJobSource {
    pub fn empty() -> Self {
        Self::with_messages(Vec::new())
    }

    pub fn with_messages(messages: Vec<InboundMessage>) -> Self {
        Self {
            messages: Arc::new(Mutex::new(messages.into())),
            read_error: Arc::new(Mutex::new(None)),
            ack_error: Arc::new(Mutex::new(None)),
            acked: Arc::new(Mutex::new(Vec::new())),
            drained: None,
        }
    }

    /// The first ack fails with `error`.
    pub fn with_ack_error(error: AppError) -> Self {
        let source = Self::empty();
        *source.ack_error.lock().unwrap() = Some(error);
        source
    }

    /// The next read fails once with `error`.
    pub fn with_read_error(self, error: AppError) -> Self {
        *self.read_error.lock().unwrap() = Some(error);
        self
    }

    pub fn cancel_when_drained(mut self, token: CancellationToken) -> Self {
        self.drained = Some(token);
        self
    }

    pub fn acked(&self) -> Vec<String> {
        self.acked.lock().unwrap().clone()
    }
}

impl JobSource for MockJobSource {
    async fn next_message(&self) -> Result<Option<InboundMessage>, AppError> {
        if let Some(e) = self.read_error.lock().unwrap().take() {
            return Err(e);
        }
        let next = self.messages.lock().unwrap().pop_front();
        if next.is_none() {
            if let Some(token) = &self.drained {
                token.cancel();
            }
        }
        Ok(next)
    }

    async fn ack(&self, message_id: &str) -> Result<(), AppError> {
        if let Some(e) = self.ack_error.lock().unwrap().take() {
            return Err(e);
        }
        self.acked.lock().unwrap().push(message_id.to_string());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MockPublisher
// ---------------------------------------------------------------------------

/// Recorded publish: (key, serialized JSON payload).
pub type PublishedRecord = (String, String);

/// Mock publisher that records every published result.
#[derive(Clone)]
pub struct MockPublisher {
    pub published: Arc<Mutex<Vec<PublishedRecord>>>,
    error: Arc<Mutex<Option<AppError>>>,
    log: Option<EventLog>,
}

impl MockPublisher {
    pub fn new() -> Self {
        Self {
            published: Arc::new(Mutex::new(Vec::new())),
            error: Arc::new(Mutex::new(None)),
            log: None,
        }
    }

    /// The next publish fails once with `error`.
    pub fn with_error(error: AppError) -> Self {
        Self {
            published: Arc::new(Mutex::new(Vec::new())),
            error: Arc::new(Mutex::new(Some(error))),
            log: None,
        }
    }

    pub fn with_log(mut self, log: EventLog) -> Self {
        self.log = Some(log);
        self
    }
}

impl Default for MockPublisher {
    fn default() -> Self {
        Self::new()
    }
}

impl ResultPublisher for MockPublisher {
    async fn publish(&self, key: &str, result: &JobResult) -> Result<(), AppError> {
        if let Some(log) = &self.log {
            log.push(format!("publish {key}"));
        }
        if let Some(e) = self.error.lock().unwrap().take() {
            return Err(e);
        }
        let payload = serde_json::to_string(result)?;
        self.published
            .lock()
            .unwrap()
            .push((key.to_string(), payload));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MockProbe
// ---------------------------------------------------------------------------

/// Health probe with a fixed answer.
#[derive(Clone)]
pub struct MockProbe {
    healthy: bool,
}

impl MockProbe {
    pub fn healthy() -> Self {
        Self { healthy: true }
    }

    pub fn unhealthy() -> Self {
        Self { healthy: false }
    }
}

impl HealthProbe for MockProbe {
    async fn ping(&self) -> Result<(), AppError> {
        if self.healthy {
            Ok(())
        } else {
            Err(AppError::BrokerError("ping failed".into()))
        }
    }
}

// ---------------------------------------------------------------------------
// MockReporter
// ---------------------------------------------------------------------------

/// Mock worker reporter that records event labels.
#[derive(Default)]
pub struct MockReporter {
    pub events: Arc<Mutex<Vec<String>>>,
}

impl MockReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self, label: &str) -> usize {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.as_str() == label)
            .count()
    }
}

impl WorkerReporter for MockReporter {
    fn report(&self, event: WorkerEvent<'_>) {
        let label = match &event {
            WorkerEvent::Started { .. } => "Started",
            WorkerEvent::Idle => "Idle",
            WorkerEvent::ReadFailed { .. } => "ReadFailed",
            WorkerEvent::MessageReceived { .. } => "MessageReceived",
            WorkerEvent::JobDiscarded { .. } => "JobDiscarded",
            WorkerEvent::JobResolved { .. } => "JobResolved",
            WorkerEvent::ResultPublished { .. } => "ResultPublished",
            WorkerEvent::PublishFailed { .. } => "PublishFailed",
            WorkerEvent::Stopped { .. } => "Stopped",
        };
        self.events.lock().unwrap().push(label.to_string());
    }
}
