use tokio_util::sync::CancellationToken;

use crate::error::AppError;
use crate::job::{DiscardReason, JobOutcome, JobRequest, JobResult, WorkerConfig};
use crate::score::{ScoreOutcome, ScoreService};
use crate::traits::{Analyzer, InboundMessage, JobSource, ResultPublisher};

/// Lifecycle events of one partition worker.
#[derive(Debug, Clone)]
pub enum WorkerEvent<'a> {
    Started {
        worker_id: &'a str,
    },
    Idle,
    ReadFailed {
        error: &'a str,
    },
    MessageReceived {
        message_id: &'a str,
    },
    JobDiscarded {
        message_id: &'a str,
        reason: &'a DiscardReason,
    },
    JobResolved {
        owner_id: &'a str,
        status_code: u16,
        attempts: u32,
    },
    ResultPublished {
        owner_id: &'a str,
    },
    PublishFailed {
        owner_id: &'a str,
        error: &'a str,
        acked: bool,
    },
    Stopped {
        worker_id: &'a str,
    },
}

/// Sink for worker events, kept separate from the processing logic.
pub trait WorkerReporter: Send + Sync {
    fn report(&self, event: WorkerEvent<'_>) {
        let _ = event;
    }
}

/// Reporter that uses the `tracing` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingWorkerReporter;

impl WorkerReporter for TracingWorkerReporter {
    fn report(&self, event: WorkerEvent<'_>) {
        match event {
            WorkerEvent::Started { worker_id } => {
                tracing::info!(%worker_id, "Worker started");
            }
            WorkerEvent::Idle => {
                tracing::debug!("No messages, polling again");
            }
            WorkerEvent::ReadFailed { error } => {
                tracing::error!(%error, "Failed to read from input queue");
            }
            WorkerEvent::MessageReceived { message_id } => {
                tracing::info!(%message_id, "Message received");
            }
            WorkerEvent::JobDiscarded { message_id, reason } => {
                tracing::warn!(%message_id, %reason, "Message discarded");
            }
            WorkerEvent::JobResolved {
                owner_id,
                status_code,
                attempts,
            } => {
                tracing::info!(%owner_id, %status_code, %attempts, "Job resolved");
            }
            WorkerEvent::ResultPublished { owner_id } => {
                tracing::info!(%owner_id, "Result published");
            }
            WorkerEvent::PublishFailed {
                owner_id,
                error,
                acked,
            } => {
                tracing::error!(%owner_id, %error, %acked, "Failed to publish result");
            }
            WorkerEvent::Stopped { worker_id } => {
                tracing::info!(%worker_id, "Worker stopped");
            }
        }
    }
}

/// Sequential consumer for one input partition.
///
/// A message is fully scored, published and acknowledged before the next one
/// is read, so results leave in the order their jobs arrived.
pub struct WorkerService<S, A, P>
where
    S: JobSource,
    A: Analyzer,
    P: ResultPublisher,
{
    source: S,
    scorer: ScoreService<A>,
    publisher: P,
    config: WorkerConfig,
}

impl<S, A, P> WorkerService<S, A, P>
where
    S: JobSource,
    A: Analyzer,
    P: ResultPublisher,
{
    pub fn new(source: S, scorer: ScoreService<A>, publisher: P, config: WorkerConfig) -> Self {
        Self {
            source,
            scorer,
            publisher,
            config,
        }
    }

    /// Consume messages until `cancel_token` fires.
    ///
    /// Cancellation is only observed between messages; a job in flight always
    /// runs to its publish.
    pub async fn run<WR: WorkerReporter>(
        &self,
        cancel_token: CancellationToken,
        reporter: &WR,
    ) -> Result<(), AppError> {
        reporter.report(WorkerEvent::Started {
            worker_id: &self.config.worker_id,
        });

        loop {
            let next = tokio::select! {
                biased;
                () = cancel_token.cancelled() => break,
                next = self.source.next_message() => next,
            };

            match next {
                Ok(Some(message)) => {
                    self.process_message(&message, reporter).await;
                }
                Ok(None) => reporter.report(WorkerEvent::Idle),
                Err(e) => {
                    let error = e.to_string();
                    reporter.report(WorkerEvent::ReadFailed { error: &error });
                    tokio::select! {
                        () = tokio::time::sleep(self.config.error_backoff) => {}
                        () = cancel_token.cancelled() => break,
                    }
                }
            }
        }

        reporter.report(WorkerEvent::Stopped {
            worker_id: &self.config.worker_id,
        });

        Ok(())
    }

    /// Take one message through validate → score → publish → ack.
    ///
    /// Never fails: every per-message problem ends in a [`JobOutcome`] and a
    /// log line.
    pub async fn process_message<WR: WorkerReporter>(
        &self,
        message: &InboundMessage,
        reporter: &WR,
    ) -> JobOutcome {
        reporter.report(WorkerEvent::MessageReceived {
            message_id: &message.id,
        });

        let job = match JobRequest::from_payload(&message.payload) {
            Ok(job) => job,
            Err(reason) => {
                reporter.report(WorkerEvent::JobDiscarded {
                    message_id: &message.id,
                    reason: &reason,
                });
                self.ack(&message.id).await;
                return JobOutcome::Discarded(reason);
            }
        };

        let outcome = match self.scorer.score(&job).await {
            ScoreOutcome::Valid { record, attempts } => {
                let result = JobResult::success(&job, record);
                reporter.report(WorkerEvent::JobResolved {
                    owner_id: &job.owner_id,
                    status_code: result.status_code(),
                    attempts,
                });
                JobOutcome::Completed(result)
            }
            ScoreOutcome::Exhausted { attempts } => {
                let result = JobResult::failure(&job, JobResult::exhausted_message(attempts));
                reporter.report(WorkerEvent::JobResolved {
                    owner_id: &job.owner_id,
                    status_code: result.status_code(),
                    attempts,
                });
                JobOutcome::Failed(result)
            }
        };

        let published = match outcome.result() {
            Some(result) => match self.publisher.publish(&job.owner_id, result).await {
                Ok(()) => {
                    reporter.report(WorkerEvent::ResultPublished {
                        owner_id: &job.owner_id,
                    });
                    true
                }
                Err(e) => {
                    let error = e.to_string();
                    reporter.report(WorkerEvent::PublishFailed {
                        owner_id: &job.owner_id,
                        error: &error,
                        acked: self.config.ack_policy.should_ack(false),
                    });
                    false
                }
            },
            None => false,
        };

        if self.config.ack_policy.should_ack(published) {
            self.ack(&message.id).await;
        }

        outcome
    }

    async fn ack(&self, message_id: &str) {
        if let Err(e) = self.source.ack(message_id).await {
            tracing::error!(%message_id, error = %e, "Failed to acknowledge message");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::job::{AckPolicy, RetryConfig};
    use crate::testutil::*;

    fn worker(
        source: MockJobSource,
        analyzer: MockAnalyzer,
        publisher: MockPublisher,
    ) -> WorkerService<MockJobSource, MockAnalyzer, MockPublisher> {
        WorkerService::new(
            source,
            ScoreService::new(analyzer, RetryConfig::default()),
            publisher,
            WorkerConfig::default().with_worker_id("test-worker"),
        )
    }

    fn job_message(id: &str, image_url: &str, user_id: &str) -> InboundMessage {
        InboundMessage::new(
            id,
            serde_json::json!({"image_url": image_url, "user_id": user_id}).to_string(),
        )
    }

    #[tokio::test]
    async fn success_is_published_keyed_by_owner() {
        let publisher = MockPublisher::new();
        let source = MockJobSource::empty();
        let svc = worker(
            source.clone(),
            MockAnalyzer::new("Total Score: 9.6"),
            publisher.clone(),
        );

        let outcome = svc
            .process_message(&job_message("1-0", "http://x/1.jpg", "u1"), &MockReporter::new())
            .await;

        assert!(matches!(outcome, JobOutcome::Completed(_)));
        let published = publisher.published.lock().unwrap().clone();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].0, "u1");
        assert_eq!(
            published[0].1,
            r#"{"user_id":"u1","statuscode":200,"image_url":"http://x/1.jpg","total_score":9.6}"#
        );
        assert_eq!(source.acked(), vec!["1-0".to_string()]);
    }

    #[tokio::test]
    async fn always_failing_client_publishes_failure() {
        let publisher = MockPublisher::new();
        let analyzer = MockAnalyzer::always_failing();
        let svc = worker(MockJobSource::empty(), analyzer.clone(), publisher.clone());

        let outcome = svc
            .process_message(&job_message("1-0", "http://x/1.jpg", "u1"), &MockReporter::new())
            .await;

        assert!(matches!(outcome, JobOutcome::Failed(_)));
        assert_eq!(analyzer.call_count(), 3);
        let published = publisher.published.lock().unwrap().clone();
        assert_eq!(published.len(), 1);
        assert_eq!(
            published[0].1,
            r#"{"user_id":"u1","statuscode":400,"error":"Failed to generate a valid score after 3 attempts","image_url":"http://x/1.jpg"}"#
        );
    }

    #[tokio::test]
    async fn malformed_json_is_discarded_silently() {
        let publisher = MockPublisher::new();
        let analyzer = MockAnalyzer::new("Total Score: 9");
        let source = MockJobSource::empty();
        let svc = worker(source.clone(), analyzer.clone(), publisher.clone());

        let outcome = svc
            .process_message(&InboundMessage::new("1-0", "{not json"), &MockReporter::new())
            .await;

        assert!(matches!(
            outcome,
            JobOutcome::Discarded(DiscardReason::MalformedPayload(_))
        ));
        assert!(publisher.published.lock().unwrap().is_empty());
        assert_eq!(analyzer.call_count(), 0);
        assert_eq!(source.acked(), vec!["1-0".to_string()]);
    }

    #[tokio::test]
    async fn missing_fields_are_discarded_silently() {
        let publisher = MockPublisher::new();
        let analyzer = MockAnalyzer::new("Total Score: 9");
        let svc = worker(MockJobSource::empty(), analyzer.clone(), publisher.clone());
        let reporter = MockReporter::new();

        for payload in [
            r#"{"image_url": "http://x/1.jpg"}"#,
            r#"{"user_id": "u1"}"#,
            r#"{"image_url": "", "user_id": "u1"}"#,
        ] {
            let outcome = svc
                .process_message(&InboundMessage::new("1-0", payload), &reporter)
                .await;
            assert!(matches!(
                outcome,
                JobOutcome::Discarded(DiscardReason::MissingField(_))
            ));
        }

        assert!(publisher.published.lock().unwrap().is_empty());
        assert_eq!(analyzer.call_count(), 0);
        assert_eq!(reporter.count("JobDiscarded"), 3);
    }

    #[tokio::test]
    async fn publish_failure_still_acks_by_default() {
        let source = MockJobSource::empty();
        let svc = worker(
            source.clone(),
            MockAnalyzer::new("Total Score: 7"),
            MockPublisher::with_error(AppError::PublishError("broker down".into())),
        );
        let reporter = MockReporter::new();

        let outcome = svc
            .process_message(&job_message("1-0", "http://x/1.jpg", "u1"), &reporter)
            .await;

        assert!(matches!(outcome, JobOutcome::Completed(_)));
        assert_eq!(reporter.count("PublishFailed"), 1);
        assert_eq!(source.acked(), vec!["1-0".to_string()]);
    }

    #[tokio::test]
    async fn publish_failure_withholds_ack_under_on_publish_policy() {
        let source = MockJobSource::empty();
        let svc = WorkerService::new(
            source.clone(),
            ScoreService::new(MockAnalyzer::new("Total Score: 7"), RetryConfig::default()),
            MockPublisher::with_error(AppError::PublishError("broker down".into())),
            WorkerConfig::default().with_ack_policy(AckPolicy::OnPublish),
        );

        svc.process_message(&job_message("1-0", "http://x/1.jpg", "u1"), &MockReporter::new())
            .await;

        assert!(source.acked().is_empty());
    }

    #[tokio::test]
    async fn ack_failure_does_not_fail_processing() {
        let source = MockJobSource::with_ack_error(AppError::BrokerError("gone".into()));
        let publisher = MockPublisher::new();
        let svc = worker(source, MockAnalyzer::new("Total Score: 7"), publisher.clone());

        let outcome = svc
            .process_message(&job_message("1-0", "http://x/1.jpg", "u1"), &MockReporter::new())
            .await;

        assert!(matches!(outcome, JobOutcome::Completed(_)));
        assert_eq!(publisher.published.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn run_processes_messages_in_order_one_at_a_time() {
        let log = EventLog::new();
        let cancel = CancellationToken::new();
        let source = MockJobSource::with_messages(vec![
            job_message("1-0", "http://x/1.jpg", "u1"),
            job_message("2-0", "http://x/2.jpg", "u2"),
        ])
        .cancel_when_drained(cancel.clone());
        let analyzer = MockAnalyzer::new("Total Score: 8").with_log(log.clone());
        let publisher = MockPublisher::new().with_log(log.clone());
        let svc = worker(source.clone(), analyzer, publisher);
        let reporter = MockReporter::new();

        svc.run(cancel, &reporter).await.unwrap();

        assert_eq!(
            log.entries(),
            vec![
                "analyze http://x/1.jpg",
                "publish u1",
                "analyze http://x/2.jpg",
                "publish u2",
            ]
        );
        assert_eq!(source.acked(), vec!["1-0".to_string(), "2-0".to_string()]);
        let events = reporter.events.lock().unwrap().clone();
        assert_eq!(events.first().map(String::as_str), Some("Started"));
        assert_eq!(events.last().map(String::as_str), Some("Stopped"));
    }

    #[tokio::test]
    async fn run_survives_bad_messages_between_good_ones() {
        let cancel = CancellationToken::new();
        let source = MockJobSource::with_messages(vec![
            job_message("1-0", "http://x/1.jpg", "u1"),
            InboundMessage::new("2-0", "garbage"),
            job_message("3-0", "http://x/3.jpg", "u3"),
        ])
        .cancel_when_drained(cancel.clone());
        let publisher = MockPublisher::new();
        let svc = worker(source, MockAnalyzer::new("Total Score: 8"), publisher.clone());

        svc.run(cancel, &MockReporter::new()).await.unwrap();

        let keys: Vec<String> = publisher
            .published
            .lock()
            .unwrap()
            .iter()
            .map(|(key, _)| key.clone())
            .collect();
        assert_eq!(keys, vec!["u1".to_string(), "u3".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn run_backs_off_after_read_error() {
        let cancel = CancellationToken::new();
        let source = MockJobSource::with_messages(vec![job_message("1-0", "http://x/1.jpg", "u1")])
            .with_read_error(AppError::BrokerError("connection reset".into()))
            .cancel_when_drained(cancel.clone());
        let publisher = MockPublisher::new();
        let svc = WorkerService::new(
            source,
            ScoreService::new(MockAnalyzer::new("Total Score: 8"), RetryConfig::default()),
            publisher.clone(),
            WorkerConfig::default().with_error_backoff(Duration::from_secs(1)),
        );
        let reporter = MockReporter::new();

        svc.run(cancel, &reporter).await.unwrap();

        assert_eq!(reporter.count("ReadFailed"), 1);
        assert_eq!(publisher.published.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn run_stops_immediately_when_already_cancelled() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let source =
            MockJobSource::with_messages(vec![job_message("1-0", "http://x/1.jpg", "u1")]);
        let analyzer = MockAnalyzer::new("Total Score: 8");
        let svc = worker(source, analyzer.clone(), MockPublisher::new());

        svc.run(cancel, &MockReporter::new()).await.unwrap();

        assert_eq!(analyzer.call_count(), 0);
    }
}
