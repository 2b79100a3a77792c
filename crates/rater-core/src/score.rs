use crate::job::{JobRequest, RetryConfig};
use crate::record::{ParsedRecord, parse_record};
use crate::traits::Analyzer;

/// Result of running the bounded retry for one job.
#[derive(Debug, Clone, PartialEq)]
pub enum ScoreOutcome {
    /// A valid record was obtained on attempt number `attempts`.
    Valid {
        record: ParsedRecord,
        attempts: u32,
    },
    /// Every attempt failed or produced an invalid record.
    Exhausted { attempts: u32 },
}

/// Drives up to `max_attempts` rounds of analyze → parse → validate.
///
/// Generic over the analysis client so tests can substitute a scripted fake.
#[derive(Clone)]
pub struct ScoreService<A: Analyzer> {
    analyzer: A,
    config: RetryConfig,
}

impl<A: Analyzer> ScoreService<A> {
    pub fn new(analyzer: A, config: RetryConfig) -> Self {
        Self { analyzer, config }
    }

    pub fn max_attempts(&self) -> u32 {
        self.config.max_attempts.max(1)
    }

    /// Run attempts until one yields a record with a positive `total_score`.
    ///
    /// Client errors and invalid records both move on to the next attempt;
    /// the first valid record ends the loop.
    pub async fn score(&self, job: &JobRequest) -> ScoreOutcome {
        let max_attempts = self.max_attempts();

        for attempt in 1..=max_attempts {
            if attempt > 1 && !self.config.attempt_delay.is_zero() {
                tokio::time::sleep(self.config.attempt_delay).await;
            }

            tracing::debug!(
                owner_id = %job.owner_id,
                attempt,
                max_attempts,
                "Requesting analysis"
            );

            let reply = match self.analyzer.analyze(&job.resource_reference).await {
                Ok(reply) => reply,
                Err(e) => {
                    tracing::warn!(
                        owner_id = %job.owner_id,
                        attempt,
                        error = %e,
                        retryable = e.is_retryable(),
                        "Analysis call failed"
                    );
                    continue;
                }
            };

            let record = parse_record(&reply);
            if record.is_valid() {
                tracing::info!(
                    owner_id = %job.owner_id,
                    attempt,
                    fields = record.len(),
                    total_score = ?record.total_score(),
                    "Valid score obtained"
                );
                return ScoreOutcome::Valid {
                    record,
                    attempts: attempt,
                };
            }

            tracing::warn!(
                owner_id = %job.owner_id,
                attempt,
                fields = record.len(),
                total_score = ?record.total_score(),
                reply_len = reply.len(),
                "Reply did not contain a positive total score"
            );
        }

        ScoreOutcome::Exhausted {
            attempts: max_attempts,
        }
    }
}
