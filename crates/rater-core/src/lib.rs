pub mod error;
pub mod job;
pub mod record;
pub mod score;
pub mod testutil;
pub mod traits;
pub mod worker;

pub use error::AppError;
pub use job::{
    AckPolicy, DiscardReason, JobOutcome, JobRequest, JobResult, RetryConfig, WorkerConfig,
};
pub use record::{ParsedRecord, parse_record};
pub use score::{ScoreOutcome, ScoreService};
pub use traits::{Analyzer, HealthProbe, InboundMessage, JobSource, ResultPublisher};
pub use worker::{TracingWorkerReporter, WorkerEvent, WorkerReporter, WorkerService};
