mod health;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use rater_broker::{Broker, BrokerConfig};
use rater_client::{ConversationContext, OpenAiAnalyzer};
use rater_core::{
    AckPolicy, JobRequest, JobResult, RetryConfig, ScoreOutcome, ScoreService,
    TracingWorkerReporter, WorkerConfig, WorkerService,
};

#[derive(Parser)]
#[command(name = "rater", version, about = "Queue-driven image rating worker")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Consume jobs from the input streams until interrupted
    Run {
        #[command(flatten)]
        llm: LlmArgs,

        /// When to acknowledge a job whose result could not be published
        #[arg(long, env = "RATER_ACK_POLICY", default_value_t = AckPolicy::Always)]
        ack_policy: AckPolicy,

        /// Port for the /health endpoint
        #[arg(long, env = "RATER_HTTP_PORT", default_value_t = 3000)]
        http_port: u16,
    },

    /// Rate a single image and print the result, without touching the broker
    Analyze {
        #[command(flatten)]
        llm: LlmArgs,

        /// Image to rate
        #[arg(short, long)]
        image_url: String,

        /// Owner id to put in the result
        #[arg(short, long, default_value = "cli")]
        user_id: String,
    },

    /// Enqueue a job on the first input stream
    Submit {
        /// Image to rate
        #[arg(short, long)]
        image_url: String,

        /// Owner id the result will be keyed by
        #[arg(short, long)]
        user_id: String,
    },
}

#[derive(Args)]
struct LlmArgs {
    /// API key for the analysis service
    #[arg(short, long, env = "RATER_API_KEY")]
    api_key: String,

    /// Vision model to use (e.g., "gpt-4o", "gpt-4o-mini"); overrides the
    /// context file's model, defaults to "gpt-4o"
    #[arg(short, long, env = "RATER_MODEL")]
    model: Option<String>,

    /// OpenAI-compatible API base URL
    #[arg(
        short,
        long,
        env = "RATER_BASE_URL",
        default_value = "https://api.openai.com/v1"
    )]
    base_url: String,

    /// Per-request timeout in seconds
    #[arg(long, env = "RATER_LLM_TIMEOUT_SECS", default_value_t = 120)]
    timeout_secs: u64,

    /// JSON file with the conversation context (built-in context if omitted)
    #[arg(long, env = "RATER_CONTEXT")]
    context: Option<PathBuf>,

    /// Analysis attempts per job before giving up
    #[arg(long, env = "RATER_MAX_ATTEMPTS", default_value_t = 3)]
    max_attempts: u32,
}

impl LlmArgs {
    fn scorer(&self) -> Result<ScoreService<OpenAiAnalyzer>> {
        let context = ConversationContext::load(self.context.as_deref())
            .context("Failed to load conversation context")?;

        let mut analyzer = OpenAiAnalyzer::new(&self.api_key, context)?
            .with_base_url(&self.base_url)
            .with_timeout(Duration::from_secs(self.timeout_secs))?;
        if let Some(model) = &self.model {
            analyzer = analyzer.with_model(model);
        }

        tracing::info!(
            model = analyzer.model(),
            max_attempts = self.max_attempts,
            "Analysis client ready"
        );

        Ok(ScoreService::new(
            analyzer,
            RetryConfig::default().with_max_attempts(self.max_attempts),
        ))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("rater=info".parse()?))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            llm,
            ack_policy,
            http_port,
        } => cmd_run(&llm, ack_policy, http_port).await?,
        Commands::Analyze {
            llm,
            image_url,
            user_id,
        } => cmd_analyze(&llm, &image_url, &user_id).await?,
        Commands::Submit { image_url, user_id } => cmd_submit(&image_url, &user_id).await?,
    }

    Ok(())
}

async fn connect_broker() -> Result<Broker> {
    let config = BrokerConfig::from_env()?;
    let broker = Broker::connect(&config)
        .await
        .context("Failed to connect to broker")?;
    Ok(broker)
}

async fn cmd_run(llm: &LlmArgs, ack_policy: AckPolicy, http_port: u16) -> Result<()> {
    let scorer = llm.scorer()?;
    let listener = health::bind(http_port).await?;
    let broker = connect_broker().await?;
    let cancel_token = CancellationToken::new();

    let health_server = tokio::spawn(health::serve(listener, broker.clone(), cancel_token.clone()));

    let mut workers = JoinSet::new();
    for (i, stream) in broker.config().input_streams.iter().enumerate() {
        let source = broker
            .source(stream)
            .await
            .with_context(|| format!("Failed to open input stream {stream}"))?;

        let config = WorkerConfig::default()
            .with_worker_id(format!("worker-{i}:{stream}"))
            .with_ack_policy(ack_policy);
        let worker = WorkerService::new(source, scorer.clone(), broker.publisher(), config);

        let token = cancel_token.clone();
        workers.spawn(async move { worker.run(token, &TracingWorkerReporter).await });
    }

    tracing::info!(
        workers = workers.len(),
        output_stream = %broker.config().output_stream,
        %ack_policy,
        "Consuming jobs"
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to install CTRL+C handler")?;
    tracing::info!("Shutdown signal received, finishing in-flight jobs");
    cancel_token.cancel();

    while let Some(joined) = workers.join_next().await {
        match joined {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::error!(error = %e, "Worker stopped with error"),
            Err(e) => tracing::error!(error = %e, "Worker task panicked"),
        }
    }

    health_server.await.context("Health server task panicked")??;
    Ok(())
}

async fn cmd_analyze(llm: &LlmArgs, image_url: &str, user_id: &str) -> Result<()> {
    let scorer = llm.scorer()?;
    let job = JobRequest::new(image_url, user_id);

    tracing::info!("Rating {image_url}");

    let result = match scorer.score(&job).await {
        ScoreOutcome::Valid { record, attempts } => {
            tracing::info!(attempts, "Valid record obtained");
            JobResult::success(&job, record)
        }
        ScoreOutcome::Exhausted { attempts } => {
            JobResult::failure(&job, JobResult::exhausted_message(attempts))
        }
    };

    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

async fn cmd_submit(image_url: &str, user_id: &str) -> Result<()> {
    let broker = connect_broker().await?;
    let stream = broker
        .config()
        .input_streams
        .first()
        .context("No input stream configured")?
        .clone();

    let id = broker
        .submit(&stream, &JobRequest::new(image_url, user_id))
        .await?;

    tracing::info!(%stream, %id, "Job submitted");
    println!("{id}");
    Ok(())
}
