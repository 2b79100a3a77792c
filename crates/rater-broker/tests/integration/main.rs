//! Broker round-trips against a real Redis. Requires Docker:
//! `cargo test -p rater-broker -- --ignored`.

mod common;

use rater_broker::{Broker, BrokerConfig};
use rater_core::job::{AckPolicy, JobRequest, RetryConfig, WorkerConfig};
use rater_core::testutil::{MockAnalyzer, MockReporter};
use rater_core::traits::{HealthProbe, JobSource, ResultPublisher};
use rater_core::{JobResult, ScoreService, WorkerService, parse_record};

use crate::common::{INPUT_STREAM, OUTPUT_STREAM, read_stream, setup_test_broker};

#[tokio::test]
#[ignore = "requires Docker"]
async fn ping_succeeds() {
    let (broker, _container) = setup_test_broker().await;
    broker.ping().await.unwrap();
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn submitted_job_is_read_back_in_order() {
    let (broker, _container) = setup_test_broker().await;
    let source = broker.source(INPUT_STREAM).await.unwrap();

    broker
        .submit(INPUT_STREAM, &JobRequest::new("http://x/1.jpg", "u1"))
        .await
        .unwrap();
    broker
        .submit(INPUT_STREAM, &JobRequest::new("http://x/2.jpg", "u2"))
        .await
        .unwrap();

    let first = source.next_message().await.unwrap().expect("first entry");
    source.ack(&first.id).await.unwrap();
    let second = source.next_message().await.unwrap().expect("second entry");
    source.ack(&second.id).await.unwrap();

    assert_eq!(
        JobRequest::from_payload(&first.payload).unwrap().owner_id,
        "u1"
    );
    assert_eq!(
        JobRequest::from_payload(&second.payload).unwrap().owner_id,
        "u2"
    );
    assert!(source.next_message().await.unwrap().is_none());
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn unacked_entry_is_redelivered_to_a_restarted_consumer() {
    let (broker, _container) = setup_test_broker().await;
    broker
        .submit(INPUT_STREAM, &JobRequest::new("http://x/1.jpg", "u1"))
        .await
        .unwrap();

    let source = broker.source(INPUT_STREAM).await.unwrap();
    let delivered = source.next_message().await.unwrap().expect("entry");
    drop(source);

    let restarted = broker.source(INPUT_STREAM).await.unwrap();
    let redelivered = restarted.next_message().await.unwrap().expect("pending entry");

    assert_eq!(redelivered.id, delivered.id);
    restarted.ack(&redelivered.id).await.unwrap();

    let again = broker.source(INPUT_STREAM).await.unwrap();
    assert!(again.next_message().await.unwrap().is_none());
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn restarted_process_with_default_config_gets_redelivery() {
    let (broker, _container) = setup_test_broker().await;
    let url = broker.config().url.clone();
    let env = move |key: &str| match key {
        "REDIS_URL" => Some(url.clone()),
        "RATER_INPUT_STREAMS" => Some(INPUT_STREAM.to_string()),
        _ => None,
    };

    let first = Broker::connect(&BrokerConfig::from_lookup(&env).unwrap())
        .await
        .unwrap();
    first
        .submit(INPUT_STREAM, &JobRequest::new("http://x/1.jpg", "u1"))
        .await
        .unwrap();
    let source = first.source(INPUT_STREAM).await.unwrap();
    let delivered = source.next_message().await.unwrap().expect("entry");
    drop(source);
    drop(first);

    let second = Broker::connect(&BrokerConfig::from_lookup(&env).unwrap())
        .await
        .unwrap();
    let restarted = second.source(INPUT_STREAM).await.unwrap();
    let redelivered = restarted.next_message().await.unwrap().expect("pending entry");

    assert_eq!(redelivered.id, delivered.id);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn publisher_writes_key_and_payload() {
    let (broker, _container) = setup_test_broker().await;
    let job = JobRequest::new("http://x/1.jpg", "u1");

    broker
        .publisher()
        .publish("u1", &JobResult::success(&job, parse_record("Total Score: 9.6")))
        .await
        .unwrap();

    let entries = read_stream(&broker.config().url, OUTPUT_STREAM).await;
    assert_eq!(
        entries,
        vec![(
            "u1".to_string(),
            r#"{"user_id":"u1","statuscode":200,"image_url":"http://x/1.jpg","total_score":9.6}"#
                .to_string()
        )]
    );
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn worker_publishes_one_result_per_valid_job() {
    let (broker, _container) = setup_test_broker().await;
    broker
        .submit(INPUT_STREAM, &JobRequest::new("http://x/1.jpg", "u1"))
        .await
        .unwrap();

    let source = broker.source(INPUT_STREAM).await.unwrap();
    let message = source.next_message().await.unwrap().expect("entry");

    let worker = WorkerService::new(
        source,
        ScoreService::new(MockAnalyzer::new("Total Score: 9.6"), RetryConfig::default()),
        broker.publisher(),
        WorkerConfig::default().with_ack_policy(AckPolicy::Always),
    );
    let outcome = worker.process_message(&message, &MockReporter::new()).await;
    assert!(outcome.result().is_some_and(|r| r.is_success()));

    let entries = read_stream(&broker.config().url, OUTPUT_STREAM).await;
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].0, "u1");

    let restarted = broker.source(INPUT_STREAM).await.unwrap();
    assert!(restarted.next_message().await.unwrap().is_none());
}
