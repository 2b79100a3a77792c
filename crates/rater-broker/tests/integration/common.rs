use std::time::Duration;

use rater_broker::{Broker, BrokerConfig, ConnectRetry};
use testcontainers::core::{ContainerPort, WaitFor};
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, GenericImage};

pub const INPUT_STREAM: &str = "test:jobs";
pub const OUTPUT_STREAM: &str = "test:results";

/// Spins up a Redis container and returns a connected broker.
///
/// The `ContainerAsync` must be kept in scope for the test duration;
/// dropping it will stop the container.
pub async fn setup_test_broker() -> (Broker, ContainerAsync<GenericImage>) {
    let container = GenericImage::new("redis", "7-alpine")
        .with_exposed_port(ContainerPort::Tcp(6379))
        .with_wait_for(WaitFor::message_on_stdout("Ready to accept connections"))
        .start()
        .await
        .expect("Failed to start Redis container");

    let host = container.get_host().await.expect("Failed to get host");
    let port = container
        .get_host_port_ipv4(6379)
        .await
        .expect("Failed to get port");

    let config = BrokerConfig {
        url: format!("redis://{host}:{port}"),
        input_streams: vec![INPUT_STREAM.to_string()],
        output_stream: OUTPUT_STREAM.to_string(),
        consumer_group: "test-group".to_string(),
        consumer_name: "test-consumer".to_string(),
        block_ms: 100,
        connect_retry: ConnectRetry {
            retries: 30,
            initial_backoff: Duration::from_millis(100),
            multiplier: 1.0,
            max_backoff: Duration::from_millis(100),
        },
    };

    let broker = Broker::connect(&config)
        .await
        .expect("Failed to connect to Redis");

    (broker, container)
}

/// Read every entry of a stream as (key, payload) pairs.
pub async fn read_stream(url: &str, stream: &str) -> Vec<(String, String)> {
    let client = redis::Client::open(url).unwrap();
    let mut conn = client.get_multiplexed_async_connection().await.unwrap();
    let reply: redis::streams::StreamRangeReply = redis::cmd("XRANGE")
        .arg(stream)
        .arg("-")
        .arg("+")
        .query_async(&mut conn)
        .await
        .unwrap();

    reply
        .ids
        .into_iter()
        .map(|entry| {
            let key: String = entry.get("key").unwrap_or_default();
            let payload: String = entry.get("payload").unwrap_or_default();
            (key, payload)
        })
        .collect()
}
