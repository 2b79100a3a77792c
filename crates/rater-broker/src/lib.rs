pub mod broker;
pub mod config;
pub mod publisher;
pub mod source;

pub use broker::Broker;
pub use config::{BrokerConfig, ConnectRetry};
pub use publisher::RedisStreamPublisher;
pub use source::RedisStreamSource;
