//! Redis plumbing: the durable event stream, consumer-group reads, pub/sub
//! channels, and the worker health key.

pub mod error;
pub mod health;
pub mod producer;
pub mod pubsub;
pub mod reader;
pub mod wire;

pub use error::StreamError;
pub use health::{ping, read_worker_health, write_worker_health, WorkerHealth, WORKER_HEALTH_KEY};
pub use producer::StreamProducer;
pub use pubsub::{
    publish_json, subscribe_channel, AnomalyPublisher, RedisAnomalyPublisher, SubscriptionHandle,
    ANOMALY_CHANNEL, RULES_CHANGED_CHANNEL,
};
pub use reader::{RedisStreamReader, StreamEntry, StreamReader};
pub use wire::{event_fields, parse_entry};
