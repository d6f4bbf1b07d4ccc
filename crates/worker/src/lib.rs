//! The EventPulse worker: stream consumer, rule evaluation, and hot-reload.

pub mod consumer;
pub mod reload;

pub use consumer::{Consumer, ConsumerMetrics};
pub use reload::spawn_rule_subscriber;
