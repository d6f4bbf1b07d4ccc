//! Pub/sub channels for rule changes and anomaly notifications.
//!
//! A subscription owns a dedicated connection — the subscribe state
//! precludes regular commands on the same connection — and exposes an
//! idempotent shutdown handle.

use std::future::Future;

use async_trait::async_trait;
use futures::StreamExt;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tracing::{debug, warn};

use pulse_core::{AnomalyNotification, Shutdown};

use crate::error::StreamError;

/// Channel carrying `{ts, reason, rule_id}` rule-change messages.
pub const RULES_CHANGED_CHANNEL: &str = "rules_changed";

/// Channel carrying [`AnomalyNotification`] messages.
pub const ANOMALY_CHANNEL: &str = "anomaly_notifications";

/// Publish a JSON value on a channel over the shared command connection.
pub async fn publish_json(
    conn: &ConnectionManager,
    channel: &str,
    value: &serde_json::Value,
) -> Result<(), StreamError> {
    let mut conn = conn.clone();
    let payload = serde_json::to_string(value)?;
    let _: i64 = conn.publish(channel, payload).await?;
    Ok(())
}

/// Handle to a running subscription task.
pub struct SubscriptionHandle {
    channel: String,
    shutdown: Shutdown,
}

impl SubscriptionHandle {
    /// Unsubscribe and close the dedicated connection. Idempotent.
    pub fn shutdown(&self) {
        if !self.shutdown.is_cancelled() {
            debug!(channel = %self.channel, "shutting down subscription");
        }
        self.shutdown.trigger();
    }
}

/// Subscribe on a dedicated connection; each message's payload is handed to
/// `handler`, awaited inline. Returns once the subscription is established.
pub async fn subscribe_channel<F, Fut>(
    client: &redis::Client,
    channel: &str,
    mut handler: F,
) -> Result<SubscriptionHandle, StreamError>
where
    F: FnMut(String) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send,
{
    let mut pubsub = client.get_async_pubsub().await?;
    pubsub.subscribe(channel).await?;

    let shutdown = Shutdown::new();
    let handle = SubscriptionHandle {
        channel: channel.to_string(),
        shutdown: shutdown.clone(),
    };
    let channel_name = channel.to_string();

    tokio::spawn(async move {
        {
            let mut messages = pubsub.on_message();
            loop {
                tokio::select! {
                    message = messages.next() => {
                        let Some(message) = message else {
                            warn!(channel = %channel_name, "subscription connection closed");
                            break;
                        };
                        match message.get_payload::<String>() {
                            Ok(payload) => handler(payload).await,
                            Err(e) => {
                                warn!(channel = %channel_name, error = %e, "unreadable pub/sub payload");
                            }
                        }
                    }
                    _ = shutdown.cancelled() => break,
                }
            }
        }
        // Best-effort unsubscribe; dropping the connection closes it anyway.
        let _ = pubsub.unsubscribe(&channel_name).await;
        debug!(channel = %channel_name, "subscription task exited");
    });

    Ok(handle)
}

/// Seam for publishing detected anomalies, mockable in consumer tests.
#[async_trait]
pub trait AnomalyPublisher: Send + Sync {
    async fn publish(&self, notification: &AnomalyNotification) -> Result<(), StreamError>;
}

pub struct RedisAnomalyPublisher {
    conn: ConnectionManager,
}

impl RedisAnomalyPublisher {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl AnomalyPublisher for RedisAnomalyPublisher {
    async fn publish(&self, notification: &AnomalyNotification) -> Result<(), StreamError> {
        publish_json(&self.conn, ANOMALY_CHANNEL, &serde_json::to_value(notification)?).await
    }
}
