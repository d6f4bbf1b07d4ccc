//! Anomaly subscriber → dispatcher wiring.
//!
//! Owns a dedicated pub/sub connection on the anomaly channel; each valid
//! message is handed to the notification dispatcher, whose WebSocket
//! channel broadcasts to the connected dashboards.

use std::sync::Arc;

use tracing::warn;

use pulse_core::config::NotificationConfig;
use pulse_core::AnomalyNotification;
use pulse_notify::Dispatcher;
use pulse_stream::{subscribe_channel, StreamError, SubscriptionHandle, ANOMALY_CHANNEL};

use crate::ws::WsServer;

/// A message missing any of these is rejected before dispatch.
fn parse_notification(payload: &str) -> Option<AnomalyNotification> {
    let value: serde_json::Value = serde_json::from_str(payload).ok()?;
    for required in ["anomaly_id", "rule_id", "severity"] {
        if value.get(required).is_none() {
            return None;
        }
    }
    serde_json::from_value(value).ok()
}

/// Subscribe to the anomaly channel and fan each notification out.
pub async fn spawn_anomaly_fanout(
    client: &redis::Client,
    config: &NotificationConfig,
    ws: Arc<WsServer>,
) -> Result<SubscriptionHandle, StreamError> {
    let broadcast_ws = ws.clone();
    let dispatcher = Arc::new(Dispatcher::from_config(
        config,
        Some(Box::new(move |notification: &AnomalyNotification| {
            broadcast_ws.broadcast(&notification.to_ws_message())
        })),
    ));

    subscribe_channel(client, ANOMALY_CHANNEL, move |payload| {
        let dispatcher = dispatcher.clone();
        async move {
            let Some(notification) = parse_notification(&payload) else {
                warn!(%payload, "malformed anomaly notification, skipped");
                return;
            };
            dispatcher.dispatch(&notification).await;
        }
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_complete_notification() {
        let payload = serde_json::json!({
            "anomaly_id": uuid::Uuid::new_v4(),
            "rule_id": "stat:login-spike",
            "severity": "warning",
            "message": "spike",
            "detected_at": "2026-02-18T12:00:00Z"
        })
        .to_string();
        assert!(parse_notification(&payload).is_some());
    }

    #[test]
    fn rejects_missing_required_fields() {
        let payload = serde_json::json!({
            "rule_id": "r",
            "severity": "warning",
            "message": "m",
            "detected_at": "2026-02-18T12:00:00Z"
        })
        .to_string();
        assert!(parse_notification(&payload).is_none());
        assert!(parse_notification("not json").is_none());
    }
}
