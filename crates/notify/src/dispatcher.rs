//! Routes one anomaly to every configured channel.
//!
//! Each channel runs in its own error boundary: a failure in one must not
//! prevent the others.

use std::time::Instant;

use pulse_core::config::NotificationConfig;
use pulse_core::AnomalyNotification;

use crate::email::EmailNotifier;
use crate::slack::SlackNotifier;
use crate::traits::{DispatchResult, Notifier};

/// Synchronous WebSocket broadcast hook; returns the number of clients the
/// frame was written to.
pub type BroadcastFn = Box<dyn Fn(&AnomalyNotification) -> usize + Send + Sync>;

pub struct Dispatcher {
    websocket: Option<BroadcastFn>,
    channels: Vec<Box<dyn Notifier>>,
}

impl Dispatcher {
    /// Build the channel set from config. Misconfigured channels are warned
    /// about and skipped, not fatal.
    pub fn from_config(config: &NotificationConfig, websocket: Option<BroadcastFn>) -> Self {
        let mut channels: Vec<Box<dyn Notifier>> = Vec::new();

        if let Some(url) = &config.slack_webhook_url {
            channels.push(Box::new(SlackNotifier::new(url.clone())));
        }

        if config.email_enabled {
            match &config.email_smtp_host {
                Some(host) => channels.push(Box::new(EmailNotifier::new(
                    host.clone(),
                    config.email_recipients.clone(),
                ))),
                None => {
                    tracing::warn!("email channel enabled without EMAIL_SMTP_HOST — skipped")
                }
            }
        }

        Self {
            websocket: if config.websocket_enabled {
                websocket
            } else {
                None
            },
            channels,
        }
    }

    /// For tests and custom wiring.
    pub fn new(websocket: Option<BroadcastFn>, channels: Vec<Box<dyn Notifier>>) -> Self {
        Self { websocket, channels }
    }

    /// Fan one anomaly out to every channel, collecting per-channel results.
    pub async fn dispatch(&self, notification: &AnomalyNotification) -> Vec<DispatchResult> {
        let mut results = Vec::with_capacity(self.channels.len() + 1);

        if let Some(broadcast) = &self.websocket {
            let start = Instant::now();
            let delivered = broadcast(notification);
            tracing::debug!(delivered, "websocket broadcast complete");
            results.push(DispatchResult {
                channel: "websocket".to_string(),
                success: true,
                error: None,
                duration_ms: start.elapsed().as_millis() as u64,
            });
        }

        for channel in &self.channels {
            let start = Instant::now();
            let result = channel.send(notification).await;
            let duration_ms = start.elapsed().as_millis() as u64;

            let (success, error) = match result {
                Ok(()) => {
                    tracing::info!(
                        channel = channel.channel_name(),
                        anomaly_id = %notification.anomaly_id,
                        duration_ms,
                        "notification delivered"
                    );
                    (true, None)
                }
                Err(e) => {
                    tracing::warn!(
                        channel = channel.channel_name(),
                        anomaly_id = %notification.anomaly_id,
                        error = %e,
                        duration_ms,
                        "notification delivery failed"
                    );
                    (false, Some(e.to_string()))
                }
            };

            results.push(DispatchResult {
                channel: channel.channel_name().to_string(),
                success,
                error,
                duration_ms,
            });
        }

        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::NotifyError;
    use chrono::Utc;
    use pulse_core::Severity;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use uuid::Uuid;

    struct MockNotifier {
        name: String,
        send_count: Arc<AtomicUsize>,
        should_fail: bool,
    }

    #[async_trait::async_trait]
    impl Notifier for MockNotifier {
        async fn send(&self, _notification: &AnomalyNotification) -> Result<(), NotifyError> {
            self.send_count.fetch_add(1, Ordering::SeqCst);
            if self.should_fail {
                Err(NotifyError::Config("mock failure".to_string()))
            } else {
                Ok(())
            }
        }
        fn channel_name(&self) -> &str {
            &self.name
        }
    }

    fn notification() -> AnomalyNotification {
        AnomalyNotification {
            anomaly_id: Uuid::new_v4(),
            rule_id: Uuid::new_v4().to_string(),
            severity: Severity::Warning,
            message: "test".to_string(),
            detected_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn dispatches_to_all_channels() {
        let count_a = Arc::new(AtomicUsize::new(0));
        let count_b = Arc::new(AtomicUsize::new(0));
        let dispatcher = Dispatcher::new(
            None,
            vec![
                Box::new(MockNotifier {
                    name: "a".to_string(),
                    send_count: count_a.clone(),
                    should_fail: false,
                }),
                Box::new(MockNotifier {
                    name: "b".to_string(),
                    send_count: count_b.clone(),
                    should_fail: false,
                }),
            ],
        );

        let results = dispatcher.dispatch(&notification()).await;
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.success));
        assert_eq!(count_a.load(Ordering::SeqCst), 1);
        assert_eq!(count_b.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn channel_failure_does_not_block_others() {
        let count = Arc::new(AtomicUsize::new(0));
        let dispatcher = Dispatcher::new(
            None,
            vec![
                Box::new(MockNotifier {
                    name: "fail".to_string(),
                    send_count: Arc::new(AtomicUsize::new(0)),
                    should_fail: true,
                }),
                Box::new(MockNotifier {
                    name: "ok".to_string(),
                    send_count: count.clone(),
                    should_fail: false,
                }),
            ],
        );

        let results = dispatcher.dispatch(&notification()).await;
        assert!(!results[0].success);
        assert!(results[1].success);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn websocket_broadcast_runs_first() {
        let delivered = Arc::new(AtomicUsize::new(0));
        let counter = delivered.clone();
        let dispatcher = Dispatcher::new(
            Some(Box::new(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                3
            })),
            Vec::new(),
        );

        let results = dispatcher.dispatch(&notification()).await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].channel, "websocket");
        assert_eq!(delivered.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn config_gates_websocket_channel() {
        let config = NotificationConfig {
            websocket_enabled: false,
            slack_webhook_url: None,
            email_enabled: false,
            email_smtp_host: None,
            email_recipients: Vec::new(),
        };
        let dispatcher = Dispatcher::from_config(&config, Some(Box::new(|_| 1)));
        let results = dispatcher.dispatch(&notification()).await;
        assert!(results.is_empty());
    }
}
