//! Slack webhook channel.

use pulse_core::AnomalyNotification;

use crate::traits::{Notifier, NotifyError};

/// Posts a formatted JSON body to a Slack incoming-webhook URL.
pub struct SlackNotifier {
    webhook_url: String,
    /// Shared HTTP client (connection pooling).
    client: reqwest::Client,
}

impl SlackNotifier {
    pub fn new(webhook_url: String) -> Self {
        Self {
            webhook_url,
            client: reqwest::Client::new(),
        }
    }

    fn format_text(notification: &AnomalyNotification) -> String {
        format!(
            ":rotating_light: [{}] {} (rule {})",
            notification.severity, notification.message, notification.rule_id
        )
    }
}

#[async_trait::async_trait]
impl Notifier for SlackNotifier {
    async fn send(&self, notification: &AnomalyNotification) -> Result<(), NotifyError> {
        let body = serde_json::json!({ "text": Self::format_text(notification) });

        let response = self
            .client
            .post(&self.webhook_url)
            .json(&body)
            .send()
            .await?;
        let status = response.status();

        if !status.is_success() {
            let body_text = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            tracing::warn!(%status, body = %body_text, "slack webhook returned non-2xx status");
            return Err(NotifyError::Delivery(format!(
                "slack webhook returned {status}: {body_text}"
            )));
        }

        tracing::debug!(anomaly_id = %notification.anomaly_id, "slack notification delivered");
        Ok(())
    }

    fn channel_name(&self) -> &str {
        "slack"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use pulse_core::Severity;
    use uuid::Uuid;

    #[test]
    fn text_names_severity_message_and_rule() {
        let text = SlackNotifier::format_text(&AnomalyNotification {
            anomaly_id: Uuid::new_v4(),
            rule_id: "stat:login-spike".to_string(),
            severity: Severity::Critical,
            message: "spike detected".to_string(),
            detected_at: Utc::now(),
        });
        assert_eq!(
            text,
            ":rotating_light: [critical] spike detected (rule stat:login-spike)"
        );
    }
}
