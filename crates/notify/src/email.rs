//! Email channel stub.
//!
//! Real SMTP delivery is out of scope; an enabled email channel emits a
//! structured log so operators can verify the routing end to end.

use pulse_core::AnomalyNotification;

use crate::traits::{Notifier, NotifyError};

pub struct EmailNotifier {
    smtp_host: String,
    recipients: Vec<String>,
}

impl EmailNotifier {
    pub fn new(smtp_host: String, recipients: Vec<String>) -> Self {
        Self {
            smtp_host,
            recipients,
        }
    }
}

#[async_trait::async_trait]
impl Notifier for EmailNotifier {
    async fn send(&self, notification: &AnomalyNotification) -> Result<(), NotifyError> {
        tracing::info!(
            smtp_host = %self.smtp_host,
            recipients = %self.recipients.join(","),
            anomaly_id = %notification.anomaly_id,
            severity = %notification.severity,
            message = %notification.message,
            "email notification (stub)"
        );
        Ok(())
    }

    fn channel_name(&self) -> &str {
        "email"
    }
}
