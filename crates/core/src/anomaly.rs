use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::rule::Severity;

/// A detected anomaly, as persisted.
///
/// `event_id` names the triggering event but is intentionally not a foreign
/// key: event cleanup must never break anomaly inserts. `rule_id` is a string
/// because statistical anomalies carry a prefixed profile id with no row in
/// the rules table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Anomaly {
    pub anomaly_id: Uuid,
    pub event_id: Uuid,
    pub rule_id: String,
    pub severity: Severity,
    pub message: String,
    pub detected_at: DateTime<Utc>,
}

/// Wire shape published on the anomaly pub/sub channel and pushed to
/// WebSocket clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnomalyNotification {
    pub anomaly_id: Uuid,
    pub rule_id: String,
    pub severity: Severity,
    pub message: String,
    pub detected_at: DateTime<Utc>,
}

impl From<&Anomaly> for AnomalyNotification {
    fn from(a: &Anomaly) -> Self {
        Self {
            anomaly_id: a.anomaly_id,
            rule_id: a.rule_id.clone(),
            severity: a.severity,
            message: a.message.clone(),
            detected_at: a.detected_at,
        }
    }
}

impl AnomalyNotification {
    /// The JSON text frame sent to dashboard WebSocket clients.
    pub fn to_ws_message(&self) -> String {
        serde_json::json!({
            "type": "anomaly",
            "severity": self.severity,
            "message": self.message,
            "detected_at": self.detected_at,
            "anomaly_id": self.anomaly_id,
            "rule_id": self.rule_id,
        })
        .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ws_message_shape() {
        let notification = AnomalyNotification {
            anomaly_id: Uuid::new_v4(),
            rule_id: "stat:login-spike".to_string(),
            severity: Severity::Warning,
            message: "spike".to_string(),
            detected_at: Utc::now(),
        };
        let value: serde_json::Value =
            serde_json::from_str(&notification.to_ws_message()).unwrap();
        assert_eq!(value["type"], "anomaly");
        assert_eq!(value["severity"], "warning");
        assert_eq!(value["rule_id"], "stat:login-spike");
    }
}
