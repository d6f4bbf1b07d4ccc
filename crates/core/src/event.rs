use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ValidationError;

/// Maximum length for `event_type` and `source`.
pub const MAX_NAME_LEN: usize = 255;

/// A canonical application event flowing through the pipeline.
///
/// The identity (`event_id`) is assigned at enqueue time when the client did
/// not supply one, and is never rewritten by downstream stages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub event_id: Uuid,
    pub event_type: String,
    pub source: String,
    pub timestamp: DateTime<Utc>,
    /// Schemaless key→value payload supplied by the producer.
    #[serde(default = "empty_object")]
    pub payload: serde_json::Value,
    /// Schemaless transport/context metadata.
    #[serde(default = "empty_object")]
    pub metadata: serde_json::Value,
}

impl Event {
    /// Event time in epoch milliseconds — the evaluators' time axis.
    pub fn timestamp_ms(&self) -> i64 {
        self.timestamp.timestamp_millis()
    }
}

fn empty_object() -> serde_json::Value {
    serde_json::json!({})
}

/// An event as received on the ingest endpoints, before identity assignment.
#[derive(Debug, Clone, Deserialize)]
pub struct IngestEvent {
    pub event_id: Option<Uuid>,
    pub event_type: String,
    pub source: String,
    pub timestamp: DateTime<Utc>,
    pub payload: Option<serde_json::Value>,
    pub metadata: Option<serde_json::Value>,
}

impl IngestEvent {
    /// Semantic validation beyond what deserialization already enforces.
    ///
    /// Collects every issue instead of stopping at the first so the 400
    /// response can report all of them.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let mut issues = Vec::new();

        if self.event_type.is_empty() {
            issues.push("event_type must not be empty".to_string());
        } else if self.event_type.len() > MAX_NAME_LEN {
            issues.push(format!("event_type exceeds {} characters", MAX_NAME_LEN));
        }

        if self.source.is_empty() {
            issues.push("source must not be empty".to_string());
        } else if self.source.len() > MAX_NAME_LEN {
            issues.push(format!("source exceeds {} characters", MAX_NAME_LEN));
        }

        if let Some(p) = &self.payload {
            if !p.is_object() {
                issues.push("payload must be an object".to_string());
            }
        }
        if let Some(m) = &self.metadata {
            if !m.is_object() {
                issues.push("metadata must be an object".to_string());
            }
        }

        if issues.is_empty() {
            Ok(())
        } else {
            Err(ValidationError { issues })
        }
    }

    /// Assign identity and canonicalize into an [`Event`].
    ///
    /// A client-supplied `event_id` is preserved; otherwise a fresh v4 UUID
    /// is generated here and nowhere else.
    pub fn into_event(self) -> Event {
        Event {
            event_id: self.event_id.unwrap_or_else(Uuid::new_v4),
            event_type: self.event_type,
            source: self.source,
            timestamp: self.timestamp,
            payload: self.payload.unwrap_or_else(empty_object),
            metadata: self.metadata.unwrap_or_else(empty_object),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> IngestEvent {
        serde_json::from_value(serde_json::json!({
            "event_type": "page_view",
            "source": "web",
            "timestamp": "2026-02-18T12:00:00Z",
            "payload": {"url": "/home"}
        }))
        .unwrap()
    }

    #[test]
    fn valid_event_passes() {
        assert!(sample().validate().is_ok());
    }

    #[test]
    fn assigns_id_when_absent() {
        let event = sample().into_event();
        assert!(!event.event_id.is_nil());
        assert_eq!(event.metadata, serde_json::json!({}));
    }

    #[test]
    fn preserves_client_id() {
        let id = Uuid::new_v4();
        let mut ingest = sample();
        ingest.event_id = Some(id);
        assert_eq!(ingest.into_event().event_id, id);
    }

    #[test]
    fn rejects_empty_and_oversized_fields() {
        let mut ingest = sample();
        ingest.event_type = String::new();
        ingest.source = "s".repeat(MAX_NAME_LEN + 1);
        let err = ingest.validate().unwrap_err();
        assert_eq!(err.issues.len(), 2);
    }

    #[test]
    fn rejects_non_object_payload() {
        let mut ingest = sample();
        ingest.payload = Some(serde_json::json!([1, 2]));
        assert!(ingest.validate().is_err());
    }

    #[test]
    fn timestamp_ms_matches_wire_instant() {
        let event = sample().into_event();
        assert_eq!(event.timestamp_ms(), 1_771_416_000_000);
    }
}
