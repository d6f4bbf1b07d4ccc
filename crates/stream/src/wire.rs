//! Flat field-list wire shape of a stream entry.
//!
//! Every value is a string: `payload` and `metadata` are JSON-encoded, the
//! timestamp is RFC 3339.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use pulse_core::Event;

use crate::error::StreamError;

/// Serialize an event into the `(name, value)` pairs appended to the stream.
pub fn event_fields(event: &Event) -> Result<Vec<(String, String)>, StreamError> {
    Ok(vec![
        ("event_id".to_string(), event.event_id.to_string()),
        ("event_type".to_string(), event.event_type.clone()),
        ("source".to_string(), event.source.clone()),
        ("timestamp".to_string(), event.timestamp.to_rfc3339()),
        ("payload".to_string(), serde_json::to_string(&event.payload)?),
        ("metadata".to_string(), serde_json::to_string(&event.metadata)?),
    ])
}

fn field<'a>(fields: &'a [(String, String)], name: &str) -> Result<&'a str, StreamError> {
    fields
        .iter()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.as_str())
        .ok_or_else(|| StreamError::Parse(format!("missing field '{}'", name)))
}

/// Parse a consumed entry's fields back into an [`Event`].
///
/// Payload/metadata that fail to parse fall back to an empty object: the
/// event identity and routing fields are what the pipeline depends on.
pub fn parse_entry(fields: &[(String, String)]) -> Result<Event, StreamError> {
    let event_id: Uuid = field(fields, "event_id")?
        .parse()
        .map_err(|e| StreamError::Parse(format!("bad event_id: {}", e)))?;
    let timestamp: DateTime<Utc> = field(fields, "timestamp")?
        .parse()
        .map_err(|e| StreamError::Parse(format!("bad timestamp: {}", e)))?;

    let json_or_empty = |name: &str| -> serde_json::Value {
        fields
            .iter()
            .find(|(k, _)| k == name)
            .and_then(|(_, v)| serde_json::from_str(v).ok())
            .unwrap_or_else(|| serde_json::json!({}))
    };

    Ok(Event {
        event_id,
        event_type: field(fields, "event_type")?.to_string(),
        source: field(fields, "source")?.to_string(),
        timestamp,
        payload: json_or_empty("payload"),
        metadata: json_or_empty("metadata"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_event() -> Event {
        Event {
            event_id: Uuid::new_v4(),
            event_type: "error".to_string(),
            source: "payment_service".to_string(),
            timestamp: "2026-02-18T12:00:00Z".parse().unwrap(),
            payload: serde_json::json!({"code": 502}),
            metadata: serde_json::json!({}),
        }
    }

    #[test]
    fn fields_parse_back_to_the_same_event() {
        let event = sample_event();
        let parsed = parse_entry(&event_fields(&event).unwrap()).unwrap();
        assert_eq!(parsed.event_id, event.event_id);
        assert_eq!(parsed.timestamp, event.timestamp);
        assert_eq!(parsed.payload, event.payload);
    }

    #[test]
    fn missing_identity_is_an_error() {
        let fields = vec![("event_type".to_string(), "error".to_string())];
        assert!(matches!(parse_entry(&fields), Err(StreamError::Parse(_))));
    }

    #[test]
    fn garbage_payload_defaults_to_empty_object() {
        let event = sample_event();
        let mut fields = event_fields(&event).unwrap();
        for (k, v) in &mut fields {
            if k == "payload" {
                *v = "{not json".to_string();
            }
        }
        let parsed = parse_entry(&fields).unwrap();
        assert_eq!(parsed.payload, serde_json::json!({}));
    }
}
