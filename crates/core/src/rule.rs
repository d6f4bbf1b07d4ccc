use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::event::Event;

/// Anomaly severity, ordered worst-first for dashboards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    Warning,
    Info,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Critical => "critical",
            Severity::Warning => "warning",
            Severity::Info => "info",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "critical" => Ok(Severity::Critical),
            "warning" => Ok(Severity::Warning),
            "info" => Ok(Severity::Info),
            other => Err(format!("unknown severity '{}'", other)),
        }
    }
}

/// Comparison operator in a threshold condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompareOp {
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    Ge,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Le,
    #[serde(rename = "==")]
    Eq,
    #[serde(rename = "!=")]
    Ne,
}

impl CompareOp {
    /// Evaluate `lhs <op> rhs`.
    pub fn compare(&self, lhs: f64, rhs: f64) -> bool {
        match self {
            CompareOp::Gt => lhs > rhs,
            CompareOp::Ge => lhs >= rhs,
            CompareOp::Lt => lhs < rhs,
            CompareOp::Le => lhs <= rhs,
            CompareOp::Eq => lhs == rhs,
            CompareOp::Ne => lhs != rhs,
        }
    }
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Eq => "==",
            CompareOp::Ne => "!=",
        };
        f.write_str(s)
    }
}

/// Event filters on a rule or profile. A missing filter matches everything.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuleFilters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

impl RuleFilters {
    /// True when every set filter matches the event.
    pub fn matches(&self, event: &Event) -> bool {
        if let Some(et) = &self.event_type {
            if et != &event.event_type {
                return false;
            }
        }
        if let Some(src) = &self.source {
            if src != &event.source {
                return false;
            }
        }
        true
    }

    pub fn is_empty(&self) -> bool {
        self.event_type.is_none() && self.source.is_none()
    }
}

impl fmt::Display for RuleFilters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.event_type, &self.source) {
            (Some(et), Some(src)) => write!(f, "event_type={}, source={}", et, src),
            (Some(et), None) => write!(f, "event_type={}", et),
            (None, Some(src)) => write!(f, "source={}", src),
            (None, None) => f.write_str("any"),
        }
    }
}

/// Condition kind. Only windowed threshold conditions exist today; the tag
/// is kept explicit so the JSON column stays self-describing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConditionKind {
    Threshold,
}

/// The metric a condition aggregates over its window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    Count,
}

/// A threshold condition: compare the windowed event count against a value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleCondition {
    #[serde(rename = "type")]
    pub kind: ConditionKind,
    pub metric: MetricKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filters: Option<RuleFilters>,
    pub operator: CompareOp,
    pub value: f64,
}

impl RuleCondition {
    /// True when the condition's filters (if any) match the event.
    pub fn matches(&self, event: &Event) -> bool {
        self.filters.as_ref().map(|f| f.matches(event)).unwrap_or(true)
    }
}

/// An operator-configured detection rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    pub rule_id: Uuid,
    pub name: String,
    pub enabled: bool,
    pub severity: Severity,
    pub window_seconds: u32,
    pub cooldown_seconds: u32,
    pub condition: RuleCondition,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Rule {
    pub fn window_ms(&self) -> i64 {
        i64::from(self.window_seconds) * 1000
    }

    pub fn cooldown_ms(&self) -> i64 {
        i64::from(self.cooldown_seconds) * 1000
    }
}

/// Reason attached to a `rules_changed` pub/sub message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleChangeReason {
    Create,
    Update,
    Patch,
    Delete,
}

/// Wire shape of a `rules_changed` message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleChange {
    pub ts: DateTime<Utc>,
    pub reason: RuleChangeReason,
    pub rule_id: Uuid,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(event_type: &str, source: &str) -> Event {
        Event {
            event_id: Uuid::new_v4(),
            event_type: event_type.to_string(),
            source: source.to_string(),
            timestamp: Utc::now(),
            payload: serde_json::json!({}),
            metadata: serde_json::json!({}),
        }
    }

    #[test]
    fn empty_filters_match_all() {
        let filters = RuleFilters::default();
        assert!(filters.matches(&event("error", "payments")));
    }

    #[test]
    fn set_filters_must_all_match() {
        let filters = RuleFilters {
            event_type: Some("error".to_string()),
            source: Some("payments".to_string()),
        };
        assert!(filters.matches(&event("error", "payments")));
        assert!(!filters.matches(&event("error", "checkout")));
        assert!(!filters.matches(&event("page_view", "payments")));
    }

    #[test]
    fn operator_equality_boundaries() {
        // count == value: triggers for >=, <=, ==; not >, <, !=.
        assert!(!CompareOp::Gt.compare(5.0, 5.0));
        assert!(CompareOp::Ge.compare(5.0, 5.0));
        assert!(!CompareOp::Lt.compare(5.0, 5.0));
        assert!(CompareOp::Le.compare(5.0, 5.0));
        assert!(CompareOp::Eq.compare(5.0, 5.0));
        assert!(!CompareOp::Ne.compare(5.0, 5.0));
        assert!(CompareOp::Ne.compare(6.0, 5.0));
    }

    #[test]
    fn operator_wire_symbols_roundtrip() {
        let op: CompareOp = serde_json::from_str("\">=\"").unwrap();
        assert_eq!(op, CompareOp::Ge);
        assert_eq!(serde_json::to_string(&CompareOp::Ne).unwrap(), "\"!=\"");
    }

    #[test]
    fn condition_json_shape() {
        let condition: RuleCondition = serde_json::from_value(serde_json::json!({
            "type": "threshold",
            "metric": "count",
            "filters": {"event_type": "error", "source": "payment_service"},
            "operator": ">",
            "value": 5
        }))
        .unwrap();
        assert_eq!(condition.kind, ConditionKind::Threshold);
        assert_eq!(condition.operator, CompareOp::Gt);
        assert!(condition.matches(&event("error", "payment_service")));
        assert!(!condition.matches(&event("error", "web")));
    }

    #[test]
    fn severity_text_roundtrip() {
        assert_eq!("critical".parse::<Severity>().unwrap(), Severity::Critical);
        assert_eq!(Severity::Warning.to_string(), "warning");
        assert!("fatal".parse::<Severity>().is_err());
    }
}
