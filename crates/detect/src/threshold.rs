//! Windowed count threshold evaluation with cooldown suppression.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use pulse_core::{Anomaly, Event, Rule};

/// Wall-clock source, injectable for deterministic tests.
pub type NowFn = Box<dyn Fn() -> DateTime<Utc> + Send>;

/// Per-rule sliding-window counter.
///
/// Windows hold event-time milliseconds in arrival order. Arrivals are
/// almost-monotonic in event time, so pruning is a front-scan: the pruned
/// prefix is the longest prefix below the cutoff. An out-of-order event
/// still lands at the tail and may transiently leave entries above the
/// cutoff further back — accepted, since evaluation is driven by arriving
/// events. Cooldown uses wall-clock time: suppression is about notification
/// rate, not event time.
pub struct ThresholdEvaluator {
    windows: HashMap<Uuid, VecDeque<i64>>,
    last_trigger: HashMap<Uuid, DateTime<Utc>>,
    now_fn: NowFn,
}

impl Default for ThresholdEvaluator {
    fn default() -> Self {
        Self::new()
    }
}

impl ThresholdEvaluator {
    pub fn new() -> Self {
        Self::with_now_fn(Box::new(Utc::now))
    }

    pub fn with_now_fn(now_fn: NowFn) -> Self {
        Self {
            windows: HashMap::new(),
            last_trigger: HashMap::new(),
            now_fn,
        }
    }

    /// Evaluate one event against the rule snapshot, returning any anomalies
    /// it triggers.
    pub fn evaluate(&mut self, event: &Event, rules: &[Rule]) -> Vec<Anomaly> {
        let mut anomalies = Vec::new();
        let event_ms = event.timestamp_ms();

        for rule in rules {
            if !rule.enabled || !rule.condition.matches(event) {
                continue;
            }

            let window = self.windows.entry(rule.rule_id).or_default();
            window.push_back(event_ms);

            let cutoff = event_ms - rule.window_ms();
            while window.front().is_some_and(|&ts| ts < cutoff) {
                window.pop_front();
            }

            let count = window.len();
            if !rule.condition.operator.compare(count as f64, rule.condition.value) {
                continue;
            }

            let now = (self.now_fn)();
            if rule.cooldown_seconds > 0 {
                if let Some(last) = self.last_trigger.get(&rule.rule_id) {
                    if now.signed_duration_since(*last).num_milliseconds() < rule.cooldown_ms() {
                        continue;
                    }
                }
            }
            self.last_trigger.insert(rule.rule_id, now);

            let message = format!(
                "Threshold rule \"{}\" triggered: count({}) {} {}",
                rule.name, count, rule.condition.operator, rule.condition.value
            );
            tracing::debug!(rule_id = %rule.rule_id, count, "threshold rule triggered");
            anomalies.push(Anomaly {
                anomaly_id: Uuid::new_v4(),
                event_id: event.event_id,
                rule_id: rule.rule_id.to_string(),
                severity: rule.severity,
                message,
                detected_at: now,
            });
        }

        anomalies
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI64, Ordering};
    use std::sync::Arc;

    use chrono::TimeZone;
    use pulse_core::{CompareOp, ConditionKind, MetricKind, RuleCondition, RuleFilters, Severity};

    fn rule(operator: CompareOp, value: f64, window_seconds: u32, cooldown_seconds: u32) -> Rule {
        Rule {
            rule_id: Uuid::new_v4(),
            name: "hi-err".to_string(),
            enabled: true,
            severity: Severity::Critical,
            window_seconds,
            cooldown_seconds,
            condition: RuleCondition {
                kind: ConditionKind::Threshold,
                metric: MetricKind::Count,
                filters: Some(RuleFilters {
                    event_type: Some("error".to_string()),
                    source: None,
                }),
                operator,
                value,
            },
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn event_at(ms: i64) -> Event {
        Event {
            event_id: Uuid::new_v4(),
            event_type: "error".to_string(),
            source: "payment_service".to_string(),
            timestamp: Utc.timestamp_millis_opt(ms).unwrap(),
            payload: serde_json::json!({}),
            metadata: serde_json::json!({}),
        }
    }

    /// Evaluator whose wall clock is controlled by the returned handle
    /// (epoch milliseconds).
    fn clocked_evaluator(start_ms: i64) -> (ThresholdEvaluator, Arc<AtomicI64>) {
        let clock = Arc::new(AtomicI64::new(start_ms));
        let reader = clock.clone();
        let evaluator = ThresholdEvaluator::with_now_fn(Box::new(move || {
            Utc.timestamp_millis_opt(reader.load(Ordering::SeqCst)).unwrap()
        }));
        (evaluator, clock)
    }

    #[test]
    fn fires_when_count_exceeds_value() {
        let mut evaluator = ThresholdEvaluator::new();
        let rules = vec![rule(CompareOp::Gt, 5.0, 60, 0)];
        let base = 1_700_000_000_000;

        let mut fired = Vec::new();
        for i in 0..6 {
            fired = evaluator.evaluate(&event_at(base + i * 100), &rules);
        }
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].severity, Severity::Critical);
        assert_eq!(
            fired[0].message,
            "Threshold rule \"hi-err\" triggered: count(6) > 5"
        );
    }

    #[test]
    fn filtered_events_do_not_count() {
        let mut evaluator = ThresholdEvaluator::new();
        let rules = vec![rule(CompareOp::Ge, 1.0, 60, 0)];
        let mut event = event_at(1_700_000_000_000);
        event.event_type = "page_view".to_string();
        assert!(evaluator.evaluate(&event, &rules).is_empty());
    }

    #[test]
    fn count_at_value_respects_operator() {
        let base = 1_700_000_000_000;
        // count == value: >= fires, > does not.
        let mut ge = ThresholdEvaluator::new();
        let ge_rules = vec![rule(CompareOp::Ge, 2.0, 60, 0)];
        assert!(ge.evaluate(&event_at(base), &ge_rules).is_empty());
        assert_eq!(ge.evaluate(&event_at(base + 1), &ge_rules).len(), 1);

        let mut gt = ThresholdEvaluator::new();
        let gt_rules = vec![rule(CompareOp::Gt, 2.0, 60, 0)];
        assert!(gt.evaluate(&event_at(base), &gt_rules).is_empty());
        assert!(gt.evaluate(&event_at(base + 1), &gt_rules).is_empty());
    }

    #[test]
    fn window_boundary_is_inclusive_at_exact_drift() {
        let base = 1_700_000_000_000;
        let window_ms = 60_000;

        // Second event exactly window_seconds later: the first entry sits on
        // the cutoff and is kept.
        let mut evaluator = ThresholdEvaluator::new();
        let rules = vec![rule(CompareOp::Ge, 2.0, 60, 0)];
        assert!(evaluator.evaluate(&event_at(base), &rules).is_empty());
        assert_eq!(evaluator.evaluate(&event_at(base + window_ms), &rules).len(), 1);

        // One millisecond past the window: the first entry is pruned.
        let mut evaluator = ThresholdEvaluator::new();
        assert!(evaluator.evaluate(&event_at(base), &rules).is_empty());
        assert!(evaluator
            .evaluate(&event_at(base + window_ms + 1), &rules)
            .is_empty());
    }

    #[test]
    fn out_of_order_event_still_counts() {
        let mut evaluator = ThresholdEvaluator::new();
        let rules = vec![rule(CompareOp::Ge, 2.0, 60, 0)];
        let base = 1_700_000_000_000;
        assert!(evaluator.evaluate(&event_at(base), &rules).is_empty());
        // Arrives later but carries an older timestamp.
        assert_eq!(evaluator.evaluate(&event_at(base - 5_000), &rules).len(), 1);
    }

    #[test]
    fn cooldown_suppresses_by_wall_clock() {
        let (mut evaluator, clock) = clocked_evaluator(1_700_000_000_000);
        let rules = vec![rule(CompareOp::Ge, 1.0, 3600, 60)];
        let base = 1_700_000_000_000;

        assert_eq!(evaluator.evaluate(&event_at(base), &rules).len(), 1);
        // 30s later: suppressed.
        clock.fetch_add(30_000, Ordering::SeqCst);
        assert!(evaluator.evaluate(&event_at(base + 30_000), &rules).is_empty());
        // 60s after the trigger: fires again.
        clock.fetch_add(30_000, Ordering::SeqCst);
        assert_eq!(evaluator.evaluate(&event_at(base + 60_000), &rules).len(), 1);
    }

    #[test]
    fn zero_cooldown_never_suppresses() {
        let (mut evaluator, _clock) = clocked_evaluator(1_700_000_000_000);
        let rules = vec![rule(CompareOp::Ge, 1.0, 3600, 0)];
        let base = 1_700_000_000_000;
        assert_eq!(evaluator.evaluate(&event_at(base), &rules).len(), 1);
        assert_eq!(evaluator.evaluate(&event_at(base + 1), &rules).len(), 1);
    }

    #[test]
    fn disabled_rules_are_skipped() {
        let mut evaluator = ThresholdEvaluator::new();
        let mut disabled = rule(CompareOp::Ge, 1.0, 60, 0);
        disabled.enabled = false;
        assert!(evaluator
            .evaluate(&event_at(1_700_000_000_000), &[disabled])
            .is_empty());
    }
}
