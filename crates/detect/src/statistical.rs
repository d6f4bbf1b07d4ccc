//! Bucketed z-score detection against a recent baseline.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use pulse_core::{Anomaly, Event, Severity, StatProfile};

use crate::threshold::NowFn;

/// Evaluator-wide options for statistical anomalies.
pub struct StatisticalOptions {
    pub severity: Severity,
    /// Prefix applied to the profile id to form the anomaly `rule_id`.
    pub rule_id_prefix: String,
}

impl Default for StatisticalOptions {
    fn default() -> Self {
        Self {
            severity: Severity::Warning,
            rule_id_prefix: "stat:".to_string(),
        }
    }
}

/// Per-profile bucketed counts with z-score spike detection.
///
/// Bucket keys derive from event time, never wall-clock, so they are
/// deterministic regardless of worker latency. Retention is
/// `baseline_buckets + 1` buckets behind the current one: the spike may land
/// one bucket after the final baseline bucket, and a tighter window would
/// evict the oldest baseline bucket in that case.
pub struct StatisticalEvaluator {
    profiles: Vec<StatProfile>,
    buckets: HashMap<String, BTreeMap<i64, u64>>,
    last_trigger: HashMap<String, DateTime<Utc>>,
    options: StatisticalOptions,
    now_fn: NowFn,
}

impl StatisticalEvaluator {
    pub fn new(profiles: Vec<StatProfile>, options: StatisticalOptions) -> Self {
        Self::with_now_fn(profiles, options, Box::new(Utc::now))
    }

    pub fn with_now_fn(
        profiles: Vec<StatProfile>,
        options: StatisticalOptions,
        now_fn: NowFn,
    ) -> Self {
        Self {
            profiles,
            buckets: HashMap::new(),
            last_trigger: HashMap::new(),
            options,
            now_fn,
        }
    }

    pub fn profile_count(&self) -> usize {
        self.profiles.len()
    }

    /// Feed one event through every matching profile.
    pub fn evaluate_event(&mut self, event: &Event) -> Vec<Anomaly> {
        let mut anomalies = Vec::new();

        for idx in 0..self.profiles.len() {
            let profile = &self.profiles[idx];
            let matches = profile
                .filters
                .as_ref()
                .map(|f| f.matches(event))
                .unwrap_or(true);
            if !matches {
                continue;
            }
            if let Some(anomaly) = self.evaluate_profile(idx, event) {
                anomalies.push(anomaly);
            }
        }

        anomalies
    }

    fn evaluate_profile(&mut self, idx: usize, event: &Event) -> Option<Anomaly> {
        let profile = self.profiles[idx].clone();
        let bucket_ms = profile.bucket_ms();
        let bucket_start = event.timestamp_ms().div_euclid(bucket_ms) * bucket_ms;

        let buckets = self.buckets.entry(profile.id.clone()).or_default();
        *buckets.entry(bucket_start).or_insert(0) += 1;
        let current = buckets[&bucket_start];

        // Keep one bucket beyond the baseline to tolerate a gap between the
        // last baseline bucket and the spike.
        let retention_cutoff = bucket_start - (profile.baseline_buckets as i64 + 1) * bucket_ms;
        buckets.retain(|&start, _| start >= retention_cutoff);

        // Completed buckets, ascending, most recent `baseline_buckets`.
        let baseline: Vec<u64> = buckets
            .iter()
            .filter(|(&start, _)| start != bucket_start)
            .map(|(_, &count)| count)
            .collect();
        if baseline.len() < profile.baseline_buckets {
            return None;
        }
        let baseline = &baseline[baseline.len() - profile.baseline_buckets..];

        let mean = baseline.iter().sum::<u64>() as f64 / baseline.len() as f64;
        let variance = baseline
            .iter()
            .map(|&c| {
                let d = c as f64 - mean;
                d * d
            })
            .sum::<f64>()
            / baseline.len() as f64;
        let stddev = variance.sqrt();
        if stddev <= 0.0 {
            // Uniform baseline: no meaningful deviation to measure.
            return None;
        }

        let z = (current as f64 - mean) / stddev;
        if z < profile.z_threshold {
            return None;
        }

        let now = (self.now_fn)();
        if let Some(cooldown) = profile.cooldown_seconds {
            if cooldown > 0 {
                if let Some(last) = self.last_trigger.get(&profile.id) {
                    if now.signed_duration_since(*last).num_milliseconds()
                        < i64::from(cooldown) * 1000
                    {
                        return None;
                    }
                }
            }
        }
        self.last_trigger.insert(profile.id.clone(), now);

        let filters = profile
            .filters
            .as_ref()
            .map(|f| f.to_string())
            .unwrap_or_else(|| "any".to_string());
        let message = format!(
            "Statistical profile \"{}\" anomaly: z={:.2} (count {} vs mean {:.2}, stddev {:.2}) in {}s bucket starting at {} [{}]",
            profile.id, z, current, mean, stddev, profile.bucket_seconds, bucket_start, filters
        );
        tracing::debug!(profile = %profile.id, z, current, "statistical profile triggered");

        Some(Anomaly {
            anomaly_id: Uuid::new_v4(),
            event_id: event.event_id,
            rule_id: format!("{}{}", self.options.rule_id_prefix, profile.id),
            severity: self.options.severity,
            message,
            detected_at: now,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const BUCKET_MS: i64 = 60_000;
    const BASE: i64 = 1_700_000_040_000; // aligned to a 60s bucket boundary

    fn profile(cooldown_seconds: Option<u32>) -> StatProfile {
        StatProfile {
            id: "login-spike".to_string(),
            bucket_seconds: 60,
            baseline_buckets: 5,
            z_threshold: 2.0,
            cooldown_seconds,
            filters: None,
        }
    }

    fn event_at(ms: i64) -> Event {
        Event {
            event_id: Uuid::new_v4(),
            event_type: "login".to_string(),
            source: "web".to_string(),
            timestamp: Utc.timestamp_millis_opt(ms).unwrap(),
            payload: serde_json::json!({}),
            metadata: serde_json::json!({}),
        }
    }

    /// Feed `count` events into the bucket starting at `bucket_start`,
    /// returning every anomaly produced along the way.
    fn feed_bucket(
        evaluator: &mut StatisticalEvaluator,
        bucket_start: i64,
        count: u64,
    ) -> Vec<Anomaly> {
        let mut all = Vec::new();
        for i in 0..count {
            all.extend(evaluator.evaluate_event(&event_at(bucket_start + i as i64)));
        }
        all
    }

    fn fill_baseline(evaluator: &mut StatisticalEvaluator) {
        // Baseline counts [2, 4, 2, 4, 3] across five buckets.
        for (bucket, count) in [2u64, 4, 2, 4, 3].into_iter().enumerate() {
            let fired = feed_bucket(evaluator, BASE + bucket as i64 * BUCKET_MS, count);
            assert!(fired.is_empty(), "no alerts while the baseline builds");
        }
    }

    #[test]
    fn spike_after_baseline_fires_exactly_once() {
        let mut evaluator = StatisticalEvaluator::new(vec![profile(None)], Default::default());
        fill_baseline(&mut evaluator);

        // mean 3.0, stddev 0.894: the fifth event is the first with z >= 2.
        let fired = feed_bucket(&mut evaluator, BASE + 5 * BUCKET_MS, 5);
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].rule_id, "stat:login-spike");
        assert_eq!(fired[0].severity, Severity::Warning);
        assert!(fired[0].message.contains("z=2.24"), "{}", fired[0].message);
    }

    #[test]
    fn quiet_bucket_after_baseline_stays_silent() {
        let mut evaluator = StatisticalEvaluator::new(vec![profile(None)], Default::default());
        fill_baseline(&mut evaluator);
        assert!(feed_bucket(&mut evaluator, BASE + 5 * BUCKET_MS, 1).is_empty());
    }

    #[test]
    fn spike_after_a_one_bucket_gap_still_fires() {
        let mut evaluator = StatisticalEvaluator::new(vec![profile(None)], Default::default());
        fill_baseline(&mut evaluator);
        // Skip bucket 5 entirely; burst in bucket 6. Retention of
        // baseline+1 buckets keeps all five baseline buckets alive.
        let fired = feed_bucket(&mut evaluator, BASE + 6 * BUCKET_MS, 5);
        assert_eq!(fired.len(), 1);
    }

    #[test]
    fn uniform_baseline_never_divides_by_zero() {
        let mut evaluator = StatisticalEvaluator::new(vec![profile(None)], Default::default());
        for bucket in 0..5 {
            feed_bucket(&mut evaluator, BASE + bucket * BUCKET_MS, 3);
        }
        // stddev of [3,3,3,3,3] is 0 — silently guarded.
        assert!(feed_bucket(&mut evaluator, BASE + 5 * BUCKET_MS, 50).is_empty());
    }

    #[test]
    fn insufficient_baseline_is_silent() {
        let mut evaluator = StatisticalEvaluator::new(vec![profile(None)], Default::default());
        feed_bucket(&mut evaluator, BASE, 2);
        feed_bucket(&mut evaluator, BASE + BUCKET_MS, 4);
        assert!(feed_bucket(&mut evaluator, BASE + 2 * BUCKET_MS, 40).is_empty());
    }

    #[test]
    fn cooldown_suppresses_repeat_triggers() {
        let clock = std::sync::Arc::new(std::sync::atomic::AtomicI64::new(BASE));
        let reader = clock.clone();
        let mut evaluator = StatisticalEvaluator::with_now_fn(
            vec![profile(Some(300))],
            Default::default(),
            Box::new(move || {
                Utc.timestamp_millis_opt(reader.load(std::sync::atomic::Ordering::SeqCst))
                    .unwrap()
            }),
        );
        fill_baseline(&mut evaluator);

        let fired = feed_bucket(&mut evaluator, BASE + 5 * BUCKET_MS, 6);
        assert_eq!(fired.len(), 1, "sixth event would re-trigger but for cooldown");
    }

    #[test]
    fn filters_scope_profiles_to_matching_events() {
        let mut filtered = profile(None);
        filtered.filters = Some(pulse_core::RuleFilters {
            event_type: Some("error".to_string()),
            source: None,
        });
        let mut evaluator = StatisticalEvaluator::new(vec![filtered], Default::default());
        // "login" events never touch the profile's buckets.
        feed_bucket(&mut evaluator, BASE, 10);
        assert!(evaluator.buckets.is_empty());
    }
}
