//! The shared rule snapshot.

use std::sync::{Arc, RwLock};

use pulse_core::Rule;

/// Single-writer/multi-reader cell holding the current enabled-rule list.
///
/// `get` hands out the current `Arc` without copying the list; `set` swaps
/// the whole list atomically, so a reader observes either the previous or
/// the next snapshot in full — never a partial mix.
#[derive(Debug, Default)]
pub struct SnapshotStore {
    current: RwLock<Arc<Vec<Rule>>>,
}

impl SnapshotStore {
    pub fn new(rules: Vec<Rule>) -> Self {
        Self {
            current: RwLock::new(Arc::new(rules)),
        }
    }

    pub fn get(&self) -> Arc<Vec<Rule>> {
        self.current.read().expect("snapshot lock poisoned").clone()
    }

    pub fn set(&self, next: Vec<Rule>) {
        *self.current.write().expect("snapshot lock poisoned") = Arc::new(next);
    }

    pub fn len(&self) -> usize {
        self.get().len()
    }

    pub fn is_empty(&self) -> bool {
        self.get().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use pulse_core::{CompareOp, ConditionKind, MetricKind, RuleCondition, Severity};
    use uuid::Uuid;

    fn rule(name: &str) -> Rule {
        Rule {
            rule_id: Uuid::new_v4(),
            name: name.to_string(),
            enabled: true,
            severity: Severity::Warning,
            window_seconds: 60,
            cooldown_seconds: 0,
            condition: RuleCondition {
                kind: ConditionKind::Threshold,
                metric: MetricKind::Count,
                filters: None,
                operator: CompareOp::Gt,
                value: 5.0,
            },
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn readers_keep_the_snapshot_they_took() {
        let store = SnapshotStore::new(vec![rule("a")]);
        let before = store.get();
        store.set(vec![rule("b"), rule("c")]);
        // The old reference is unchanged; a fresh read sees the swap.
        assert_eq!(before.len(), 1);
        assert_eq!(before[0].name, "a");
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn empty_by_default() {
        assert!(SnapshotStore::default().is_empty());
    }
}
