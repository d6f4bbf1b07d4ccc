//! Anomaly detection: the shared rule snapshot and the two evaluators.
//!
//! Evaluator state is owned by the stream consumer task — the sole writer —
//! so neither evaluator carries locks. Only the snapshot store is shared
//! across tasks.

pub mod snapshot;
pub mod statistical;
pub mod threshold;

pub use snapshot::SnapshotStore;
pub use statistical::{StatisticalEvaluator, StatisticalOptions};
pub use threshold::ThresholdEvaluator;
