//! PostgreSQL persistence: events, anomalies, and rule definitions.

pub mod anomalies;
pub mod db;
pub mod error;
pub mod events;
pub mod rules;

pub use anomalies::{AnomalyFilter, AnomalyRepository, AnomalyRow, PgAnomalyRepository};
pub use db::{connect_pool, ensure_schema};
pub use error::StorageError;
pub use events::{
    EventFilter, EventRepository, EventRow, GroupBy, MetricRow, PgEventRepository,
};
pub use rules::{NewRule, PgRuleRepository, RulePatch, RuleRow};
