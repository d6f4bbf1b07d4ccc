//! Rule definition CRUD.
//!
//! The `condition` column is JSONB; rows whose condition no longer parses
//! are skipped (with a warning) when loading the evaluator snapshot, so a
//! bad row can never take the hot loop down.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{PgPool, Postgres, QueryBuilder};
use tracing::warn;
use uuid::Uuid;

use pulse_core::{Rule, RuleCondition, Severity};

use crate::error::StorageError;

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct RuleRow {
    pub rule_id: Uuid,
    pub name: String,
    pub enabled: bool,
    pub severity: String,
    pub window_seconds: i32,
    pub cooldown_seconds: i32,
    pub condition: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RuleRow {
    /// Convert into the evaluator's domain type; `None` when the stored
    /// severity or condition no longer parses.
    pub fn into_rule(self) -> Option<Rule> {
        let severity: Severity = match self.severity.parse() {
            Ok(s) => s,
            Err(reason) => {
                warn!(rule_id = %self.rule_id, %reason, "skipping rule with bad severity");
                return None;
            }
        };
        let condition: RuleCondition = match serde_json::from_value(self.condition) {
            Ok(c) => c,
            Err(e) => {
                warn!(rule_id = %self.rule_id, error = %e, "skipping rule with unparseable condition");
                return None;
            }
        };
        Some(Rule {
            rule_id: self.rule_id,
            name: self.name,
            enabled: self.enabled,
            severity,
            window_seconds: self.window_seconds.max(0) as u32,
            cooldown_seconds: self.cooldown_seconds.max(0) as u32,
            condition,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

/// Values for a create or full-replace write.
#[derive(Debug, Clone)]
pub struct NewRule {
    pub name: String,
    pub enabled: bool,
    pub severity: Severity,
    pub window_seconds: u32,
    pub cooldown_seconds: u32,
    pub condition: RuleCondition,
}

/// Partial update; at least one field must be set (enforced at the HTTP
/// boundary).
#[derive(Debug, Clone, Default)]
pub struct RulePatch {
    pub name: Option<String>,
    pub enabled: Option<bool>,
    pub severity: Option<Severity>,
    pub window_seconds: Option<u32>,
    pub cooldown_seconds: Option<u32>,
    pub condition: Option<RuleCondition>,
}

impl RulePatch {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.enabled.is_none()
            && self.severity.is_none()
            && self.window_seconds.is_none()
            && self.cooldown_seconds.is_none()
            && self.condition.is_none()
    }
}

const RULE_COLUMNS: &str =
    "rule_id, name, enabled, severity, window_seconds, cooldown_seconds, condition, created_at, updated_at";

#[derive(Clone)]
pub struct PgRuleRepository {
    pool: PgPool,
}

impl PgRuleRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, rule: &NewRule) -> Result<RuleRow, StorageError> {
        let condition = serde_json::to_value(&rule.condition)?;
        let row = sqlx::query_as::<_, RuleRow>(&format!(
            "INSERT INTO rules (rule_id, name, enabled, severity, window_seconds, cooldown_seconds, condition)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             RETURNING {RULE_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(&rule.name)
        .bind(rule.enabled)
        .bind(rule.severity.as_str())
        .bind(rule.window_seconds as i32)
        .bind(rule.cooldown_seconds as i32)
        .bind(condition)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn get(&self, rule_id: Uuid) -> Result<Option<RuleRow>, StorageError> {
        let row = sqlx::query_as::<_, RuleRow>(&format!(
            "SELECT {RULE_COLUMNS} FROM rules WHERE rule_id = $1"
        ))
        .bind(rule_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn list(&self, enabled: Option<bool>) -> Result<Vec<RuleRow>, StorageError> {
        let mut qb: QueryBuilder<Postgres> =
            QueryBuilder::new(format!("SELECT {RULE_COLUMNS} FROM rules WHERE TRUE"));
        if let Some(enabled) = enabled {
            qb.push(" AND enabled = ").push_bind(enabled);
        }
        qb.push(" ORDER BY created_at DESC");
        let rows = qb.build_query_as::<RuleRow>().fetch_all(&self.pool).await?;
        Ok(rows)
    }

    /// Full replace of every mutable column.
    pub async fn update(
        &self,
        rule_id: Uuid,
        rule: &NewRule,
    ) -> Result<Option<RuleRow>, StorageError> {
        let condition = serde_json::to_value(&rule.condition)?;
        let row = sqlx::query_as::<_, RuleRow>(&format!(
            "UPDATE rules
             SET name = $2, enabled = $3, severity = $4, window_seconds = $5,
                 cooldown_seconds = $6, condition = $7, updated_at = now()
             WHERE rule_id = $1
             RETURNING {RULE_COLUMNS}"
        ))
        .bind(rule_id)
        .bind(&rule.name)
        .bind(rule.enabled)
        .bind(rule.severity.as_str())
        .bind(rule.window_seconds as i32)
        .bind(rule.cooldown_seconds as i32)
        .bind(condition)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    /// Apply only the set fields of the patch.
    pub async fn patch(
        &self,
        rule_id: Uuid,
        patch: &RulePatch,
    ) -> Result<Option<RuleRow>, StorageError> {
        let mut qb: QueryBuilder<Postgres> = QueryBuilder::new("UPDATE rules SET updated_at = now()");
        if let Some(name) = &patch.name {
            qb.push(", name = ").push_bind(name);
        }
        if let Some(enabled) = patch.enabled {
            qb.push(", enabled = ").push_bind(enabled);
        }
        if let Some(severity) = patch.severity {
            qb.push(", severity = ").push_bind(severity.as_str());
        }
        if let Some(window_seconds) = patch.window_seconds {
            qb.push(", window_seconds = ").push_bind(window_seconds as i32);
        }
        if let Some(cooldown_seconds) = patch.cooldown_seconds {
            qb.push(", cooldown_seconds = ").push_bind(cooldown_seconds as i32);
        }
        if let Some(condition) = &patch.condition {
            qb.push(", condition = ").push_bind(serde_json::to_value(condition)?);
        }
        qb.push(" WHERE rule_id = ")
            .push_bind(rule_id)
            .push(format!(" RETURNING {RULE_COLUMNS}"));

        let row = qb
            .build_query_as::<RuleRow>()
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    /// Returns `false` when no such rule existed.
    pub async fn delete(&self, rule_id: Uuid) -> Result<bool, StorageError> {
        let result = sqlx::query("DELETE FROM rules WHERE rule_id = $1")
            .bind(rule_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    /// The enabled rule set for the evaluator snapshot. Rows that fail to
    /// parse are skipped, not fatal.
    pub async fn list_enabled(&self) -> Result<Vec<Rule>, StorageError> {
        let rows = self.list(Some(true)).await?;
        Ok(rows.into_iter().filter_map(RuleRow::into_rule).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pulse_core::{CompareOp, ConditionKind, MetricKind};

    fn row(condition: serde_json::Value, severity: &str) -> RuleRow {
        RuleRow {
            rule_id: Uuid::new_v4(),
            name: "hi-err".to_string(),
            enabled: true,
            severity: severity.to_string(),
            window_seconds: 60,
            cooldown_seconds: 0,
            condition,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn row_converts_to_rule() {
        let rule = row(
            serde_json::json!({
                "type": "threshold",
                "metric": "count",
                "operator": ">",
                "value": 5.0
            }),
            "critical",
        )
        .into_rule()
        .expect("should parse");
        assert_eq!(rule.severity, Severity::Critical);
        assert_eq!(rule.condition.kind, ConditionKind::Threshold);
        assert_eq!(rule.condition.metric, MetricKind::Count);
        assert_eq!(rule.condition.operator, CompareOp::Gt);
    }

    #[test]
    fn bad_condition_is_skipped() {
        assert!(row(serde_json::json!({"type": "unknown"}), "warning")
            .into_rule()
            .is_none());
    }

    #[test]
    fn bad_severity_is_skipped() {
        let condition = serde_json::json!({
            "type": "threshold",
            "metric": "count",
            "operator": "==",
            "value": 1.0
        });
        assert!(row(condition, "catastrophic").into_rule().is_none());
    }

    #[test]
    fn empty_patch_detected() {
        assert!(RulePatch::default().is_empty());
        let patch = RulePatch {
            enabled: Some(false),
            ..Default::default()
        };
        assert!(!patch.is_empty());
    }
}
