//! Anomaly persistence.
//!
//! Inserts are best-effort from the consumer's point of view: a failure is
//! logged there, never propagated into the ack path. `event_id` is not a
//! foreign key so event cleanup cannot break these inserts.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

use pulse_core::Anomaly;

use crate::error::StorageError;

#[async_trait]
pub trait AnomalyRepository: Send + Sync {
    async fn insert(&self, anomaly: &Anomaly) -> Result<(), StorageError>;
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct AnomalyRow {
    pub anomaly_id: Uuid,
    pub event_id: Uuid,
    pub rule_id: String,
    pub severity: String,
    pub message: String,
    pub detected_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct AnomalyFilter {
    pub limit: i64,
    pub offset: i64,
    pub rule_id: Option<String>,
    pub severity: Option<String>,
}

#[derive(Clone)]
pub struct PgAnomalyRepository {
    pool: PgPool,
}

impl PgAnomalyRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn list(&self, filter: &AnomalyFilter) -> Result<Vec<AnomalyRow>, StorageError> {
        let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(
            "SELECT anomaly_id, event_id, rule_id, severity, message, detected_at
             FROM anomalies WHERE TRUE",
        );
        if let Some(rule_id) = &filter.rule_id {
            qb.push(" AND rule_id = ").push_bind(rule_id);
        }
        if let Some(severity) = &filter.severity {
            qb.push(" AND severity = ").push_bind(severity);
        }
        qb.push(" ORDER BY detected_at DESC LIMIT ")
            .push_bind(filter.limit)
            .push(" OFFSET ")
            .push_bind(filter.offset);

        let rows = qb
            .build_query_as::<AnomalyRow>()
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }
}

#[async_trait]
impl AnomalyRepository for PgAnomalyRepository {
    async fn insert(&self, anomaly: &Anomaly) -> Result<(), StorageError> {
        sqlx::query(
            "INSERT INTO anomalies (anomaly_id, event_id, rule_id, severity, message, detected_at)
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(anomaly.anomaly_id)
        .bind(anomaly.event_id)
        .bind(&anomaly.rule_id)
        .bind(anomaly.severity.as_str())
        .bind(&anomaly.message)
        .bind(anomaly.detected_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
