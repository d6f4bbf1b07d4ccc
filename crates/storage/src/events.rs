//! Event persistence and query access.
//!
//! `insert` is the at-least-once idempotence boundary: a duplicate
//! `event_id` is absorbed silently and reported as `inserted = false`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

use pulse_core::Event;

use crate::error::StorageError;

/// Seam used by the stream consumer so ordering properties are testable
/// against in-memory fakes.
#[async_trait]
pub trait EventRepository: Send + Sync {
    /// Insert one event. Returns `false` when a row with the same
    /// `event_id` already exists; any other failure propagates.
    async fn insert(&self, event: &Event) -> Result<bool, StorageError>;
}

/// A persisted event row.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct EventRow {
    pub event_id: Uuid,
    pub event_type: String,
    pub source: String,
    pub timestamp: DateTime<Utc>,
    pub payload: serde_json::Value,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Filters for the paginated event listing.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    pub limit: i64,
    pub offset: i64,
    pub event_type: Option<String>,
    pub source: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

/// Dimension for the metrics aggregation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupBy {
    EventType,
    Source,
}

impl GroupBy {
    fn column(&self) -> &'static str {
        match self {
            GroupBy::EventType => "event_type",
            GroupBy::Source => "source",
        }
    }
}

/// One aggregated metrics bucket.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct MetricRow {
    pub key: String,
    pub count: i64,
}

#[derive(Clone)]
pub struct PgEventRepository {
    pool: PgPool,
}

impl PgEventRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn get(&self, event_id: Uuid) -> Result<Option<EventRow>, StorageError> {
        let row = sqlx::query_as::<_, EventRow>(
            "SELECT event_id, event_type, source, timestamp, payload, metadata, created_at
             FROM events WHERE event_id = $1",
        )
        .bind(event_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn list(&self, filter: &EventFilter) -> Result<Vec<EventRow>, StorageError> {
        let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(
            "SELECT event_id, event_type, source, timestamp, payload, metadata, created_at
             FROM events WHERE TRUE",
        );
        if let Some(event_type) = &filter.event_type {
            qb.push(" AND event_type = ").push_bind(event_type);
        }
        if let Some(source) = &filter.source {
            qb.push(" AND source = ").push_bind(source);
        }
        if let Some(from) = filter.from {
            qb.push(" AND timestamp >= ").push_bind(from);
        }
        if let Some(to) = filter.to {
            qb.push(" AND timestamp <= ").push_bind(to);
        }
        qb.push(" ORDER BY timestamp DESC LIMIT ")
            .push_bind(filter.limit)
            .push(" OFFSET ")
            .push_bind(filter.offset);

        let rows = qb.build_query_as::<EventRow>().fetch_all(&self.pool).await?;
        Ok(rows)
    }

    /// Count events per `group_by` key inside `[from, to]`.
    pub async fn metrics(
        &self,
        group_by: GroupBy,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        event_type: Option<&str>,
        source: Option<&str>,
    ) -> Result<Vec<MetricRow>, StorageError> {
        // The grouping column comes from a closed enum, never from user input.
        let column = group_by.column();
        let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(format!(
            "SELECT {column} AS key, COUNT(*) AS count FROM events WHERE timestamp >= "
        ));
        qb.push_bind(from).push(" AND timestamp <= ").push_bind(to);
        if let Some(et) = event_type {
            qb.push(" AND event_type = ").push_bind(et.to_string());
        }
        if let Some(src) = source {
            qb.push(" AND source = ").push_bind(src.to_string());
        }
        qb.push(format!(" GROUP BY {column} ORDER BY count DESC"));

        let rows = qb.build_query_as::<MetricRow>().fetch_all(&self.pool).await?;
        Ok(rows)
    }
}

#[async_trait]
impl EventRepository for PgEventRepository {
    async fn insert(&self, event: &Event) -> Result<bool, StorageError> {
        let result = sqlx::query(
            "INSERT INTO events (event_id, event_type, source, timestamp, payload, metadata, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, now())
             ON CONFLICT (event_id) DO NOTHING",
        )
        .bind(event.event_id)
        .bind(&event.event_type)
        .bind(&event.source)
        .bind(event.timestamp)
        .bind(&event.payload)
        .bind(&event.metadata)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }
}
