use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;

use pulse_core::config::DatabaseConfig;

use crate::error::StorageError;

/// Connect a PostgreSQL pool from config.
pub async fn connect_pool(config: &DatabaseConfig) -> Result<PgPool, StorageError> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&config.url)
        .await?;
    info!("PostgreSQL connected");
    Ok(pool)
}

/// Idempotent schema bootstrap: every statement is create-if-absent, so any
/// process may run this at startup regardless of what already exists.
pub async fn ensure_schema(pool: &PgPool) -> Result<(), StorageError> {
    const STATEMENTS: &[&str] = &[
        "CREATE TABLE IF NOT EXISTS events (
            event_id   UUID PRIMARY KEY,
            event_type TEXT NOT NULL,
            source     TEXT NOT NULL,
            timestamp  TIMESTAMPTZ NOT NULL,
            payload    JSONB NOT NULL DEFAULT '{}'::jsonb,
            metadata   JSONB NOT NULL DEFAULT '{}'::jsonb,
            created_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )",
        "CREATE INDEX IF NOT EXISTS idx_events_event_type ON events (event_type)",
        "CREATE INDEX IF NOT EXISTS idx_events_source ON events (source)",
        "CREATE INDEX IF NOT EXISTS idx_events_timestamp ON events (timestamp)",
        "CREATE INDEX IF NOT EXISTS idx_events_created_at ON events (created_at)",
        "CREATE TABLE IF NOT EXISTS anomalies (
            anomaly_id  UUID PRIMARY KEY,
            event_id    UUID NOT NULL,
            rule_id     TEXT NOT NULL,
            severity    TEXT NOT NULL,
            message     TEXT NOT NULL,
            detected_at TIMESTAMPTZ NOT NULL
        )",
        "CREATE INDEX IF NOT EXISTS idx_anomalies_rule_id ON anomalies (rule_id)",
        "CREATE INDEX IF NOT EXISTS idx_anomalies_severity ON anomalies (severity)",
        "CREATE INDEX IF NOT EXISTS idx_anomalies_detected_at ON anomalies (detected_at)",
        "CREATE INDEX IF NOT EXISTS idx_anomalies_event_id ON anomalies (event_id)",
        "CREATE TABLE IF NOT EXISTS rules (
            rule_id          UUID PRIMARY KEY,
            name             TEXT NOT NULL,
            enabled          BOOLEAN NOT NULL DEFAULT TRUE,
            severity         TEXT NOT NULL,
            window_seconds   INTEGER NOT NULL,
            cooldown_seconds INTEGER NOT NULL DEFAULT 0,
            condition        JSONB NOT NULL,
            created_at       TIMESTAMPTZ NOT NULL DEFAULT now(),
            updated_at       TIMESTAMPTZ NOT NULL DEFAULT now()
        )",
        "CREATE INDEX IF NOT EXISTS idx_rules_enabled ON rules (enabled)",
        "CREATE INDEX IF NOT EXISTS idx_rules_severity ON rules (severity)",
    ];

    for statement in STATEMENTS {
        sqlx::query(statement).execute(pool).await?;
    }

    info!("schema bootstrap complete");
    Ok(())
}
