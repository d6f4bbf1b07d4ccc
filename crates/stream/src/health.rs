//! Liveness plumbing: PING and the TTL-bounded worker health key.

use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};

use crate::error::StreamError;

/// Key the worker heartbeat writes; expires when the worker stops renewing.
pub const WORKER_HEALTH_KEY: &str = "worker:health";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerHealth {
    pub worker_id: String,
    pub ts: DateTime<Utc>,
}

pub async fn ping(conn: &ConnectionManager) -> Result<(), StreamError> {
    let mut conn = conn.clone();
    let _: String = redis::cmd("PING").query_async(&mut conn).await?;
    Ok(())
}

/// Renew the worker health key with a TTL.
pub async fn write_worker_health(
    conn: &ConnectionManager,
    worker_id: &str,
    ttl_secs: u64,
) -> Result<(), StreamError> {
    let mut conn = conn.clone();
    let payload = serde_json::to_string(&WorkerHealth {
        worker_id: worker_id.to_string(),
        ts: Utc::now(),
    })?;
    let _: () = conn.set_ex(WORKER_HEALTH_KEY, payload, ttl_secs).await?;
    Ok(())
}

/// `None` when the key is absent/expired or does not parse.
pub async fn read_worker_health(
    conn: &ConnectionManager,
) -> Result<Option<WorkerHealth>, StreamError> {
    let mut conn = conn.clone();
    let raw: Option<String> = conn.get(WORKER_HEALTH_KEY).await?;
    Ok(raw.and_then(|s| serde_json::from_str(&s).ok()))
}
