use std::sync::Arc;

use redis::aio::ConnectionManager;
use sqlx::PgPool;

use pulse_storage::{PgAnomalyRepository, PgEventRepository, PgRuleRepository};
use pulse_stream::StreamProducer;

use crate::ws::WsServer;

pub struct AppState {
    pub pool: PgPool,
    /// Shared command connection (stream appends, publishes, health reads).
    pub redis: ConnectionManager,
    pub producer: StreamProducer,
    pub events: PgEventRepository,
    pub anomalies: PgAnomalyRepository,
    pub rules: PgRuleRepository,
    pub ws: Arc<WsServer>,
}
