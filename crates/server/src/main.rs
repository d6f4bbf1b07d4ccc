//! pulse-server — event ingestion API, dashboards WebSocket, and anomaly
//! fan-out.

mod api;
mod fanout;
mod router;
mod state;
mod ws;

use std::sync::Arc;

use tracing::info;

use pulse_core::{config, Config, Shutdown};
use pulse_storage::{
    connect_pool, ensure_schema, PgAnomalyRepository, PgEventRepository, PgRuleRepository,
};
use pulse_stream::StreamProducer;

use crate::state::AppState;
use crate::ws::WsServer;

async fn shutdown_signal(shutdown: Shutdown) {
    #[cfg(unix)]
    {
        let mut term = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {},
            _ = term.recv() => {},
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
    info!("shutdown signal received");
    shutdown.trigger();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    config::load_dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(Config::log_level())),
        )
        .init();

    let config = Config::from_env();
    config.log_summary();

    // The worker owns schema bootstrap too; running it here as well keeps
    // first boot order-independent (every statement is create-if-absent).
    let pool = connect_pool(&config.database).await?;
    ensure_schema(&pool).await?;

    let redis_client = redis::Client::open(config.redis.url.as_str())?;
    let redis_conn = redis_client.get_connection_manager().await?;

    let ws = WsServer::new();
    let shutdown = Shutdown::new();
    let heartbeat = ws.spawn_heartbeat(shutdown.clone());

    let state = Arc::new(AppState {
        producer: StreamProducer::new(redis_conn.clone(), config.stream.key.clone()),
        events: PgEventRepository::new(pool.clone()),
        anomalies: PgAnomalyRepository::new(pool.clone()),
        rules: PgRuleRepository::new(pool.clone()),
        pool,
        redis: redis_conn,
        ws: ws.clone(),
    });

    // Anomaly fan-out on its own pub/sub connection.
    let subscription =
        fanout::spawn_anomaly_fanout(&redis_client, &config.notifications, ws).await?;

    let app = router::build_router(state.clone());
    let addr = config.server.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(%addr, "pulse-server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await?;

    subscription.shutdown();
    heartbeat.abort();
    state.pool.close().await;
    info!("pulse-server exited cleanly");
    Ok(())
}
