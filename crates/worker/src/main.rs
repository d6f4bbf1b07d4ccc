//! pulse-worker — drains the event stream, persists events, evaluates
//! detection rules, and publishes anomalies.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info, warn};

use pulse_core::{config, Config, Shutdown};
use pulse_detect::{SnapshotStore, StatisticalEvaluator, ThresholdEvaluator};
use pulse_storage::{
    connect_pool, ensure_schema, PgAnomalyRepository, PgEventRepository, PgRuleRepository,
};
use pulse_stream::{write_worker_health, RedisAnomalyPublisher, RedisStreamReader};
use pulse_worker::{spawn_rule_subscriber, Consumer};

// ── CLI ─────────────────────────────────────────────────────────────

/// EventPulse worker — stream consumer and anomaly detection.
#[derive(Parser, Debug)]
#[command(name = "pulse-worker", version, about)]
struct Cli {
    /// Health ping interval in seconds.
    #[arg(long, env = "WORKER_HEALTH_INTERVAL", default_value_t = 30)]
    health_interval: u64,

    /// Shutdown drain timeout in seconds.
    #[arg(long, env = "WORKER_SHUTDOWN_TIMEOUT", default_value_t = 10)]
    shutdown_timeout: u64,
}

// ── Connection bootstrap ────────────────────────────────────────────

/// Retry with capped exponential backoff until the resource connects or the
/// attempt budget runs out.
const MAX_CONNECT_ATTEMPTS: u32 = 10;

async fn connect_backoff<T, E, F, Fut>(what: &str, mut connect: F) -> anyhow::Result<T>
where
    E: std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
{
    let mut attempt = 0u32;
    loop {
        match connect().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                attempt += 1;
                if attempt >= MAX_CONNECT_ATTEMPTS {
                    anyhow::bail!("{} unreachable after {} attempts: {}", what, attempt, e);
                }
                let backoff =
                    Duration::from_millis(500 * 2u64.pow(attempt.min(6))).min(Duration::from_secs(30));
                warn!(error = %e, attempt, backoff_ms = backoff.as_millis() as u64, "{} connect failed, retrying", what);
                tokio::time::sleep(backoff).await;
            }
        }
    }
}

async fn wait_for_signal() {
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
}

// ── main ────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    config::load_dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(Config::log_level())),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::from_env();
    config.log_summary();

    // Database: connect and bootstrap the schema (idempotent).
    let db_config = config.database.clone();
    let pool = connect_backoff("postgres", || connect_pool(&db_config)).await?;
    ensure_schema(&pool).await?;

    // Redis: shared command connection + a client for dedicated subscriptions.
    let redis_client = redis::Client::open(config.redis.url.as_str())?;
    let redis_conn = {
        let client = redis_client.clone();
        connect_backoff("redis", move || {
            let client = client.clone();
            async move { client.get_connection_manager().await }
        })
        .await?
    };

    let events = Arc::new(PgEventRepository::new(pool.clone()));
    let anomalies = Arc::new(PgAnomalyRepository::new(pool.clone()));
    let rules = PgRuleRepository::new(pool.clone());

    // Initial enabled-rule snapshot.
    let initial = rules.list_enabled().await?;
    info!(count = initial.len(), "initial rule snapshot loaded");
    let snapshot = Arc::new(SnapshotStore::new(initial));

    let statistical = if config.worker.stat_profiles.is_empty() {
        None
    } else {
        info!(
            profiles = config.worker.stat_profiles.len(),
            "statistical evaluator enabled"
        );
        Some(StatisticalEvaluator::new(
            config.worker.stat_profiles.clone(),
            Default::default(),
        ))
    };

    let shutdown = Shutdown::new();

    let reader = RedisStreamReader::new(
        redis_conn.clone(),
        config.stream.key.clone(),
        config.stream.group.clone(),
        config.stream.consumer.clone(),
    );
    let consumer = Consumer::new(
        reader,
        events,
        anomalies,
        Some(Arc::new(RedisAnomalyPublisher::new(redis_conn.clone()))),
        snapshot.clone(),
        ThresholdEvaluator::new(),
        statistical,
        config.stream.batch_size,
        config.stream.block_ms,
        shutdown.clone(),
    );
    let metrics = consumer.metrics();
    let consumer_task = tokio::spawn(consumer.run());

    // Rule hot-reload on its own pub/sub connection.
    let subscription = spawn_rule_subscriber(&redis_client, rules, snapshot).await?;

    // Worker health heartbeat; the key's TTL outlives two missed beats.
    let heartbeat = {
        let conn = redis_conn.clone();
        let worker_id = config.stream.consumer.clone();
        let interval = Duration::from_secs(cli.health_interval.max(1));
        let ttl = cli.health_interval.max(1) * 3;
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = write_worker_health(&conn, &worker_id, ttl).await {
                            warn!(error = %e, "worker health write failed");
                        }
                        let (received, processed, duplicates, failed, anomalies) =
                            metrics.snapshot();
                        info!(
                            received, processed, duplicates, failed, anomalies,
                            "consumer status"
                        );
                    }
                }
            }
        })
    };

    info!(consumer = %config.stream.consumer, "pulse-worker started");
    wait_for_signal().await;
    info!("shutdown signal received, draining");
    shutdown.trigger();

    match tokio::time::timeout(Duration::from_secs(cli.shutdown_timeout), consumer_task).await {
        Ok(Ok(())) => info!("consumer drained cleanly"),
        Ok(Err(e)) => error!(error = %e, "consumer task panicked"),
        Err(_) => warn!("consumer did not drain within the timeout"),
    }

    subscription.shutdown();
    heartbeat.abort();
    pool.close().await;
    info!("pulse-worker exited cleanly");
    Ok(())
}
