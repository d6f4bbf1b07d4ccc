//! At-least-once stream consumer.
//!
//! Ordering contract: acknowledgement strictly follows successful
//! persistence, and rule evaluation strictly follows acknowledgement. A
//! crash between persist and ack causes redelivery; the duplicate is
//! absorbed by the event repository's primary-key idempotence.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use pulse_core::{AnomalyNotification, Shutdown};
use pulse_detect::{SnapshotStore, StatisticalEvaluator, ThresholdEvaluator};
use pulse_storage::{AnomalyRepository, EventRepository};
use pulse_stream::{parse_entry, AnomalyPublisher, StreamEntry, StreamReader};

/// Backoff after a failed group read.
const READ_ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// Lock-free counters for consumer observability.
///
/// All fields use `Ordering::Relaxed` — these are monotonic counters where
/// eventual visibility is acceptable for log/status reads.
#[derive(Debug, Default)]
pub struct ConsumerMetrics {
    /// Entries received from group reads (pending pass included).
    pub entries_received: AtomicU64,
    /// Entries persisted and acknowledged.
    pub entries_processed: AtomicU64,
    /// Duplicates absorbed by the event repository.
    pub duplicates_absorbed: AtomicU64,
    /// Entries left pending (parse/insert/ack failure).
    pub entries_failed: AtomicU64,
    /// Anomalies emitted by the evaluators.
    pub anomalies_emitted: AtomicU64,
}

impl ConsumerMetrics {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> (u64, u64, u64, u64, u64) {
        (
            self.entries_received.load(Ordering::Relaxed),
            self.entries_processed.load(Ordering::Relaxed),
            self.duplicates_absorbed.load(Ordering::Relaxed),
            self.entries_failed.load(Ordering::Relaxed),
            self.anomalies_emitted.load(Ordering::Relaxed),
        )
    }
}

pub struct Consumer<R: StreamReader> {
    reader: R,
    events: Arc<dyn EventRepository>,
    anomalies: Arc<dyn AnomalyRepository>,
    publisher: Option<Arc<dyn AnomalyPublisher>>,
    snapshot: Arc<SnapshotStore>,
    threshold: ThresholdEvaluator,
    statistical: Option<StatisticalEvaluator>,
    batch_size: usize,
    block_ms: u64,
    shutdown: Shutdown,
    metrics: Arc<ConsumerMetrics>,
}

impl<R: StreamReader> Consumer<R> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        reader: R,
        events: Arc<dyn EventRepository>,
        anomalies: Arc<dyn AnomalyRepository>,
        publisher: Option<Arc<dyn AnomalyPublisher>>,
        snapshot: Arc<SnapshotStore>,
        threshold: ThresholdEvaluator,
        statistical: Option<StatisticalEvaluator>,
        batch_size: usize,
        block_ms: u64,
        shutdown: Shutdown,
    ) -> Self {
        Self {
            reader,
            events,
            anomalies,
            publisher,
            snapshot,
            threshold,
            statistical,
            batch_size,
            block_ms,
            shutdown,
            metrics: Arc::new(ConsumerMetrics::default()),
        }
    }

    /// Shared counters for status logging from other tasks.
    pub fn metrics(&self) -> Arc<ConsumerMetrics> {
        self.metrics.clone()
    }

    /// Run until the cancellation signal fires: ensure the consumer group,
    /// recover this consumer's own pending entries, then drain new entries.
    pub async fn run(mut self) {
        while let Err(e) = self.reader.ensure_group().await {
            if self.shutdown.is_cancelled() {
                return;
            }
            error!(error = %e, "failed to ensure consumer group, retrying");
            tokio::time::sleep(READ_ERROR_BACKOFF).await;
        }

        self.process_pending().await;
        info!("consumer entering main loop");

        loop {
            if self.shutdown.is_cancelled() {
                break;
            }

            let shutdown = self.shutdown.clone();
            let result = tokio::select! {
                _ = shutdown.cancelled() => break,
                result = self.reader.read_new(self.batch_size, self.block_ms) => result,
            };

            match result {
                Ok(entries) => {
                    if entries.is_empty() {
                        continue;
                    }
                    let batch = entries.len();
                    for entry in entries {
                        self.process_entry(&entry).await;
                    }
                    let (received, processed, duplicates, failed, anomalies) =
                        self.metrics.snapshot();
                    info!(
                        batch,
                        received, processed, duplicates, failed, anomalies,
                        "processed stream batch"
                    );
                }
                Err(e) => {
                    if self.shutdown.is_cancelled() {
                        break;
                    }
                    error!(error = %e, "stream read failed, backing off");
                    tokio::time::sleep(READ_ERROR_BACKOFF).await;
                }
            }
        }

        info!("consumer loop exited");
    }

    /// Startup recovery pass over entries delivered to this consumer but
    /// never acknowledged.
    async fn process_pending(&mut self) {
        let mut recovered = 0usize;
        loop {
            match self.reader.read_pending(self.batch_size).await {
                Ok(entries) if entries.is_empty() => break,
                Ok(entries) => {
                    for entry in entries {
                        self.process_entry(&entry).await;
                        recovered += 1;
                    }
                }
                Err(e) => {
                    warn!(error = %e, "pending-entry recovery failed, continuing with new entries");
                    break;
                }
            }
            if self.shutdown.is_cancelled() {
                return;
            }
        }
        if recovered > 0 {
            info!(recovered, "re-processed pending entries");
        }
    }

    /// Two error boundaries: persistence (failure blocks the ack, forcing
    /// redelivery) and rule evaluation (failures are local — the event is
    /// already persisted and acknowledged).
    async fn process_entry(&mut self, entry: &StreamEntry) {
        // Trimmed-but-pending entries come back with no fields.
        if entry.fields.is_empty() {
            debug!(stream_id = %entry.id, "skipping nil-ified pending entry");
            return;
        }
        ConsumerMetrics::bump(&self.metrics.entries_received);

        // ── Persistence boundary ──
        let event = match parse_entry(&entry.fields) {
            Ok(event) => event,
            Err(e) => {
                warn!(stream_id = %entry.id, error = %e, "unparseable entry, leaving pending");
                ConsumerMetrics::bump(&self.metrics.entries_failed);
                return;
            }
        };

        match self.events.insert(&event).await {
            Ok(true) => {}
            Ok(false) => {
                debug!(event_id = %event.event_id, "duplicate event absorbed");
                ConsumerMetrics::bump(&self.metrics.duplicates_absorbed);
            }
            Err(e) => {
                warn!(event_id = %event.event_id, error = %e, "event insert failed, will be redelivered");
                ConsumerMetrics::bump(&self.metrics.entries_failed);
                return;
            }
        }

        if let Err(e) = self.reader.ack(&entry.id).await {
            warn!(stream_id = %entry.id, error = %e, "ack failed, entry stays pending");
            ConsumerMetrics::bump(&self.metrics.entries_failed);
            return;
        }
        ConsumerMetrics::bump(&self.metrics.entries_processed);

        // ── Rule-evaluation boundary ──
        let rules = self.snapshot.get();
        let mut anomalies = Vec::new();
        if !rules.is_empty() {
            anomalies.extend(self.threshold.evaluate(&event, &rules));
        }
        if let Some(statistical) = &mut self.statistical {
            anomalies.extend(statistical.evaluate_event(&event));
        }

        for anomaly in anomalies {
            ConsumerMetrics::bump(&self.metrics.anomalies_emitted);
            info!(
                rule_id = %anomaly.rule_id,
                event_id = %anomaly.event_id,
                severity = %anomaly.severity,
                message = %anomaly.message,
                "anomaly detected"
            );
            if let Err(e) = self.anomalies.insert(&anomaly).await {
                warn!(anomaly_id = %anomaly.anomaly_id, error = %e, "anomaly insert failed");
            }
            if let Some(publisher) = &self.publisher {
                let notification = AnomalyNotification::from(&anomaly);
                if let Err(e) = publisher.publish(&notification).await {
                    warn!(anomaly_id = %anomaly.anomaly_id, error = %e, "anomaly publish failed");
                }
            }
        }
    }
}
