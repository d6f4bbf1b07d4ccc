//! Rule hot-reload: pub/sub-driven atomic swap of the evaluator snapshot.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, info, warn};

use pulse_core::RuleChange;
use pulse_detect::SnapshotStore;
use pulse_storage::PgRuleRepository;
use pulse_stream::{subscribe_channel, StreamError, SubscriptionHandle, RULES_CHANGED_CHANNEL};

/// Subscribe to `rules_changed` on a dedicated connection and swap the
/// snapshot on each message.
///
/// Bursts are coalesced with a `reloading` flag; on fetch error the previous
/// snapshot is retained. Returns a handle whose `shutdown` is idempotent.
pub async fn spawn_rule_subscriber(
    client: &redis::Client,
    rules: PgRuleRepository,
    store: Arc<SnapshotStore>,
) -> Result<SubscriptionHandle, StreamError> {
    let reloading = Arc::new(AtomicBool::new(false));

    subscribe_channel(client, RULES_CHANGED_CHANNEL, move |payload| {
        let rules = rules.clone();
        let store = store.clone();
        let reloading = reloading.clone();
        async move {
            let change: RuleChange = match serde_json::from_str(&payload) {
                Ok(change) => change,
                Err(e) => {
                    warn!(error = %e, %payload, "malformed rules_changed message, skipped");
                    return;
                }
            };
            debug!(rule_id = %change.rule_id, reason = ?change.reason, "rule change received");

            if reloading.swap(true, Ordering::SeqCst) {
                debug!("reload already in flight, coalescing");
                return;
            }

            match rules.list_enabled().await {
                Ok(enabled) => {
                    info!(count = enabled.len(), "rule snapshot reloaded");
                    store.set(enabled);
                }
                Err(e) => {
                    warn!(error = %e, "rule reload failed, keeping previous snapshot");
                }
            }
            reloading.store(false, Ordering::SeqCst);
        }
    })
    .await
}
