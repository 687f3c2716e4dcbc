use std::sync::Arc;

use solana_program::pubkey::Pubkey;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::{
    components::store::RoundStateStore, config::RetryPolicy, events::LotteryEvent,
    provider::WalletProvider,
};

/// Streams program events into the store. Delivery is at-least-once; the
/// store deduplicates.
pub struct EventSubscriber {
    provider: Arc<dyn WalletProvider>,
    program_id: Pubkey,
    store: RoundStateStore,
    retry: RetryPolicy,
}

impl EventSubscriber {
    pub fn new(
        provider: Arc<dyn WalletProvider>,
        program_id: Pubkey,
        store: RoundStateStore,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            provider,
            program_id,
            store,
            retry,
        }
    }

    /// Runs until the returned task is aborted or the retry policy gives up.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(self) {
        let mut failures = 0u32;
        let mut subscribed_before = false;

        loop {
            let mut logs = match self.provider.subscribe_logs(&self.program_id).await {
                Ok(logs) => logs,
                Err(err) => {
                    failures += 1;
                    if !self.retry.allows(failures) {
                        warn!(attempt = failures, error = %err, "giving up on event subscription");
                        return;
                    }
                    let delay = self.retry.delay(failures);
                    warn!(attempt = failures, ?delay, error = %err, "event subscription failed");
                    tokio::time::sleep(delay).await;
                    continue;
                }
            };

            failures = 0;
            if subscribed_before {
                info!(program_id = %self.program_id, "event subscription restored, refreshing");
                self.store.request_refresh().await;
            } else {
                debug!(program_id = %self.program_id, "event subscription open");
            }
            subscribed_before = true;

            while let Some(batch) = logs.recv().await {
                if batch.program_id != self.program_id {
                    continue;
                }
                for (id, event) in LotteryEvent::decode_all(&batch.signature, &batch.events) {
                    debug!(signature = %id.signature, index = id.index, round_id = event.round_id(), "event received");
                    if self.store.apply_event(id, event).await.is_none() {
                        debug!("store gone, subscriber stopping");
                        return;
                    }
                }
            }

            // The stream ended; back off before the first resubscribe attempt.
            failures += 1;
            if !self.retry.allows(failures) {
                warn!(attempt = failures, "event subscription dropped, giving up");
                return;
            }
            let delay = self.retry.delay(failures);
            warn!(?delay, "event subscription dropped");
            tokio::time::sleep(delay).await;
        }
    }
}
