//! Periodically prunes expired `Signature` nonces recorded by the inbox's replay defense
//! (spec §6: the separate KV store holds "AP outbound queue and signature nonces").

use crate::{config::FederationConfig, error::Error, AppState};
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};
use tracing::warn;

const CYCLE_DELAY: Duration = Duration::from_secs(600);
/// Nonces older than a signature's own expiry window can never be replayed successfully, since
/// [`crate::http_signatures::within_expiry`] would already reject the stale `Date` header.
const NONCE_RETENTION_SECONDS: i64 = 60 * 60;

/// Single-task timer loop, following the same shape as [`crate::engagement_notifier::EngagementNotifier`].
pub struct NonceJanitor {
    config: FederationConfig<AppState>,
    running: Arc<AtomicBool>,
}

impl NonceJanitor {
    pub fn new(config: FederationConfig<AppState>) -> Self {
        NonceJanitor {
            config,
            running: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        self.running.clone()
    }

    pub async fn run(self) {
        while self.running.load(Ordering::SeqCst) {
            if let Err(e) = self.run_cycle().await {
                warn!(error = %e, "nonce janitor cycle failed");
            }
            tokio::time::sleep(CYCLE_DELAY).await;
        }
    }

    async fn run_cycle(&self) -> Result<(), Error> {
        self.config.store.prune_old_nonces(NONCE_RETENTION_SECONDS).await
    }
}
