//! Polls open ledger-settled transactions and drives reconciliation.

use crate::reconcile::Reconciler;
use crate::store::TransactionStore;
use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};

pub struct ReconcileWorker {
    store: Arc<dyn TransactionStore>,
    reconciler: Arc<Reconciler>,
    interval: Duration,
}

impl ReconcileWorker {
    pub fn new(
        store: Arc<dyn TransactionStore>,
        reconciler: Arc<Reconciler>,
        interval: Duration,
    ) -> Self {
        Self {
            store,
            reconciler,
            interval,
        }
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(interval_secs = self.interval.as_secs(), "reconcile worker started");
        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("reconcile worker stopping");
                        break;
                    }
                }
                _ = tokio::time::sleep(self.interval) => {
                    if let Err(e) = self.cycle().await {
                        error!(error = %e, "reconcile cycle failed");
                    }
                }
            }
        }
    }

    async fn cycle(&self) -> Result<()> {
        let candidates = self.store.list_awaiting_settlement().await?;
        for transaction in candidates {
            // Per-transaction failures must not starve the rest of the batch.
            if let Err(e) = self.reconciler.check_status(&transaction).await {
                warn!(transaction_id = %transaction.id, error = %e, "reconciliation check failed");
            }
        }
        Ok(())
    }
}
