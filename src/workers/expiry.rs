//! Fails abandoned transactions: CREATED records older than the configured
//! age where the customer never reached a provider.

use crate::audit::{AuditChain, SYSTEM_ACTOR};
use crate::model::TransactionStatus;
use crate::store::{TerminalWrite, TransactionStore};
use anyhow::Result;
use chrono::{Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info};

pub struct ExpiryWorker {
    store: Arc<dyn TransactionStore>,
    audit: Arc<AuditChain>,
    max_age: Duration,
    interval: Duration,
}

impl ExpiryWorker {
    pub fn new(
        store: Arc<dyn TransactionStore>,
        audit: Arc<AuditChain>,
        max_age: Duration,
        interval: Duration,
    ) -> Self {
        Self {
            store,
            audit,
            max_age,
            interval,
        }
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = self.interval.as_secs(),
            max_age_secs = self.max_age.as_secs(),
            "expiry worker started"
        );
        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("expiry worker stopping");
                        break;
                    }
                }
                _ = tokio::time::sleep(self.interval) => {
                    if let Err(e) = self.cycle().await {
                        error!(error = %e, "expiry sweep failed");
                    }
                }
            }
        }
    }

    async fn cycle(&self) -> Result<()> {
        let cutoff = Utc::now()
            - ChronoDuration::from_std(self.max_age).unwrap_or_else(|_| ChronoDuration::hours(1));
        let stale = self.store.list_created_before(cutoff).await?;
        for transaction in stale {
            let (_, wrote) = self
                .store
                .finalize_if_open(
                    &transaction.id,
                    &TerminalWrite::status_only(TransactionStatus::Failed),
                )
                .await?;
            if wrote {
                self.audit.log_event(
                    SYSTEM_ACTOR,
                    "internal",
                    "TRANSACTION_EXPIRED",
                    "FAILED",
                    &format!(
                        "transaction={} created_at={}",
                        transaction.id, transaction.created_at
                    ),
                );
            }
        }
        Ok(())
    }
}
