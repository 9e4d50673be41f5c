//! Crypto settlement reconciliation.
//!
//! For ledger-settled payments there is no callback: the engine polls the
//! address until the expected funds (within tolerance) show up, then drives
//! the normal idempotent finalization. A ledger query failure never fails a
//! transaction; the poll simply comes back later.

use crate::audit::{AuditChain, SYSTEM_ACTOR};
use crate::error::{AppError, AppResult};
use crate::model::{Transaction, TransactionStatus};
use crate::store::{TerminalWrite, TransactionStore};
use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

const LEDGER_SERVICE: &str = "ledger";

/// Underpayment accepted as settled, in smallest units.
pub const DEFAULT_TOLERANCE_UNITS: i64 = 5_000;

#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Total units ever received by the address, confirmed plus pending.
    async fn address_received(&self, address: &str) -> AppResult<i64>;
}

#[derive(Debug, Deserialize)]
struct TxoStats {
    funded_txo_sum: i64,
}

#[derive(Debug, Deserialize)]
struct AddressStats {
    chain_stats: TxoStats,
    mempool_stats: TxoStats,
}

/// Queries a mempool-style address endpoint:
/// `GET {base}/api/address/{address}`.
pub struct HttpLedgerClient {
    client: reqwest::Client,
    base_url: String,
}

impl HttpLedgerClient {
    pub fn new(base_url: &str, timeout: Duration) -> AppResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::store(format!("ledger client init failed: {}", e)))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl LedgerClient for HttpLedgerClient {
    async fn address_received(&self, address: &str) -> AppResult<i64> {
        let url = format!("{}/api/address/{}", self.base_url, address);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| AppError::Downstream {
                service: LEDGER_SERVICE.to_string(),
                message: e.to_string(),
                retryable: true,
            })?;
        if !response.status().is_success() {
            return Err(AppError::Downstream {
                service: LEDGER_SERVICE.to_string(),
                message: format!("status {}", response.status()),
                retryable: true,
            });
        }
        let stats: AddressStats = response.json().await.map_err(|e| AppError::Downstream {
            service: LEDGER_SERVICE.to_string(),
            message: format!("malformed address stats: {}", e),
            retryable: true,
        })?;
        Ok(stats.chain_stats.funded_txo_sum + stats.mempool_stats.funded_txo_sum)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    Confirmed,
    Pending,
}

pub struct Reconciler {
    store: Arc<dyn TransactionStore>,
    ledger: Arc<dyn LedgerClient>,
    audit: Arc<AuditChain>,
    tolerance_units: i64,
}

impl Reconciler {
    pub fn new(
        store: Arc<dyn TransactionStore>,
        ledger: Arc<dyn LedgerClient>,
        audit: Arc<AuditChain>,
        tolerance_units: i64,
    ) -> Self {
        Self {
            store,
            ledger,
            audit,
            tolerance_units,
        }
    }

    /// Whether `received` settles a payment expecting `expected` units.
    /// Nothing received is never acceptance, whatever the tolerance.
    fn is_settled(&self, received: i64, expected: i64) -> bool {
        received > 0
            && (received >= expected || (expected - received).abs() <= self.tolerance_units)
    }

    /// One reconciliation pass over a single transaction. Safe to call
    /// repeatedly and concurrently: the confirmed flag short-circuits, and
    /// the terminal write underneath is first-write-wins.
    pub async fn check_status(&self, transaction: &Transaction) -> AppResult<ReconcileOutcome> {
        if transaction.settlement_confirmed {
            return Ok(ReconcileOutcome::Confirmed);
        }

        let (address, expected) = match (
            &transaction.settlement_address,
            transaction.expected_settlement_units,
        ) {
            (Some(address), Some(expected)) => (address, expected),
            _ => {
                warn!(transaction_id = %transaction.id, "reconciliation candidate without settlement fields");
                return Ok(ReconcileOutcome::Pending);
            }
        };

        let received = match self.ledger.address_received(address).await {
            Ok(received) => received,
            Err(e) => {
                // Transient by definition; the address does not stop
                // accumulating because we failed to look at it.
                warn!(transaction_id = %transaction.id, error = %e, "ledger query failed, staying pending");
                return Ok(ReconcileOutcome::Pending);
            }
        };

        if !self.is_settled(received, expected) {
            debug!(
                transaction_id = %transaction.id,
                received, expected, "settlement not yet sufficient"
            );
            return Ok(ReconcileOutcome::Pending);
        }

        let write = TerminalWrite {
            status: TransactionStatus::Success,
            external_transaction_id: None,
            execution_id: None,
            service_timestamp: None,
            settled_at: Some(Utc::now()),
        };
        let (finalized, wrote) = self.store.finalize_if_open(&transaction.id, &write).await?;
        self.store.mark_settlement_confirmed(&transaction.id).await?;

        if wrote {
            self.audit.log_event(
                SYSTEM_ACTOR,
                "internal",
                "SETTLEMENT_CONFIRMED",
                "SUCCESS",
                &format!(
                    "transaction={} received={} expected={}",
                    finalized.id, received, expected
                ),
            );
            info!(transaction_id = %finalized.id, received, expected, "settlement confirmed");
        }
        Ok(ReconcileOutcome::Confirmed)
    }
}
