//! Transaction and merchant persistence.
//!
//! All status mutation goes through compare-and-swap style operations on the
//! store; callers never read-modify-write a status themselves. Two
//! implementations: Postgres for production, an in-memory store for tests and
//! standalone runs.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PostgresStore;

use crate::error::AppResult;
use crate::model::{Merchant, MerchantSubscription, Transaction, TransactionStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Fields recorded when a provider is chosen for a transaction. Applied
/// atomically with the CREATED -> WAITING_FOR_PAYMENT transition.
#[derive(Debug, Clone, Default)]
pub struct ProviderSelection {
    pub provider: String,
    pub execution_id: Option<String>,
    pub settlement_address: Option<String>,
    pub expected_settlement_units: Option<i64>,
    pub settlement_asset: Option<String>,
}

/// Terminal outcome applied by `finalize_if_open`. `status` must be one of
/// the three terminal states.
#[derive(Debug, Clone)]
pub struct TerminalWrite {
    pub status: TransactionStatus,
    pub external_transaction_id: Option<String>,
    /// Only applied if the transaction has no execution id yet.
    pub execution_id: Option<String>,
    pub service_timestamp: Option<DateTime<Utc>>,
    pub settled_at: Option<DateTime<Utc>>,
}

impl TerminalWrite {
    pub fn status_only(status: TransactionStatus) -> Self {
        Self {
            status,
            external_transaction_id: None,
            execution_id: None,
            service_timestamp: None,
            settled_at: None,
        }
    }
}

#[async_trait]
pub trait TransactionStore: Send + Sync {
    /// Insert a new transaction. The (merchant_id, merchant_order_id) pair is
    /// a natural key; a collision yields `DuplicateOrder` and writes nothing.
    async fn insert(&self, transaction: &Transaction) -> AppResult<()>;

    async fn get(&self, id: &str) -> AppResult<Option<Transaction>>;

    async fn find_by_order(
        &self,
        merchant_id: &str,
        merchant_order_id: &str,
    ) -> AppResult<Option<Transaction>>;

    /// CAS CREATED -> WAITING_FOR_PAYMENT, recording the chosen provider and
    /// execution fields in the same write. `InvalidState` if the transaction
    /// is no longer CREATED.
    async fn mark_waiting(&self, id: &str, selection: &ProviderSelection)
        -> AppResult<Transaction>;

    /// Move an open (non-terminal) transaction to a terminal state. If the
    /// transaction is already terminal the stored record is returned
    /// untouched; the boolean reports whether this call performed the write.
    /// First terminal write wins under concurrency.
    async fn finalize_if_open(
        &self,
        id: &str,
        write: &TerminalWrite,
    ) -> AppResult<(Transaction, bool)>;

    /// Latch the settlement-confirmed flag so repeated ledger polls skip the
    /// network. Idempotent.
    async fn mark_settlement_confirmed(&self, id: &str) -> AppResult<()>;

    /// WAITING_FOR_PAYMENT transactions that settle on a ledger and are not
    /// yet confirmed.
    async fn list_awaiting_settlement(&self) -> AppResult<Vec<Transaction>>;

    /// CREATED transactions older than the cutoff, for the expiry sweep.
    async fn list_created_before(&self, cutoff: DateTime<Utc>) -> AppResult<Vec<Transaction>>;
}

#[async_trait]
pub trait MerchantStore: Send + Sync {
    async fn find_merchant(&self, merchant_id: &str) -> AppResult<Option<Merchant>>;

    /// Payment methods the merchant has enabled, with provider credentials.
    async fn subscriptions(&self, merchant_id: &str) -> AppResult<Vec<MerchantSubscription>>;
}
