//! In-memory store used by tests and standalone runs.
//!
//! A single mutex serializes check-then-insert, so natural-key uniqueness and
//! first-terminal-write-wins hold without a database.

use super::{MerchantStore, ProviderSelection, TerminalWrite, TransactionStore};
use crate::error::{AppError, AppResult};
use crate::model::{Merchant, MerchantSubscription, Transaction, TransactionStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Default)]
struct Inner {
    transactions: HashMap<String, Transaction>,
    // (merchant_id, merchant_order_id) -> transaction id
    order_index: HashMap<(String, String), String>,
    merchants: HashMap<String, Merchant>,
    subscriptions: Vec<MerchantSubscription>,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_merchant(&self, merchant: Merchant) {
        let mut inner = self.lock();
        inner.merchants.insert(merchant.merchant_id.clone(), merchant);
    }

    pub fn subscribe(&self, merchant_id: &str, method_name: &str, credentials: &str) {
        let mut inner = self.lock();
        inner.subscriptions.push(MerchantSubscription {
            merchant_id: merchant_id.to_string(),
            method_name: method_name.to_string(),
            credentials: credentials.to_string(),
        });
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // Poisoning only happens after a panic in another test thread.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl TransactionStore for MemoryStore {
    async fn insert(&self, transaction: &Transaction) -> AppResult<()> {
        let mut inner = self.lock();
        let key = (
            transaction.merchant_id.clone(),
            transaction.merchant_order_id.clone(),
        );
        if inner.order_index.contains_key(&key) {
            return Err(AppError::DuplicateOrder {
                merchant_id: transaction.merchant_id.clone(),
                merchant_order_id: transaction.merchant_order_id.clone(),
            });
        }
        inner.order_index.insert(key, transaction.id.clone());
        inner
            .transactions
            .insert(transaction.id.clone(), transaction.clone());
        Ok(())
    }

    async fn get(&self, id: &str) -> AppResult<Option<Transaction>> {
        Ok(self.lock().transactions.get(id).cloned())
    }

    async fn find_by_order(
        &self,
        merchant_id: &str,
        merchant_order_id: &str,
    ) -> AppResult<Option<Transaction>> {
        let inner = self.lock();
        let key = (merchant_id.to_string(), merchant_order_id.to_string());
        Ok(inner
            .order_index
            .get(&key)
            .and_then(|id| inner.transactions.get(id))
            .cloned())
    }

    async fn mark_waiting(
        &self,
        id: &str,
        selection: &ProviderSelection,
    ) -> AppResult<Transaction> {
        let mut inner = self.lock();
        let transaction = inner
            .transactions
            .get_mut(id)
            .ok_or_else(|| AppError::NotFound {
                transaction_id: id.to_string(),
            })?;
        if !transaction
            .status
            .can_transition_to(TransactionStatus::WaitingForPayment)
        {
            return Err(AppError::InvalidState {
                transaction_id: id.to_string(),
                status: transaction.status.to_string(),
            });
        }
        transaction.status = TransactionStatus::WaitingForPayment;
        transaction.chosen_provider = Some(selection.provider.clone());
        if transaction.execution_id.is_none() {
            transaction.execution_id = selection.execution_id.clone();
        }
        transaction.settlement_address = selection.settlement_address.clone();
        transaction.expected_settlement_units = selection.expected_settlement_units;
        transaction.settlement_asset = selection.settlement_asset.clone();
        Ok(transaction.clone())
    }

    async fn finalize_if_open(
        &self,
        id: &str,
        write: &TerminalWrite,
    ) -> AppResult<(Transaction, bool)> {
        let mut inner = self.lock();
        let transaction = inner
            .transactions
            .get_mut(id)
            .ok_or_else(|| AppError::NotFound {
                transaction_id: id.to_string(),
            })?;
        if !transaction.status.can_transition_to(write.status) {
            return Ok((transaction.clone(), false));
        }
        transaction.status = write.status;
        if transaction.external_transaction_id.is_none() {
            transaction.external_transaction_id = write.external_transaction_id.clone();
        }
        if transaction.execution_id.is_none() {
            transaction.execution_id = write.execution_id.clone();
        }
        transaction.service_timestamp = write.service_timestamp;
        transaction.settled_at = write.settled_at;
        Ok((transaction.clone(), true))
    }

    async fn mark_settlement_confirmed(&self, id: &str) -> AppResult<()> {
        let mut inner = self.lock();
        match inner.transactions.get_mut(id) {
            Some(transaction) => {
                transaction.settlement_confirmed = true;
                Ok(())
            }
            None => Err(AppError::NotFound {
                transaction_id: id.to_string(),
            }),
        }
    }

    async fn list_awaiting_settlement(&self) -> AppResult<Vec<Transaction>> {
        Ok(self
            .lock()
            .transactions
            .values()
            .filter(|t| {
                t.status == TransactionStatus::WaitingForPayment
                    && t.settlement_address.is_some()
                    && !t.settlement_confirmed
            })
            .cloned()
            .collect())
    }

    async fn list_created_before(&self, cutoff: DateTime<Utc>) -> AppResult<Vec<Transaction>> {
        Ok(self
            .lock()
            .transactions
            .values()
            .filter(|t| t.status == TransactionStatus::Created && t.created_at < cutoff)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl MerchantStore for MemoryStore {
    async fn find_merchant(&self, merchant_id: &str) -> AppResult<Option<Merchant>> {
        Ok(self.lock().merchants.get(merchant_id).cloned())
    }

    async fn subscriptions(&self, merchant_id: &str) -> AppResult<Vec<MerchantSubscription>> {
        Ok(self
            .lock()
            .subscriptions
            .iter()
            .filter(|s| s.merchant_id == merchant_id)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bigdecimal::BigDecimal;
    use std::str::FromStr;

    fn sample(merchant: &str, order: &str) -> Transaction {
        Transaction::new(
            merchant,
            order,
            BigDecimal::from_str("25.00").unwrap(),
            "EUR",
            "https://shop/s",
            "https://shop/f",
            "https://shop/e",
        )
    }

    #[tokio::test]
    async fn duplicate_order_is_rejected() {
        let store = MemoryStore::new();
        store.insert(&sample("M1", "O1")).await.unwrap();
        let err = store.insert(&sample("M1", "O1")).await.unwrap_err();
        assert!(matches!(err, AppError::DuplicateOrder { .. }));
        // Same order id under another merchant is fine.
        store.insert(&sample("M2", "O1")).await.unwrap();
    }

    #[tokio::test]
    async fn mark_waiting_requires_created() {
        let store = MemoryStore::new();
        let tx = sample("M1", "O1");
        store.insert(&tx).await.unwrap();

        let selection = ProviderSelection {
            provider: "CARD".to_string(),
            execution_id: Some("STAN-1".to_string()),
            ..ProviderSelection::default()
        };
        let updated = store.mark_waiting(&tx.id, &selection).await.unwrap();
        assert_eq!(updated.status, TransactionStatus::WaitingForPayment);
        assert_eq!(updated.execution_id.as_deref(), Some("STAN-1"));

        let err = store.mark_waiting(&tx.id, &selection).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidState { .. }));
    }

    #[tokio::test]
    async fn first_terminal_write_wins() {
        let store = MemoryStore::new();
        let tx = sample("M1", "O1");
        store.insert(&tx).await.unwrap();

        let (after_first, wrote) = store
            .finalize_if_open(&tx.id, &TerminalWrite::status_only(TransactionStatus::Success))
            .await
            .unwrap();
        assert!(wrote);
        assert_eq!(after_first.status, TransactionStatus::Success);

        let (after_second, wrote) = store
            .finalize_if_open(&tx.id, &TerminalWrite::status_only(TransactionStatus::Failed))
            .await
            .unwrap();
        assert!(!wrote);
        assert_eq!(after_second.status, TransactionStatus::Success);
    }
}
