//! Postgres-backed store. Uniqueness of (merchant_id, merchant_order_id) is
//! a database constraint; status transitions are guarded by `WHERE status`
//! clauses so races resolve in the database, not in application code.

use super::{MerchantStore, ProviderSelection, TerminalWrite, TransactionStore};
use crate::error::{AppError, AppResult};
use crate::model::{Merchant, MerchantSubscription, Transaction, TransactionStatus};
use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

const TRANSACTION_COLUMNS: &str = "id, merchant_id, merchant_order_id, amount, currency, status, \
     chosen_provider, execution_id, external_transaction_id, success_url, failed_url, error_url, \
     created_at, settled_at, service_timestamp, settlement_address, expected_settlement_units, \
     settlement_asset, settlement_confirmed";

pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> AppResult<Self> {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await
            .map_err(AppError::store)?;
        Ok(Self::new(pool))
    }

    async fn fetch(&self, id: &str) -> AppResult<Transaction> {
        let query = format!("SELECT {} FROM transactions WHERE id = $1", TRANSACTION_COLUMNS);
        let row = sqlx::query(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(AppError::store)?;
        match row {
            Some(row) => row_to_transaction(&row),
            None => Err(AppError::NotFound {
                transaction_id: id.to_string(),
            }),
        }
    }
}

fn row_to_transaction(row: &PgRow) -> AppResult<Transaction> {
    let status_raw: String = row.try_get("status").map_err(AppError::store)?;
    let status = TransactionStatus::from_db(&status_raw)
        .ok_or_else(|| AppError::store(format!("unknown status in store: {}", status_raw)))?;
    Ok(Transaction {
        id: row.try_get("id").map_err(AppError::store)?,
        merchant_id: row.try_get("merchant_id").map_err(AppError::store)?,
        merchant_order_id: row.try_get("merchant_order_id").map_err(AppError::store)?,
        amount: row.try_get::<BigDecimal, _>("amount").map_err(AppError::store)?,
        currency: row.try_get("currency").map_err(AppError::store)?,
        status,
        chosen_provider: row.try_get("chosen_provider").map_err(AppError::store)?,
        execution_id: row.try_get("execution_id").map_err(AppError::store)?,
        external_transaction_id: row
            .try_get("external_transaction_id")
            .map_err(AppError::store)?,
        success_url: row.try_get("success_url").map_err(AppError::store)?,
        failed_url: row.try_get("failed_url").map_err(AppError::store)?,
        error_url: row.try_get("error_url").map_err(AppError::store)?,
        created_at: row
            .try_get::<DateTime<Utc>, _>("created_at")
            .map_err(AppError::store)?,
        settled_at: row.try_get("settled_at").map_err(AppError::store)?,
        service_timestamp: row.try_get("service_timestamp").map_err(AppError::store)?,
        settlement_address: row.try_get("settlement_address").map_err(AppError::store)?,
        expected_settlement_units: row
            .try_get("expected_settlement_units")
            .map_err(AppError::store)?,
        settlement_asset: row.try_get("settlement_asset").map_err(AppError::store)?,
        settlement_confirmed: row.try_get("settlement_confirmed").map_err(AppError::store)?,
    })
}

#[async_trait]
impl TransactionStore for PostgresStore {
    async fn insert(&self, transaction: &Transaction) -> AppResult<()> {
        let result = sqlx::query(
            "INSERT INTO transactions (id, merchant_id, merchant_order_id, amount, currency, \
             status, success_url, failed_url, error_url, created_at, settlement_confirmed) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, FALSE)",
        )
        .bind(&transaction.id)
        .bind(&transaction.merchant_id)
        .bind(&transaction.merchant_order_id)
        .bind(&transaction.amount)
        .bind(&transaction.currency)
        .bind(transaction.status.as_str())
        .bind(&transaction.success_url)
        .bind(&transaction.failed_url)
        .bind(&transaction.error_url)
        .bind(transaction.created_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                Err(AppError::DuplicateOrder {
                    merchant_id: transaction.merchant_id.clone(),
                    merchant_order_id: transaction.merchant_order_id.clone(),
                })
            }
            Err(e) => Err(AppError::store(e)),
        }
    }

    async fn get(&self, id: &str) -> AppResult<Option<Transaction>> {
        let query = format!("SELECT {} FROM transactions WHERE id = $1", TRANSACTION_COLUMNS);
        let row = sqlx::query(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(AppError::store)?;
        row.map(|r| row_to_transaction(&r)).transpose()
    }

    async fn find_by_order(
        &self,
        merchant_id: &str,
        merchant_order_id: &str,
    ) -> AppResult<Option<Transaction>> {
        let query = format!(
            "SELECT {} FROM transactions WHERE merchant_id = $1 AND merchant_order_id = $2",
            TRANSACTION_COLUMNS
        );
        let row = sqlx::query(&query)
            .bind(merchant_id)
            .bind(merchant_order_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(AppError::store)?;
        row.map(|r| row_to_transaction(&r)).transpose()
    }

    async fn mark_waiting(
        &self,
        id: &str,
        selection: &ProviderSelection,
    ) -> AppResult<Transaction> {
        let query = format!(
            "UPDATE transactions SET status = 'WAITING_FOR_PAYMENT', chosen_provider = $2, \
             execution_id = COALESCE(execution_id, $3), settlement_address = $4, \
             expected_settlement_units = $5, settlement_asset = $6 \
             WHERE id = $1 AND status = 'CREATED' RETURNING {}",
            TRANSACTION_COLUMNS
        );
        let row = sqlx::query(&query)
            .bind(id)
            .bind(&selection.provider)
            .bind(&selection.execution_id)
            .bind(&selection.settlement_address)
            .bind(selection.expected_settlement_units)
            .bind(&selection.settlement_asset)
            .fetch_optional(&self.pool)
            .await
            .map_err(AppError::store)?;

        match row {
            Some(row) => row_to_transaction(&row),
            // The guarded update matched nothing: either the transaction is
            // gone or it already left CREATED.
            None => {
                let current = self.fetch(id).await?;
                Err(AppError::InvalidState {
                    transaction_id: id.to_string(),
                    status: current.status.to_string(),
                })
            }
        }
    }

    async fn finalize_if_open(
        &self,
        id: &str,
        write: &TerminalWrite,
    ) -> AppResult<(Transaction, bool)> {
        let query = format!(
            "UPDATE transactions SET status = $2, \
             external_transaction_id = COALESCE(external_transaction_id, $3), \
             execution_id = COALESCE(execution_id, $4), \
             service_timestamp = $5, settled_at = $6 \
             WHERE id = $1 AND status IN ('CREATED', 'WAITING_FOR_PAYMENT') RETURNING {}",
            TRANSACTION_COLUMNS
        );
        let row = sqlx::query(&query)
            .bind(id)
            .bind(write.status.as_str())
            .bind(&write.external_transaction_id)
            .bind(&write.execution_id)
            .bind(write.service_timestamp)
            .bind(write.settled_at)
            .fetch_optional(&self.pool)
            .await
            .map_err(AppError::store)?;

        match row {
            Some(row) => Ok((row_to_transaction(&row)?, true)),
            None => {
                let existing = self.fetch(id).await?;
                Ok((existing, false))
            }
        }
    }

    async fn mark_settlement_confirmed(&self, id: &str) -> AppResult<()> {
        let result = sqlx::query("UPDATE transactions SET settlement_confirmed = TRUE WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(AppError::store)?;
        if result.rows_affected() == 0 {
            return Err(AppError::NotFound {
                transaction_id: id.to_string(),
            });
        }
        Ok(())
    }

    async fn list_awaiting_settlement(&self) -> AppResult<Vec<Transaction>> {
        let query = format!(
            "SELECT {} FROM transactions WHERE status = 'WAITING_FOR_PAYMENT' \
             AND settlement_address IS NOT NULL AND settlement_confirmed = FALSE",
            TRANSACTION_COLUMNS
        );
        let rows = sqlx::query(&query)
            .fetch_all(&self.pool)
            .await
            .map_err(AppError::store)?;
        rows.iter().map(row_to_transaction).collect()
    }

    async fn list_created_before(&self, cutoff: DateTime<Utc>) -> AppResult<Vec<Transaction>> {
        let query = format!(
            "SELECT {} FROM transactions WHERE status = 'CREATED' AND created_at < $1",
            TRANSACTION_COLUMNS
        );
        let rows = sqlx::query(&query)
            .bind(cutoff)
            .fetch_all(&self.pool)
            .await
            .map_err(AppError::store)?;
        rows.iter().map(row_to_transaction).collect()
    }
}

#[async_trait]
impl MerchantStore for PostgresStore {
    async fn find_merchant(&self, merchant_id: &str) -> AppResult<Option<Merchant>> {
        let row = sqlx::query("SELECT merchant_id, secret_hash FROM merchants WHERE merchant_id = $1")
            .bind(merchant_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(AppError::store)?;
        match row {
            Some(row) => Ok(Some(Merchant {
                merchant_id: row.try_get("merchant_id").map_err(AppError::store)?,
                secret_hash: row.try_get("secret_hash").map_err(AppError::store)?,
            })),
            None => Ok(None),
        }
    }

    async fn subscriptions(&self, merchant_id: &str) -> AppResult<Vec<MerchantSubscription>> {
        let rows = sqlx::query(
            "SELECT merchant_id, method_name, credentials FROM merchant_subscriptions \
             WHERE merchant_id = $1",
        )
        .bind(merchant_id)
        .fetch_all(&self.pool)
        .await
        .map_err(AppError::store)?;

        rows.iter()
            .map(|row| {
                Ok(MerchantSubscription {
                    merchant_id: row.try_get("merchant_id").map_err(AppError::store)?,
                    method_name: row.try_get("method_name").map_err(AppError::store)?,
                    credentials: row.try_get("credentials").map_err(AppError::store)?,
                })
            })
            .collect()
    }
}
