//! Core domain model: the provider-agnostic transaction and its lifecycle.

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Canonical transaction lifecycle. Status only moves forward along
/// `CREATED -> WAITING_FOR_PAYMENT -> {SUCCESS, FAILED, ERROR}`; the last
/// three are terminal and immutable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionStatus {
    Created,
    WaitingForPayment,
    Success,
    Failed,
    Error,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Created => "CREATED",
            TransactionStatus::WaitingForPayment => "WAITING_FOR_PAYMENT",
            TransactionStatus::Success => "SUCCESS",
            TransactionStatus::Failed => "FAILED",
            TransactionStatus::Error => "ERROR",
        }
    }

    pub fn from_db(value: &str) -> Option<Self> {
        match value {
            "CREATED" => Some(TransactionStatus::Created),
            "WAITING_FOR_PAYMENT" => Some(TransactionStatus::WaitingForPayment),
            "SUCCESS" => Some(TransactionStatus::Success),
            "FAILED" => Some(TransactionStatus::Failed),
            "ERROR" => Some(TransactionStatus::Error),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransactionStatus::Success | TransactionStatus::Failed | TransactionStatus::Error
        )
    }

    /// Legal forward transitions from this state.
    pub fn can_transition_to(&self, target: TransactionStatus) -> bool {
        match self {
            TransactionStatus::Created => matches!(
                target,
                TransactionStatus::WaitingForPayment
                    | TransactionStatus::Success
                    | TransactionStatus::Failed
                    | TransactionStatus::Error
            ),
            TransactionStatus::WaitingForPayment => target.is_terminal(),
            _ => false,
        }
    }
}

impl std::fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A terminal outcome supplied by a provider callback or the reconciliation
/// poller. Unrecognized tokens collapse to `Error` rather than bubbling a
/// parse failure out to the external party.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Success,
    Failed,
    Error,
}

impl Verdict {
    pub fn from_token(token: &str) -> Self {
        match token.trim().to_uppercase().as_str() {
            "SUCCESS" => Verdict::Success,
            "FAILED" => Verdict::Failed,
            _ => Verdict::Error,
        }
    }

    pub fn as_status(&self) -> TransactionStatus {
        match self {
            Verdict::Success => TransactionStatus::Success,
            Verdict::Failed => TransactionStatus::Failed,
            Verdict::Error => TransactionStatus::Error,
        }
    }
}

/// A provider-agnostic payment transaction. Mutated only by the orchestrator
/// (provider selection, execution id capture) and the finalization path
/// (status, settlement fields); never deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    /// Opaque public handle shared with the customer's browser.
    pub id: String,
    pub merchant_id: String,
    pub merchant_order_id: String,
    pub amount: BigDecimal,
    pub currency: String,
    pub status: TransactionStatus,
    /// Set once a provider is selected; immutable afterward.
    pub chosen_provider: Option<String>,
    /// Opaque id returned by the provider (order id, STAN, derived address
    /// token). Set at most once, never overwritten.
    pub execution_id: Option<String>,
    pub external_transaction_id: Option<String>,
    pub success_url: String,
    pub failed_url: String,
    pub error_url: String,
    pub created_at: DateTime<Utc>,
    pub settled_at: Option<DateTime<Utc>>,
    pub service_timestamp: Option<DateTime<Utc>>,
    /// Ledger-settled providers only: where the funds are expected.
    pub settlement_address: Option<String>,
    /// Expected amount in the ledger's smallest unit.
    pub expected_settlement_units: Option<i64>,
    pub settlement_asset: Option<String>,
    /// Cached confirmation flag so repeated polls are cheap and idempotent.
    pub settlement_confirmed: bool,
}

impl Transaction {
    pub fn new(
        merchant_id: &str,
        merchant_order_id: &str,
        amount: BigDecimal,
        currency: &str,
        success_url: &str,
        failed_url: &str,
        error_url: &str,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            merchant_id: merchant_id.to_string(),
            merchant_order_id: merchant_order_id.to_string(),
            amount,
            currency: currency.to_string(),
            status: TransactionStatus::Created,
            chosen_provider: None,
            execution_id: None,
            external_transaction_id: None,
            success_url: success_url.to_string(),
            failed_url: failed_url.to_string(),
            error_url: error_url.to_string(),
            created_at: Utc::now(),
            settled_at: None,
            service_timestamp: None,
            settlement_address: None,
            expected_settlement_units: None,
            settlement_asset: None,
            settlement_confirmed: false,
        }
    }

    /// Merchant redirect target for the transaction's current status, with
    /// the transaction id and final status appended.
    pub fn redirect_url(&self) -> String {
        let base = match self.status {
            TransactionStatus::Success => &self.success_url,
            TransactionStatus::Failed => &self.failed_url,
            _ => &self.error_url,
        };
        let separator = if base.contains('?') { '&' } else { '?' };
        format!(
            "{}{}transactionId={}&status={}",
            base, separator, self.id, self.status
        )
    }
}

/// Static catalogue entry for a known provider kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentMethodInfo {
    pub name: String,
    pub service_key: String,
}

/// Which providers a merchant has enabled, with provider-side credentials.
/// Read-only from the orchestrator's point of view.
#[derive(Debug, Clone)]
pub struct MerchantSubscription {
    pub merchant_id: String,
    pub method_name: String,
    pub credentials: String,
}

#[derive(Debug, Clone)]
pub struct Merchant {
    pub merchant_id: String,
    /// Hex-encoded SHA-256 of the merchant secret. The raw secret is never
    /// stored or logged.
    pub secret_hash: String,
}

impl Merchant {
    pub fn with_secret(merchant_id: &str, secret: &str) -> Self {
        Self {
            merchant_id: merchant_id.to_string(),
            secret_hash: hash_secret(secret),
        }
    }

    pub fn verify_secret(&self, candidate: &str) -> bool {
        hash_secret(candidate) == self.secret_hash
    }
}

pub fn hash_secret(secret: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn sample_tx() -> Transaction {
        Transaction::new(
            "M1",
            "O1",
            BigDecimal::from_str("100.00").unwrap(),
            "EUR",
            "https://shop.example/success",
            "https://shop.example/failed",
            "https://shop.example/error",
        )
    }

    #[test]
    fn terminal_states_allow_no_transitions() {
        for terminal in [
            TransactionStatus::Success,
            TransactionStatus::Failed,
            TransactionStatus::Error,
        ] {
            assert!(terminal.is_terminal());
            assert!(!terminal.can_transition_to(TransactionStatus::Created));
            assert!(!terminal.can_transition_to(TransactionStatus::Success));
        }
    }

    #[test]
    fn created_can_move_forward_only() {
        let created = TransactionStatus::Created;
        assert!(created.can_transition_to(TransactionStatus::WaitingForPayment));
        assert!(created.can_transition_to(TransactionStatus::Failed));
        assert!(!TransactionStatus::WaitingForPayment.can_transition_to(TransactionStatus::Created));
    }

    #[test]
    fn unknown_verdict_token_maps_to_error() {
        assert_eq!(Verdict::from_token("SUCCESS"), Verdict::Success);
        assert_eq!(Verdict::from_token("failed"), Verdict::Failed);
        assert_eq!(Verdict::from_token("COMPLETED_MAYBE"), Verdict::Error);
        assert_eq!(Verdict::from_token(""), Verdict::Error);
    }

    #[test]
    fn redirect_url_appends_id_and_status() {
        let mut tx = sample_tx();
        tx.status = TransactionStatus::Success;
        let url = tx.redirect_url();
        assert!(url.starts_with("https://shop.example/success?transactionId="));
        assert!(url.ends_with("&status=SUCCESS"));
    }

    #[test]
    fn redirect_url_respects_existing_query() {
        let mut tx = sample_tx();
        tx.failed_url = "https://shop.example/failed?lang=en".to_string();
        tx.status = TransactionStatus::Failed;
        assert!(tx.redirect_url().contains("?lang=en&transactionId="));
    }

    #[test]
    fn merchant_secret_verification() {
        let merchant = Merchant::with_secret("M1", "s3cret");
        assert!(merchant.verify_secret("s3cret"));
        assert!(!merchant.verify_secret("wrong"));
    }
}
