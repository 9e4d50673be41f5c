//! Provider abstraction shared by all payment methods.

use crate::error::AppResult;
use async_trait::async_trait;
use bigdecimal::BigDecimal;

/// What the orchestrator hands a provider when the customer picks it.
#[derive(Debug, Clone)]
pub struct InitiateContext {
    pub transaction_id: String,
    pub merchant_id: String,
    pub amount: BigDecimal,
    pub currency: String,
    /// Opaque provider-side credentials from the merchant's subscription.
    pub credentials: String,
    /// Finalization endpoint the provider comes back to after the customer
    /// completes or abandons the payment.
    pub return_url: String,
    pub cancel_url: String,
}

/// How the customer continues the payment after a successful initiation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentInstruction {
    Redirect { url: String },
    QrCode { data: String },
}

/// Ledger-settled providers report where funds are expected so the
/// reconciliation poller can watch the address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettlementExpectation {
    pub address: String,
    pub expected_units: i64,
    pub asset: String,
}

#[derive(Debug, Clone)]
pub enum InitiateOutcome {
    Accepted {
        /// Provider-scoped handle for later capture. Recorded at most once.
        execution_id: String,
        instruction: PaymentInstruction,
        settlement: Option<SettlementExpectation>,
    },
    /// The provider refused the payment outright (limit, blocked card, ...).
    /// Maps to transaction FAILED, not ERROR.
    Declined { reason: String },
}

#[async_trait]
pub trait Provider: Send + Sync {
    /// Catalogue name, e.g. "CARD".
    fn name(&self) -> &'static str;

    /// Discovery service name of the provider's connector, e.g. "psp-card".
    fn service_key(&self) -> &'static str;

    async fn initiate(&self, ctx: &InitiateContext) -> AppResult<InitiateOutcome>;

    /// Confirm a previously initiated payment with the connector.
    async fn capture(&self, execution_id: &str) -> AppResult<bool>;
}
