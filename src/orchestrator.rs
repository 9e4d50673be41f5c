//! Transaction lifecycle orchestration: creation, checkout, provider
//! selection and finalization. Status only ever changes through the store's
//! guarded transitions, so every path here is safe to retry or replay.

use crate::audit::AuditChain;
use crate::error::{AppError, AppResult};
use crate::model::{Merchant, Transaction, TransactionStatus, Verdict};
use crate::providers::{
    InitiateContext, InitiateOutcome, PaymentInstruction, ProviderRegistry,
};
use crate::store::{MerchantStore, ProviderSelection, TerminalWrite, TransactionStore};
use bigdecimal::{BigDecimal, Zero};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePaymentRequest {
    pub merchant_id: String,
    pub merchant_secret: String,
    pub merchant_order_id: String,
    pub amount: BigDecimal,
    pub currency: String,
    pub success_url: String,
    pub failed_url: String,
    pub error_url: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePaymentReply {
    pub transaction_id: String,
    pub payment_url: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutData {
    pub transaction_id: String,
    pub merchant_id: String,
    pub amount: BigDecimal,
    pub currency: String,
    pub available_methods: Vec<String>,
}

/// Result of the customer picking a payment method.
#[derive(Debug, Clone)]
pub enum SelectionOutcome {
    Proceed(PaymentInstruction),
    /// The provider refused; the transaction is FAILED and the customer goes
    /// back to the merchant.
    Declined { redirect_url: String },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalizeRequest {
    pub transaction_id: String,
    /// Status token from the callback or poller; anything unrecognized
    /// collapses to ERROR.
    pub status: String,
    #[serde(default)]
    pub external_transaction_id: Option<String>,
    #[serde(default)]
    pub execution_id: Option<String>,
    #[serde(default)]
    pub service_timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FinalizeReply {
    pub transaction_id: String,
    pub status: TransactionStatus,
    pub redirect_url: String,
}

pub struct Orchestrator {
    store: Arc<dyn TransactionStore>,
    merchants: Arc<dyn MerchantStore>,
    registry: Arc<ProviderRegistry>,
    audit: Arc<AuditChain>,
    /// Checkout page template; `{id}` is replaced with the transaction id.
    checkout_url_template: String,
    /// Public finalize endpoint handed to providers as return/cancel target.
    finalize_url: String,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn TransactionStore>,
        merchants: Arc<dyn MerchantStore>,
        registry: Arc<ProviderRegistry>,
        audit: Arc<AuditChain>,
        checkout_url_template: &str,
        finalize_url: &str,
    ) -> Self {
        Self {
            store,
            merchants,
            registry,
            audit,
            checkout_url_template: checkout_url_template.to_string(),
            finalize_url: finalize_url.to_string(),
        }
    }

    /// Open a new transaction for a merchant order. Idempotency is enforced
    /// by the store's natural key: a second init for the same order collides
    /// with `DuplicateOrder` and writes nothing.
    pub async fn create_payment(
        &self,
        request: &CreatePaymentRequest,
        client_addr: &str,
    ) -> AppResult<CreatePaymentReply> {
        let merchant = self
            .authenticate(&request.merchant_id, &request.merchant_secret, client_addr)
            .await?;
        if let Err(e) = validate_create(request) {
            self.audit.log_event(
                &merchant.merchant_id,
                client_addr,
                "TRANSACTION_CREATE",
                "REJECTED",
                &format!("order={} {}", request.merchant_order_id, e),
            );
            return Err(e);
        }

        let transaction = Transaction::new(
            &merchant.merchant_id,
            &request.merchant_order_id,
            request.amount.clone(),
            &request.currency.to_uppercase(),
            &request.success_url,
            &request.failed_url,
            &request.error_url,
        );

        if let Err(e) = self.store.insert(&transaction).await {
            if matches!(e, AppError::DuplicateOrder { .. }) {
                self.audit.log_event(
                    &merchant.merchant_id,
                    client_addr,
                    "TRANSACTION_CREATE",
                    "REJECTED",
                    &format!("duplicate order {}", request.merchant_order_id),
                );
            }
            return Err(e);
        }

        self.audit.log_event(
            &merchant.merchant_id,
            client_addr,
            "TRANSACTION_CREATED",
            "SUCCESS",
            &format!(
                "transaction={} order={} amount={} {}",
                transaction.id, transaction.merchant_order_id, transaction.amount,
                transaction.currency
            ),
        );
        info!(transaction_id = %transaction.id, merchant_id = %merchant.merchant_id, "transaction created");

        Ok(CreatePaymentReply {
            payment_url: self.checkout_url_template.replace("{id}", &transaction.id),
            transaction_id: transaction.id,
        })
    }

    /// Data for the hosted checkout page. Only meaningful while the customer
    /// has not yet picked a method.
    pub async fn checkout_data(&self, transaction_id: &str) -> AppResult<CheckoutData> {
        let transaction = self.load(transaction_id).await?;
        if transaction.status != TransactionStatus::Created {
            return Err(AppError::InvalidState {
                transaction_id: transaction.id,
                status: transaction.status.to_string(),
            });
        }

        let available_methods = self
            .merchants
            .subscriptions(&transaction.merchant_id)
            .await?
            .into_iter()
            .map(|s| s.method_name)
            .filter(|name| self.registry.has(name))
            .collect();

        Ok(CheckoutData {
            transaction_id: transaction.id,
            merchant_id: transaction.merchant_id,
            amount: transaction.amount,
            currency: transaction.currency,
            available_methods,
        })
    }

    /// The customer picked a payment method: initiate with the provider and
    /// advance the state machine according to the outcome.
    pub async fn select_provider(
        &self,
        transaction_id: &str,
        method: &str,
        client_addr: &str,
    ) -> AppResult<SelectionOutcome> {
        let transaction = self.load(transaction_id).await?;
        if transaction.status != TransactionStatus::Created {
            return Err(AppError::InvalidState {
                transaction_id: transaction.id,
                status: transaction.status.to_string(),
            });
        }

        let provider = match self.registry.get(method) {
            Ok(provider) => provider,
            Err(e) => {
                self.audit.log_event(
                    &transaction.merchant_id,
                    client_addr,
                    "PROVIDER_SELECT",
                    "REJECTED",
                    &format!("transaction={} unknown method {}", transaction.id, method),
                );
                return Err(e);
            }
        };
        let subscription = self
            .merchants
            .subscriptions(&transaction.merchant_id)
            .await?
            .into_iter()
            .find(|s| s.method_name.eq_ignore_ascii_case(provider.name()));
        let Some(subscription) = subscription else {
            let e = AppError::validation(
                format!(
                    "merchant {} is not subscribed to {}",
                    transaction.merchant_id,
                    provider.name()
                ),
                Some("method"),
            );
            self.audit.log_event(
                &transaction.merchant_id,
                client_addr,
                "PROVIDER_SELECT",
                "REJECTED",
                &format!(
                    "transaction={} method {} not subscribed",
                    transaction.id,
                    provider.name()
                ),
            );
            return Err(e);
        };

        let ctx = InitiateContext {
            transaction_id: transaction.id.clone(),
            merchant_id: transaction.merchant_id.clone(),
            amount: transaction.amount.clone(),
            currency: transaction.currency.clone(),
            credentials: subscription.credentials,
            return_url: self.finalize_url.clone(),
            cancel_url: self.finalize_url.clone(),
        };

        match provider.initiate(&ctx).await {
            Ok(InitiateOutcome::Accepted {
                execution_id,
                instruction,
                settlement,
            }) => {
                let selection = ProviderSelection {
                    provider: provider.name().to_string(),
                    execution_id: Some(execution_id),
                    settlement_address: settlement.as_ref().map(|s| s.address.clone()),
                    expected_settlement_units: settlement.as_ref().map(|s| s.expected_units),
                    settlement_asset: settlement.map(|s| s.asset),
                };
                self.store.mark_waiting(&transaction.id, &selection).await?;
                self.audit.log_event(
                    &transaction.merchant_id,
                    client_addr,
                    "PROVIDER_SELECTED",
                    "SUCCESS",
                    &format!("transaction={} method={}", transaction.id, provider.name()),
                );
                Ok(SelectionOutcome::Proceed(instruction))
            }
            Ok(InitiateOutcome::Declined { reason }) => {
                let (closed, _) = self
                    .store
                    .finalize_if_open(
                        &transaction.id,
                        &TerminalWrite::status_only(TransactionStatus::Failed),
                    )
                    .await?;
                self.audit.log_event(
                    &transaction.merchant_id,
                    client_addr,
                    "PAYMENT_DECLINED",
                    "FAILED",
                    &format!(
                        "transaction={} method={} reason={}",
                        transaction.id,
                        provider.name(),
                        reason
                    ),
                );
                Ok(SelectionOutcome::Declined {
                    redirect_url: closed.redirect_url(),
                })
            }
            // Discovery found no live instance: the invoker already raised
            // the alert; the transaction stays CREATED and can be retried.
            Err(e @ AppError::DownstreamUnavailable { .. }) => Err(e),
            Err(e @ (AppError::ExhaustedRetries { .. } | AppError::Downstream { .. })) => {
                self.store
                    .finalize_if_open(
                        &transaction.id,
                        &TerminalWrite::status_only(TransactionStatus::Error),
                    )
                    .await?;
                self.audit.log_event(
                    &transaction.merchant_id,
                    client_addr,
                    "PROVIDER_INIT_ERROR",
                    "ERROR",
                    &format!("transaction={} method={} error={}", transaction.id, method, e),
                );
                warn!(transaction_id = %transaction.id, method, error = %e, "provider initiation errored");
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    /// Single idempotent entry point for provider callbacks and poller
    /// verdicts. The first terminal write wins; replays return the stored
    /// state and the same redirect.
    pub async fn finalize(
        &self,
        request: &FinalizeRequest,
        client_addr: &str,
    ) -> AppResult<FinalizeReply> {
        let transaction = self.load(&request.transaction_id).await?;
        let mut verdict = Verdict::from_token(&request.status);

        // Capture before committing SUCCESS; a refused capture downgrades
        // the verdict. Replays skip this entirely.
        if verdict == Verdict::Success && !transaction.status.is_terminal() {
            if let (Some(provider_name), Some(execution_id)) =
                (&transaction.chosen_provider, &transaction.execution_id)
            {
                let provider = self.registry.get(provider_name)?;
                match provider.capture(execution_id).await {
                    Ok(true) => {}
                    Ok(false) => verdict = Verdict::Failed,
                    Err(e @ AppError::DownstreamUnavailable { .. }) => return Err(e),
                    Err(e) => {
                        warn!(transaction_id = %transaction.id, error = %e, "capture errored");
                        verdict = Verdict::Error;
                    }
                }
            }
        }

        let status = verdict.as_status();
        let write = TerminalWrite {
            status,
            external_transaction_id: request.external_transaction_id.clone(),
            execution_id: request.execution_id.clone(),
            service_timestamp: request.service_timestamp,
            settled_at: (status == TransactionStatus::Success).then(Utc::now),
        };
        let (finalized, wrote) = self.store.finalize_if_open(&transaction.id, &write).await?;

        self.audit.log_event(
            &finalized.merchant_id,
            client_addr,
            if wrote {
                "TRANSACTION_FINALIZED"
            } else {
                "FINALIZE_REPLAY"
            },
            finalized.status.as_str(),
            &format!(
                "transaction={} requested={} final={}",
                finalized.id, request.status, finalized.status
            ),
        );

        Ok(FinalizeReply {
            redirect_url: finalized.redirect_url(),
            transaction_id: finalized.id,
            status: finalized.status,
        })
    }

    /// Merchant-side status poll, auth-checked.
    pub async fn status_for_order(
        &self,
        merchant_id: &str,
        merchant_secret: &str,
        merchant_order_id: &str,
        client_addr: &str,
    ) -> AppResult<TransactionStatus> {
        let merchant = self
            .authenticate(merchant_id, merchant_secret, client_addr)
            .await?;
        let transaction = self
            .store
            .find_by_order(&merchant.merchant_id, merchant_order_id)
            .await?
            .ok_or_else(|| AppError::NotFound {
                transaction_id: merchant_order_id.to_string(),
            })?;
        Ok(transaction.status)
    }

    /// Merchant-initiated abort of a transaction the customer never paid.
    pub async fn cancel(
        &self,
        merchant_id: &str,
        merchant_secret: &str,
        transaction_id: &str,
        client_addr: &str,
    ) -> AppResult<TransactionStatus> {
        let merchant = self
            .authenticate(merchant_id, merchant_secret, client_addr)
            .await?;
        let transaction = self.load(transaction_id).await?;
        if transaction.merchant_id != merchant.merchant_id {
            // Do not leak other merchants' transactions.
            return Err(AppError::NotFound {
                transaction_id: transaction_id.to_string(),
            });
        }
        if transaction.status != TransactionStatus::Created {
            return Err(AppError::InvalidState {
                transaction_id: transaction.id,
                status: transaction.status.to_string(),
            });
        }

        let (closed, _) = self
            .store
            .finalize_if_open(
                &transaction.id,
                &TerminalWrite::status_only(TransactionStatus::Failed),
            )
            .await?;
        self.audit.log_event(
            &merchant.merchant_id,
            client_addr,
            "TRANSACTION_CANCELLED",
            closed.status.as_str(),
            &format!("transaction={}", closed.id),
        );
        Ok(closed.status)
    }

    async fn authenticate(
        &self,
        merchant_id: &str,
        secret: &str,
        client_addr: &str,
    ) -> AppResult<Merchant> {
        let merchant = self.merchants.find_merchant(merchant_id).await?;
        match merchant {
            Some(m) if m.verify_secret(secret) => Ok(m),
            _ => {
                self.audit.log_security_alert(
                    merchant_id,
                    client_addr,
                    "AUTH_FAILED",
                    "unknown merchant or bad secret",
                );
                Err(AppError::Auth {
                    message: format!("authentication failed for merchant {}", merchant_id),
                })
            }
        }
    }

    async fn load(&self, transaction_id: &str) -> AppResult<Transaction> {
        self.store
            .get(transaction_id)
            .await?
            .ok_or_else(|| AppError::NotFound {
                transaction_id: transaction_id.to_string(),
            })
    }
}

fn validate_create(request: &CreatePaymentRequest) -> AppResult<()> {
    if request.merchant_order_id.trim().is_empty() {
        return Err(AppError::validation(
            "merchant_order_id must not be empty",
            Some("merchant_order_id"),
        ));
    }
    if request.amount <= BigDecimal::zero() {
        return Err(AppError::validation(
            "amount must be positive",
            Some("amount"),
        ));
    }
    let currency = request.currency.trim();
    if currency.len() != 3 || !currency.chars().all(|c| c.is_ascii_alphabetic()) {
        return Err(AppError::validation(
            "currency must be a three-letter ISO code",
            Some("currency"),
        ));
    }
    for (field, url) in [
        ("success_url", &request.success_url),
        ("failed_url", &request.failed_url),
        ("error_url", &request.error_url),
    ] {
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(AppError::validation(
                format!("{} must be an absolute http(s) URL", field),
                Some(field),
            ));
        }
    }
    Ok(())
}
