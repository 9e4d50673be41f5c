//! Wallet payments via the PayPal connector. The connector opens an order
//! and returns the approval redirect; the order id is our execution handle.

use super::connector::{ConnectorClient, ConnectorInitRequest};
use super::types::{InitiateContext, InitiateOutcome, PaymentInstruction, Provider};
use crate::error::{AppError, AppResult};
use async_trait::async_trait;

pub const PAYPAL: &str = "PAYPAL";
const SERVICE_KEY: &str = "psp-paypal";

pub struct PaypalProvider {
    connector: ConnectorClient,
}

impl PaypalProvider {
    pub fn new(connector: ConnectorClient) -> Self {
        Self { connector }
    }
}

#[async_trait]
impl Provider for PaypalProvider {
    fn name(&self) -> &'static str {
        PAYPAL
    }

    fn service_key(&self) -> &'static str {
        SERVICE_KEY
    }

    async fn initiate(&self, ctx: &InitiateContext) -> AppResult<InitiateOutcome> {
        let request = ConnectorInitRequest {
            transaction_id: ctx.transaction_id.clone(),
            merchant_id: ctx.merchant_id.clone(),
            amount: ctx.amount.to_string(),
            currency: ctx.currency.clone(),
            credentials: ctx.credentials.clone(),
            return_url: ctx.return_url.clone(),
            cancel_url: ctx.cancel_url.clone(),
            stan: None,
        };
        let reply = self.connector.init(SERVICE_KEY, &request).await?;

        if !reply.success {
            return Ok(InitiateOutcome::Declined {
                reason: reply
                    .message
                    .unwrap_or_else(|| "declined by wallet".to_string()),
            });
        }

        let missing = |field: &str| AppError::Downstream {
            service: SERVICE_KEY.to_string(),
            message: format!("init reply missing {}", field),
            retryable: false,
        };
        let url = reply.redirect_url.ok_or_else(|| missing("redirectUrl"))?;
        let order_id = reply.external_id.ok_or_else(|| missing("externalId"))?;

        Ok(InitiateOutcome::Accepted {
            execution_id: order_id,
            instruction: PaymentInstruction::Redirect { url },
            settlement: None,
        })
    }

    async fn capture(&self, execution_id: &str) -> AppResult<bool> {
        self.connector.capture(SERVICE_KEY, execution_id).await
    }
}
