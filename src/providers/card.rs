//! Card payments. Generates a STAN (system trace audit number) per
//! initiation and hands the customer the acquirer's 3-DS redirect.

use super::connector::{ConnectorClient, ConnectorInitRequest};
use super::types::{InitiateContext, InitiateOutcome, PaymentInstruction, Provider};
use crate::error::{AppError, AppResult};
use async_trait::async_trait;
use uuid::Uuid;

pub const CARD: &str = "CARD";
const SERVICE_KEY: &str = "psp-card";

pub struct CardProvider {
    connector: ConnectorClient,
}

impl CardProvider {
    pub fn new(connector: ConnectorClient) -> Self {
        Self { connector }
    }
}

/// Six-digit STAN derived from a fresh v4 uuid.
fn generate_stan() -> String {
    let bytes = Uuid::new_v4().into_bytes();
    let n = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) % 1_000_000;
    format!("{:06}", n)
}

#[async_trait]
impl Provider for CardProvider {
    fn name(&self) -> &'static str {
        CARD
    }

    fn service_key(&self) -> &'static str {
        SERVICE_KEY
    }

    async fn initiate(&self, ctx: &InitiateContext) -> AppResult<InitiateOutcome> {
        let stan = generate_stan();
        let request = ConnectorInitRequest {
            transaction_id: ctx.transaction_id.clone(),
            merchant_id: ctx.merchant_id.clone(),
            amount: ctx.amount.to_string(),
            currency: ctx.currency.clone(),
            credentials: ctx.credentials.clone(),
            return_url: ctx.return_url.clone(),
            cancel_url: ctx.cancel_url.clone(),
            stan: Some(stan.clone()),
        };
        let reply = self.connector.init(SERVICE_KEY, &request).await?;

        if !reply.success {
            return Ok(InitiateOutcome::Declined {
                reason: reply
                    .message
                    .unwrap_or_else(|| "declined by card network".to_string()),
            });
        }

        let url = reply.redirect_url.ok_or_else(|| AppError::Downstream {
            service: SERVICE_KEY.to_string(),
            message: "init reply missing redirectUrl".to_string(),
            retryable: false,
        })?;

        Ok(InitiateOutcome::Accepted {
            execution_id: reply.external_id.unwrap_or(stan),
            instruction: PaymentInstruction::Redirect { url },
            settlement: None,
        })
    }

    async fn capture(&self, execution_id: &str) -> AppResult<bool> {
        self.connector.capture(SERVICE_KEY, execution_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stan_is_six_digits() {
        for _ in 0..20 {
            let stan = generate_stan();
            assert_eq!(stan.len(), 6);
            assert!(stan.chars().all(|c| c.is_ascii_digit()));
        }
    }
}
