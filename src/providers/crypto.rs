//! Crypto payments settle on a public ledger rather than through a capture
//! call. The connector derives a fresh deposit address and quotes the
//! expected amount in the ledger's smallest unit; the reconciliation poller
//! then watches the address until funds arrive.

use super::connector::{ConnectorClient, ConnectorInitRequest};
use super::types::{
    InitiateContext, InitiateOutcome, PaymentInstruction, Provider, SettlementExpectation,
};
use crate::error::{AppError, AppResult};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

pub const CRYPTO: &str = "CRYPTO";
const SERVICE_KEY: &str = "psp-crypto";

pub struct CryptoProvider {
    connector: ConnectorClient,
    asset: String,
}

impl CryptoProvider {
    pub fn new(connector: ConnectorClient, asset: &str) -> Self {
        Self {
            connector,
            asset: asset.to_string(),
        }
    }
}

/// Execution token carried through the flow: base64 of `address:units`.
pub fn execution_token(address: &str, expected_units: i64) -> String {
    BASE64.encode(format!("{}:{}", address, expected_units))
}

/// Inverse of `execution_token`; used when only the token survives.
pub fn parse_execution_token(token: &str) -> Option<(String, i64)> {
    let decoded = BASE64.decode(token).ok()?;
    let text = String::from_utf8(decoded).ok()?;
    let (address, units) = text.rsplit_once(':')?;
    if address.is_empty() {
        return None;
    }
    Some((address.to_string(), units.parse().ok()?))
}

#[async_trait]
impl Provider for CryptoProvider {
    fn name(&self) -> &'static str {
        CRYPTO
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
                    .unwrap_or_else(|| "address derivation refused".to_string()),
            });
        }

        let missing = |field: &str| AppError::Downstream {
            service: SERVICE_KEY.to_string(),
            message: format!("init reply missing {}", field),
            retryable: false,
        };
        let address = reply.address.ok_or_else(|| missing("address"))?;
        let expected_units = reply.expected_units.ok_or_else(|| missing("expectedUnits"))?;
        if expected_units <= 0 {
            return Err(AppError::Downstream {
                service: SERVICE_KEY.to_string(),
                message: format!("non-positive expectedUnits: {}", expected_units),
                retryable: false,
            });
        }

        Ok(InitiateOutcome::Accepted {
            execution_id: execution_token(&address, expected_units),
            instruction: PaymentInstruction::QrCode {
                data: format!(
                    "{}:{}?amount={}",
                    self.asset.to_lowercase(),
                    address,
                    expected_units
                ),
            },
            settlement: Some(SettlementExpectation {
                address,
                expected_units,
                asset: self.asset.clone(),
            }),
        })
    }

    /// There is nothing to capture; the ledger is the source of truth. The
    /// call only asserts the token is one we could have issued.
    async fn capture(&self, execution_id: &str) -> AppResult<bool> {
        Ok(parse_execution_token(execution_id).is_some())
    }
}
