//! QR-based payments. The QR payload is opaque to the engine; only its shape
//! is checked before it is handed to the customer.

use super::connector::{ConnectorClient, ConnectorInitRequest};
use super::types::{InitiateContext, InitiateOutcome, PaymentInstruction, Provider};
use crate::error::{AppError, AppResult};
use async_trait::async_trait;

pub const QR: &str = "QR";
const SERVICE_KEY: &str = "psp-qr";

const MAX_QR_PAYLOAD: usize = 4096;

pub struct QrProvider {
    connector: ConnectorClient,
}

impl QrProvider {
    pub fn new(connector: ConnectorClient) -> Self {
        Self { connector }
    }
}

/// Shape check only: non-empty, bounded, printable ASCII. The payload's
/// meaning belongs to the connector.
fn qr_payload_is_valid(data: &str) -> bool {
    !data.is_empty()
        && data.len() <= MAX_QR_PAYLOAD
        && data.chars().all(|c| c.is_ascii() && !c.is_ascii_control())
}

#[async_trait]
impl Provider for QrProvider {
    fn name(&self) -> &'static str {
        QR
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
                    .unwrap_or_else(|| "declined by QR scheme".to_string()),
            });
        }

        let data = reply.qr_data.ok_or_else(|| AppError::Downstream {
            service: SERVICE_KEY.to_string(),
            message: "init reply missing qrData".to_string(),
            retryable: false,
        })?;
        if !qr_payload_is_valid(&data) {
            return Err(AppError::Downstream {
                service: SERVICE_KEY.to_string(),
                message: "init reply carried a malformed QR payload".to_string(),
                retryable: false,
            });
        }
        let execution_id = reply.external_id.ok_or_else(|| AppError::Downstream {
            service: SERVICE_KEY.to_string(),
            message: "init reply missing externalId".to_string(),
            retryable: false,
        })?;

        Ok(InitiateOutcome::Accepted {
            execution_id,
            instruction: PaymentInstruction::QrCode { data },
            settlement: None,
        })
    }

    async fn capture(&self, execution_id: &str) -> AppResult<bool> {
        self.connector.capture(SERVICE_KEY, execution_id).await
    }
}
