//! Wire contract every provider connector speaks: `POST /connector/init` to
//! open a payment, `POST /connector/capture/{externalId}` to confirm it
//! (reply is a bare boolean). All calls go through the resilient invoker.

use crate::error::AppResult;
use crate::invoker::ResilientInvoker;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectorInitRequest {
    pub transaction_id: String,
    pub merchant_id: String,
    /// Decimal string; connectors must not receive floats.
    pub amount: String,
    pub currency: String,
    pub credentials: String,
    /// Where the provider sends the customer (or its callback) afterwards.
    pub return_url: String,
    pub cancel_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stan: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectorInitReply {
    pub success: bool,
    #[serde(default)]
    pub external_id: Option<String>,
    #[serde(default)]
    pub redirect_url: Option<String>,
    #[serde(default)]
    pub qr_data: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub expected_units: Option<i64>,
    /// Human-readable detail; carries the decline reason on refusal.
    #[serde(default)]
    pub message: Option<String>,
}

/// Thin client shared by all providers; owns no retry logic of its own.
#[derive(Clone)]
pub struct ConnectorClient {
    invoker: Arc<ResilientInvoker>,
}

impl ConnectorClient {
    pub fn new(invoker: Arc<ResilientInvoker>) -> Self {
        Self { invoker }
    }

    pub async fn init(
        &self,
        service_key: &str,
        request: &ConnectorInitRequest,
    ) -> AppResult<ConnectorInitReply> {
        let body = serde_json::to_value(request)
            .map_err(|e| crate::error::AppError::store(format!("request encode: {}", e)))?;
        self.invoker.post(service_key, "/connector/init", &body).await
    }

    pub async fn capture(&self, service_key: &str, external_id: &str) -> AppResult<bool> {
        let path = format!("/connector/capture/{}", external_id);
        self.invoker.post(service_key, &path, &json!({})).await
    }
}
