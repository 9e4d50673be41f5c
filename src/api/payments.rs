use super::{client_addr, ApiError, AppState};
use crate::error::AppError;
use crate::orchestrator::{CreatePaymentRequest, FinalizeRequest, SelectionOutcome};
use crate::providers::PaymentInstruction;
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::json;

pub async fn create_payment(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<CreatePaymentRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let reply = state
        .orchestrator
        .create_payment(&request, &client_addr(&headers))
        .await?;
    Ok((StatusCode::CREATED, Json(reply)))
}

pub async fn checkout_data(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let data = state.orchestrator.checkout_data(&id).await?;
    Ok(Json(data))
}

pub async fn select_provider(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((id, method)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let outcome = state
        .orchestrator
        .select_provider(&id, &method, &client_addr(&headers))
        .await?;
    let body = match outcome {
        SelectionOutcome::Proceed(PaymentInstruction::Redirect { url }) => {
            json!({ "redirectUrl": url })
        }
        SelectionOutcome::Proceed(PaymentInstruction::QrCode { data }) => {
            json!({ "qrData": data })
        }
        SelectionOutcome::Declined { redirect_url } => {
            json!({ "redirectUrl": redirect_url, "declined": true })
        }
    };
    Ok(Json(body))
}

/// Terminal callback: replies with a 302 back to the merchant shop, whether
/// this call decided the outcome or merely replayed it.
pub async fn finalize(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<FinalizeRequest>,
) -> Result<Response, ApiError> {
    let reply = state
        .orchestrator
        .finalize(&request, &client_addr(&headers))
        .await?;
    Ok((
        StatusCode::FOUND,
        [(header::LOCATION, reply.redirect_url.clone())],
        Json(reply),
    )
        .into_response())
}

pub async fn order_status(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((merchant_id, order_id)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let secret = merchant_secret(&headers)?;
    let status = state
        .orchestrator
        .status_for_order(&merchant_id, &secret, &order_id, &client_addr(&headers))
        .await?;
    Ok(Json(json!({ "status": status })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelRequest {
    pub merchant_id: String,
    pub merchant_secret: String,
}

pub async fn cancel(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(request): Json<CancelRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let status = state
        .orchestrator
        .cancel(
            &request.merchant_id,
            &request.merchant_secret,
            &id,
            &client_addr(&headers),
        )
        .await?;
    Ok(Json(json!({ "status": status })))
}

fn merchant_secret(headers: &HeaderMap) -> Result<String, ApiError> {
    headers
        .get("x-merchant-secret")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string())
        .ok_or_else(|| {
            ApiError(AppError::Auth {
                message: "missing X-Merchant-Secret header".to_string(),
            })
        })
}
