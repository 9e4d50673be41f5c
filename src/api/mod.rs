//! HTTP surface. Thin handlers over the orchestrator; every error maps to a
//! status through the error taxonomy, never by string matching.

mod payments;

use crate::error::AppError;
use crate::orchestrator::Orchestrator;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/payments/init", post(payments::create_payment))
        .route("/payments/finalize", post(payments::finalize))
        .route(
            "/payments/status/{merchant_id}/{order_id}",
            get(payments::order_status),
        )
        .route("/payments/{id}", get(payments::checkout_data))
        .route("/payments/{id}/cancel", post(payments::cancel))
        .route("/payments/{id}/{method}", post(payments::select_provider))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> &'static str {
    "OK"
}

/// Newtype so `AppError` can cross the axum boundary with its own mapping.
pub struct ApiError(pub AppError);

impl From<AppError> for ApiError {
    fn from(e: AppError) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = Json(json!({ "error": self.0.user_message() }));
        (status, body).into_response()
    }
}

/// Best-effort caller address for the audit trail.
pub(crate) fn client_addr(headers: &HeaderMap) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}
