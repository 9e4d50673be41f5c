//! Unified error taxonomy for the orchestration engine.
//!
//! Every error carries enough context to be audit-logged and mapped to an
//! HTTP status without the caller inspecting message strings.

use thiserror::Error;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, Clone, Error)]
pub enum AppError {
    /// Malformed or missing request fields, rejected before any side effect.
    #[error("Validation error: {message}")]
    Validation {
        message: String,
        field: Option<String>,
    },

    /// Unknown merchant or bad credential.
    #[error("Authentication failed: {message}")]
    Auth { message: String },

    /// Natural-key collision on (merchant_id, merchant_order_id).
    #[error("Duplicate order {merchant_order_id} for merchant {merchant_id}")]
    DuplicateOrder {
        merchant_id: String,
        merchant_order_id: String,
    },

    /// A provider name no registry entry exists for.
    #[error("Unknown payment provider: {name}")]
    UnknownProvider { name: String },

    /// Discovery returned zero live instances. Not retried.
    #[error("No live instance of service {service}")]
    DownstreamUnavailable { service: String },

    /// A single failed call to a downstream service (timeout, transport,
    /// malformed body). Retried by the invoker up to the attempt budget.
    #[error("Downstream error from {service}: {message}")]
    Downstream {
        service: String,
        message: String,
        retryable: bool,
    },

    /// The invoker exhausted its attempt budget. Surfaced to the merchant
    /// flow as transaction ERROR, never as FAILED.
    #[error("Exhausted {attempts} attempt(s) against {service}: {last_error}")]
    ExhaustedRetries {
        service: String,
        attempts: u32,
        last_error: String,
    },

    /// The requested operation is not legal from the transaction's current
    /// lifecycle state.
    #[error("Transaction {transaction_id} is in state {status}, operation not allowed")]
    InvalidState {
        transaction_id: String,
        status: String,
    },

    #[error("Transaction not found: {transaction_id}")]
    NotFound { transaction_id: String },

    /// Transaction store failure.
    #[error("Store error: {message}")]
    Store { message: String },
}

impl AppError {
    pub fn validation(message: impl Into<String>, field: Option<&str>) -> Self {
        AppError::Validation {
            message: message.into(),
            field: field.map(|f| f.to_string()),
        }
    }

    pub fn store(message: impl std::fmt::Display) -> Self {
        AppError::Store {
            message: message.to_string(),
        }
    }

    /// Map to an HTTP status code for the API layer.
    pub fn status_code(&self) -> u16 {
        match self {
            AppError::Validation { .. } => 400,
            AppError::Auth { .. } => 401,
            AppError::DuplicateOrder { .. } => 409,
            AppError::UnknownProvider { .. } => 400,
            AppError::DownstreamUnavailable { .. } => 503,
            AppError::Downstream { .. } => 502,
            AppError::ExhaustedRetries { .. } => 502,
            AppError::InvalidState { .. } => 409,
            AppError::NotFound { .. } => 404,
            AppError::Store { .. } => 500,
        }
    }

    /// Whether the invoker may retry after this failure.
    pub fn is_retryable(&self) -> bool {
        match self {
            AppError::Downstream { retryable, .. } => *retryable,
            _ => false,
        }
    }

    /// Errors that must be raised on the audit chain as security alerts.
    pub fn is_security_alert(&self) -> bool {
        matches!(
            self,
            AppError::Auth { .. } | AppError::DownstreamUnavailable { .. }
        )
    }

    /// Message safe to return to an external caller.
    pub fn user_message(&self) -> String {
        match self {
            AppError::Validation { message, .. } => message.clone(),
            AppError::Auth { .. } => "Authentication failed".to_string(),
            AppError::DuplicateOrder {
                merchant_order_id, ..
            } => format!("Order {} already has a transaction", merchant_order_id),
            AppError::UnknownProvider { name } => format!("Unsupported payment method: {}", name),
            AppError::DownstreamUnavailable { .. } | AppError::Downstream { .. } => {
                "Payment service is temporarily unavailable".to_string()
            }
            AppError::ExhaustedRetries { .. } => {
                "Payment service did not respond. Please try again later".to_string()
            }
            AppError::InvalidState { status, .. } => {
                format!("Transaction is no longer open (state: {})", status)
            }
            AppError::NotFound { transaction_id } => {
                format!("Transaction {} not found", transaction_id)
            }
            AppError::Store { .. } => "Internal error. Please try again later".to_string(),
        }
    }
}
