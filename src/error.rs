//! # error
//!
//! Execution failures raised by the engine, and the HTTP error type the
//! monitor handlers return.  `AppError` converts into a structured JSON body
//! so dashboards always get a machine-readable response.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::engine::executor::SymbolState;
use crate::exchange::ExchangeError;

// ─── Execution ────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ExecutionError {
    /// A request arrived while another sequence is active on the symbol.
    #[error("{symbol} is already {state}; request rejected")]
    AlreadyActive { symbol: String, state: SymbolState },

    /// Programmer error: the request could never be valid.
    #[error("invalid intent: {0}")]
    InvalidIntent(String),

    #[error("no open position on {0}")]
    NoPosition(String),

    #[error("{step} failed: {source}")]
    Exchange {
        step:   &'static str,
        #[source]
        source: ExchangeError,
    },

    /// The exchange accepted the order but executed none of it.
    #[error("{step} on {symbol} was accepted but not filled")]
    Unfilled { step: &'static str, symbol: String },
}

impl ExecutionError {
    pub fn exchange(step: &'static str) -> impl FnOnce(ExchangeError) -> Self {
        move |source| ExecutionError::Exchange { step, source }
    }
}

// ─── HTTP ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    /// The exchange call behind the request failed.
    #[error("Upstream error: {0}")]
    Upstream(String),
}

impl From<ExecutionError> for AppError {
    fn from(err: ExecutionError) -> Self {
        match err {
            ExecutionError::InvalidIntent(msg) => AppError::BadRequest(msg),
            ExecutionError::NoPosition(_) => AppError::NotFound(err.to_string()),
            ExecutionError::AlreadyActive { .. } => AppError::Conflict(err.to_string()),
            ExecutionError::Exchange { .. } | ExecutionError::Unfilled { .. } => {
                AppError::Upstream(err.to_string())
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg.clone()),
            AppError::Upstream(msg) => (StatusCode::BAD_GATEWAY, msg.clone()),
        };

        let body = Json(json!({
            "ok":    false,
            "error": message,
        }));

        (status, body).into_response()
    }
}
