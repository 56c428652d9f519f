//! HTTP error responses and process-level errors.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use tap_x402::{BridgeError, payment::AcceptSpec};
use thiserror::Error;

/// Failure that ends the server process.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Configuration or component construction failed.
    #[error(transparent)]
    Bridge(#[from] BridgeError),

    /// Listener could not be bound or the server stopped abnormally.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Error returned by a route handler.
///
/// Serialises as `{"success": false, "error": {"message", "code", "status"}}`. A
/// `402 Payment Required` also carries the accepted payment terms under `accepts`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiError {
    /// HTTP status.
    pub status: StatusCode,
    /// Stable machine-readable code.
    pub code: &'static str,
    /// Human-readable message.
    pub message: String,
    /// Payment terms for `402` responses.
    pub accepts: Option<AcceptSpec>,
}

impl ApiError {
    /// Creates an error without payment terms.
    #[allow(clippy::impl_trait_in_params, reason = "impl Into<String> is idiomatic for builder methods")]
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self { status, code, message: message.into(), accepts: None }
    }

    /// `402 Payment Required` advertising `accepts`.
    #[allow(clippy::impl_trait_in_params, reason = "impl Into<String> is idiomatic for builder methods")]
    pub fn payment_required(code: &'static str, message: impl Into<String>, accepts: AcceptSpec) -> Self {
        Self { accepts: Some(accepts), ..Self::new(StatusCode::PAYMENT_REQUIRED, code, message) }
    }

    /// `500 Internal Server Error`.
    pub fn internal(code: &'static str, error: &BridgeError) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, code, error.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut body = json!({
            "success": false,
            "error": {
                "message": self.message,
                "code": self.code,
                "status": self.status.as_u16(),
            },
        });
        if let Some(accepts) = self.accepts {
            body["accepts"] = json!([accepts]);
        }
        (self.status, Json(body)).into_response()
    }
}
