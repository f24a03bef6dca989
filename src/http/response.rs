//! Gateway error responses.
//!
//! # Responsibilities
//! - Map gateway failures to HTTP status codes
//! - Render the shared JSON error body
//! - Answer panics with a generic 500
//!
//! # Design Decisions
//! - Upstream 4xx/5xx are not errors here; they are relayed verbatim
//! - Internal details are logged, never sent to the caller

use std::any::Any;
use std::time::Duration;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

use crate::http::request::MalformedRequest;
use crate::observability::Outcome;
use crate::proxy::ForwardError;

/// Failures the gateway answers on its own.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("malformed request: {0}")]
    MalformedRequest(#[from] MalformedRequest),

    #[error("no route matches {path}")]
    NoRouteMatch { path: String },

    #[error("upstream {upstream} unavailable")]
    UpstreamUnavailable { upstream: String },

    #[error("upstream {upstream} timed out after {elapsed:?}")]
    UpstreamTimeout { upstream: String, elapsed: Duration },

    #[error("internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::MalformedRequest(_) => StatusCode::BAD_REQUEST,
            GatewayError::NoRouteMatch { .. } => StatusCode::NOT_FOUND,
            GatewayError::UpstreamUnavailable { .. } => StatusCode::BAD_GATEWAY,
            GatewayError::UpstreamTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            GatewayError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn outcome(&self) -> Outcome {
        match self {
            GatewayError::MalformedRequest(_) => Outcome::Invalid,
            GatewayError::NoRouteMatch { .. } => Outcome::NoRoute,
            GatewayError::UpstreamUnavailable { .. } => Outcome::UpstreamError,
            GatewayError::UpstreamTimeout { .. } => Outcome::Timeout,
            GatewayError::Internal(_) => Outcome::InternalError,
        }
    }

    /// Message sent to the caller.
    fn public_message(&self) -> String {
        match self {
            GatewayError::MalformedRequest(e) => e.to_string(),
            GatewayError::NoRouteMatch { path } => format!("No route matches {path}"),
            GatewayError::UpstreamUnavailable { .. } => "Upstream service unavailable".to_string(),
            GatewayError::UpstreamTimeout { .. } => "Upstream service timed out".to_string(),
            GatewayError::Internal(_) => "Internal server error".to_string(),
        }
    }
}

impl From<ForwardError> for GatewayError {
    fn from(err: ForwardError) -> Self {
        match err {
            ForwardError::Unavailable { upstream, .. } => GatewayError::UpstreamUnavailable { upstream },
            ForwardError::Timeout { upstream, elapsed } => {
                GatewayError::UpstreamTimeout { upstream, elapsed }
            }
            ForwardError::InvalidTarget(detail) => GatewayError::Internal(detail),
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        error_response(self.status(), &self.public_message())
    }
}

/// `{"error": {"message": ..., "status": ...}}` with the given status.
pub fn error_response(status: StatusCode, message: &str) -> Response {
    let body = json!({
        "error": {
            "message": message,
            "status": status.as_u16(),
        }
    });
    (status, Json(body)).into_response()
}

/// Panic handler for `CatchPanicLayer`.
pub fn handle_panic(panic: Box<dyn Any + Send + 'static>) -> Response {
    let detail = panic
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| panic.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic");
    tracing::error!(panic = %detail, "Request handler panicked");
    GatewayError::Internal(detail.to_string()).into_response()
}
