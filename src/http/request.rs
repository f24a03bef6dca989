//! Inbound request checks and request IDs.
//!
//! # Responsibilities
//! - Generate a unique request ID (UUID v4) when the client sent none
//! - Reject requests the gateway cannot route safely
//!
//! # Design Decisions
//! - Request ID added as early as possible for tracing
//! - Validation runs before routing, so a rejected request never reaches an upstream
//! - Paths are checked as received; nothing is decoded or normalized

use axum::http::header::HOST;
use axum::http::{HeaderName, Request};
use thiserror::Error;
use tower_http::request_id::{MakeRequestId, RequestId};
use uuid::Uuid;

pub const X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

/// Generates UUID v4 request IDs.
#[derive(Debug, Clone, Copy, Default)]
pub struct UuidRequestId;

impl MakeRequestId for UuidRequestId {
    fn make_request_id<B>(&mut self, _request: &Request<B>) -> Option<RequestId> {
        let id = Uuid::new_v4().to_string();
        id.parse().ok().map(RequestId::new)
    }
}

/// Read the request ID set by the request-id layer.
pub fn request_id<B>(request: &Request<B>) -> &str {
    request
        .headers()
        .get(X_REQUEST_ID)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("unknown")
}

/// Why a request was rejected before routing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MalformedRequest {
    #[error("request path must start with '/'")]
    PathNotRooted,

    #[error("request path contains a dot segment")]
    DotSegment,

    #[error("request path contains a NUL byte")]
    NulByte,

    #[error("request carries more than one Host header")]
    DuplicateHost,
}

/// Check that a request is safe to route.
///
/// Only the path is inspected. HTTP/2 requests and HTTP/1.1 absolute-form
/// targets carry a scheme and authority in the URI; both are accepted.
pub fn validate<B>(request: &Request<B>) -> Result<(), MalformedRequest> {
    let path = request.uri().path();
    if !path.starts_with('/') {
        return Err(MalformedRequest::PathNotRooted);
    }

    if path.contains("%00") {
        return Err(MalformedRequest::NulByte);
    }
    if path.split('/').any(is_dot_segment) {
        return Err(MalformedRequest::DotSegment);
    }

    if request.headers().get_all(HOST).iter().nth(1).is_some() {
        return Err(MalformedRequest::DuplicateHost);
    }

    Ok(())
}

fn is_dot_segment(segment: &str) -> bool {
    let decoded = segment.to_ascii_lowercase().replace("%2e", ".");
    decoded == "." || decoded == ".."
}
