//! Gateway liveness.
//!
//! # Design Decisions
//! - Liveness only: answers `UP` while the process serves requests
//! - Upstream health is not checked; a dead upstream shows up as 502s

use axum::Json;
use serde::Serialize;

/// Body of `GET /health`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthStatus {
    pub status: &'static str,
}

pub async fn health_handler() -> Json<HealthStatus> {
    Json(HealthStatus { status: "UP" })
}
