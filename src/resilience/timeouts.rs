//! Timeout enforcement.
//!
//! # Responsibilities
//! - Carry the connect and idle timeouts applied to every upstream call
//! - Enforce the idle timeout between body chunks of a stream
//! - Cancel operations cleanly on timeout
//!
//! # Design Decisions
//! - Uses Tokio's timeout facilities
//! - Timeout errors are distinct from other errors
//! - Timed-out requests return 504 Gateway Timeout

use std::time::Duration;

use axum::body::Bytes;
use axum::BoxError;
use futures_util::{Stream, StreamExt};
use thiserror::Error;

use crate::config::TimeoutConfig;

/// Deadlines for one upstream call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutPolicy {
    /// TCP connect to the upstream.
    pub connect: Duration,
    /// Longest silence while waiting for response headers, and between
    /// body chunks.
    pub idle: Duration,
}

impl From<&TimeoutConfig> for TimeoutPolicy {
    fn from(config: &TimeoutConfig) -> Self {
        Self {
            connect: Duration::from_secs(config.connect_secs),
            idle: Duration::from_secs(config.idle_secs),
        }
    }
}

impl Default for TimeoutPolicy {
    fn default() -> Self {
        Self::from(&TimeoutConfig::default())
    }
}

/// A body stream stayed silent for longer than the idle timeout.
#[derive(Debug, Clone, Copy, Error)]
#[error("body stream idle for more than {0:?}")]
pub struct IdleTimeout(pub Duration);

/// Wrap a chunk stream so that it fails with [`IdleTimeout`] when no chunk
/// arrives within `idle`. The stream ends after the first error.
pub fn with_idle_timeout<S, E>(
    stream: S,
    idle: Duration,
) -> impl Stream<Item = Result<Bytes, BoxError>> + Send + 'static
where
    S: Stream<Item = Result<Bytes, E>> + Send + Unpin + 'static,
    E: Into<BoxError>,
{
    futures_util::stream::unfold(Some(stream), move |state| async move {
        let mut stream = state?;
        let (item, next): (Result<Bytes, BoxError>, Option<S>) =
            match tokio::time::timeout(idle, stream.next()).await {
                Ok(Some(Ok(chunk))) => (Ok(chunk), Some(stream)),
                Ok(Some(Err(e))) => (Err(e.into()), None),
                Ok(None) => return None,
                Err(_) => (Err(IdleTimeout(idle).into()), None),
            };
        Some((item, next))
    })
}

/// Returns true if `err` or one of its sources is a timeout.
pub fn is_timeout(err: &(dyn std::error::Error + 'static)) -> bool {
    let mut current = Some(err);
    while let Some(e) = current {
        if e.is::<IdleTimeout>() || e.is::<tokio::time::error::Elapsed>() {
            return true;
        }
        if let Some(io) = e.downcast_ref::<std::io::Error>() {
            if io.kind() == std::io::ErrorKind::TimedOut {
                return true;
            }
        }
        current = e.source();
    }
    false
}
