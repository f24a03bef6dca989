//! Upstream request forwarding.
//!
//! # Responsibilities
//! - Build the outbound request (same method, rewritten URI, cleaned headers)
//! - Issue it over a pooled HTTP/1.1 client
//! - Enforce the connect and idle timeouts
//! - Hand back the upstream response with a streaming body
//!
//! # Design Decisions
//! - One attempt per request, no retries
//! - The wait for response headers is an idle wait: request body progress
//!   and the end of the request body both restart it
//! - Bodies are never buffered; both directions stream
//! - Failures are classified once, here, into unavailable or timeout

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::http::header::HOST;
use axum::http::{HeaderMap, HeaderValue, Request, Response, StatusCode, Version};
use hyper::body::Incoming;
use hyper_util::client::legacy::{connect::HttpConnector, Client, ResponseFuture};
use hyper_util::rt::TokioExecutor;
use metrics::Counter;
use thiserror::Error;

use crate::http::headers::{prepare_upstream_headers, strip_hop_by_hop};
use crate::proxy::body::{relay, ByteCount};
use crate::resilience::timeouts::is_timeout;
use crate::resilience::TimeoutPolicy;
use crate::routing::ResolvedRoute;

type HttpClient = Client<HttpConnector, Body>;

/// Why a forwarded call failed before response headers arrived.
#[derive(Debug, Error)]
pub enum ForwardError {
    #[error("upstream {upstream} unavailable: {source}")]
    Unavailable {
        upstream: String,
        #[source]
        source: hyper_util::client::legacy::Error,
    },

    #[error("upstream {upstream} timed out after {elapsed:?}")]
    Timeout { upstream: String, elapsed: Duration },

    #[error("cannot build upstream request: {0}")]
    InvalidTarget(String),
}

/// An upstream response ready to be relayed.
#[derive(Debug)]
pub struct ForwardResult {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Body,
    /// Time until response headers arrived.
    pub elapsed: Duration,
    pub bytes_sent: ByteCount,
    pub bytes_received: ByteCount,
}

/// Forwards requests to upstream services.
///
/// Holds the connection pool; one instance is shared by all request tasks.
pub struct ProxyForwarder {
    client: HttpClient,
    timeouts: TimeoutPolicy,
}

impl ProxyForwarder {
    pub fn new(timeouts: TimeoutPolicy) -> Self {
        let mut connector = HttpConnector::new();
        connector.set_connect_timeout(Some(timeouts.connect));
        connector.set_nodelay(true);

        let client = Client::builder(TokioExecutor::new())
            .pool_idle_timeout(Duration::from_secs(90))
            .build(connector);

        Self { client, timeouts }
    }

    /// Forward `request` to the upstream of `resolved`.
    ///
    /// `meters` are the request and response byte counters of the route.
    pub async fn forward(
        &self,
        resolved: &ResolvedRoute<'_>,
        request: Request<Body>,
        client_addr: Option<SocketAddr>,
        meters: (Counter, Counter),
    ) -> Result<ForwardResult, ForwardError> {
        let started = Instant::now();
        let upstream = resolved.route.upstream();
        let (sent_counter, received_counter) = meters;
        let bytes_sent = ByteCount::new(sent_counter);
        let bytes_received = ByteCount::new(received_counter);

        let (mut parts, body) = request.into_parts();

        // HTTP/2 clients send the authority in the URI, not in a Host header.
        if !parts.headers.contains_key(HOST) {
            if let Some(authority) = parts.uri.authority() {
                if let Ok(value) = HeaderValue::from_str(authority.as_str()) {
                    parts.headers.insert(HOST, value);
                }
            }
        }

        let uri = resolved
            .upstream_uri(parts.uri.query())
            .map_err(|e| ForwardError::InvalidTarget(e.to_string()))?;
        prepare_upstream_headers(
            &mut parts.headers,
            upstream.authority(),
            client_addr.map(|addr| addr.ip()),
        )
        .map_err(|e| ForwardError::InvalidTarget(e.to_string()))?;

        parts.uri = uri;
        // The upstream leg is always HTTP/1.1, whatever the client spoke.
        parts.version = Version::HTTP_11;

        let outbound = Request::from_parts(
            parts,
            relay(body, self.timeouts.idle, bytes_sent.clone()),
        );

        tracing::debug!(
            route = %resolved.route.name(),
            upstream = %upstream.authority(),
            uri = %outbound.uri(),
            "Forwarding request"
        );

        let pending = self.client.request(outbound);
        let response: Response<Incoming> = match self.wait_for_headers(pending, &bytes_sent).await {
            Some(Ok(response)) => response,
            Some(Err(e)) if !is_timeout(&e) => {
                return Err(ForwardError::Unavailable {
                    upstream: upstream.authority().to_string(),
                    source: e,
                })
            }
            Some(Err(_)) | None => {
                return Err(ForwardError::Timeout {
                    upstream: upstream.authority().to_string(),
                    elapsed: started.elapsed(),
                })
            }
        };

        let (mut parts, body) = response.into_parts();
        strip_hop_by_hop(&mut parts.headers);

        Ok(ForwardResult {
            status: parts.status,
            headers: parts.headers,
            body: relay(Body::new(body), self.timeouts.idle, bytes_received.clone()),
            elapsed: started.elapsed(),
            bytes_sent,
            bytes_received,
        })
    }

    /// Wait for the response headers of `pending`.
    ///
    /// Returns `None` once neither the upstream nor the request body made
    /// progress for the idle timeout.
    async fn wait_for_headers(
        &self,
        pending: ResponseFuture,
        bytes_sent: &ByteCount,
    ) -> Option<Result<Response<Incoming>, hyper_util::client::legacy::Error>> {
        tokio::pin!(pending);
        loop {
            tokio::select! {
                biased;
                result = &mut pending => return Some(result),
                () = bytes_sent.activity() => {}
                () = tokio::time::sleep(self.timeouts.idle) => return None,
            }
        }
    }
}

impl ForwardResult {
    /// Turn the result into a response for the client.
    pub fn into_response(self) -> axum::response::Response {
        let mut response = axum::response::Response::new(self.body);
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers;
        response
    }
}
