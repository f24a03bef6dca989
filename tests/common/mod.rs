//! Shared utilities for integration tests: an in-process gateway and mock
//! upstream services.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderMap, Request, StatusCode};
use axum::response::IntoResponse;
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use profile_gateway::config::{GatewayConfig, RouteConfig, TimeoutConfig};
use profile_gateway::observability::metrics::{IN_FLIGHT_REQUESTS, REQUESTS_TOTAL};
use profile_gateway::observability::MetricsCollector;
use profile_gateway::{GatewayServer, Shutdown};

/// A gateway serving on an ephemeral port.
pub struct TestGateway {
    pub addr: SocketAddr,
    pub metrics: Arc<MetricsCollector>,
    shutdown: Shutdown,
}

impl TestGateway {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn in_flight(&self, route: &str) -> f64 {
        sample_value(&self.metrics.render(), IN_FLIGHT_REQUESTS, &[("route", route)]).unwrap_or(0.0)
    }

    pub fn requests(&self, route: &str, upstream: &str, outcome: &str) -> f64 {
        sample_value(
            &self.metrics.render(),
            REQUESTS_TOTAL,
            &[("route", route), ("upstream", upstream), ("outcome", outcome)],
        )
        .unwrap_or(0.0)
    }

    /// Poll until the in-flight gauge of `route` reaches `expected`.
    pub async fn wait_for_in_flight(&self, route: &str, expected: f64) -> bool {
        self.wait_for_in_flight_within(route, expected, Duration::from_secs(3))
            .await
    }

    /// Like [`wait_for_in_flight`](Self::wait_for_in_flight), giving up after `limit`.
    pub async fn wait_for_in_flight_within(&self, route: &str, expected: f64, limit: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + limit;
        loop {
            if self.in_flight(route) == expected {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

/// Read one sample value from a rendered exposition.
///
/// Labels are compared as a set, so their rendering order does not matter.
pub fn sample_value(exposition: &str, name: &str, labels: &[(&str, &str)]) -> Option<f64> {
    let mut expected = labels.to_vec();
    expected.sort_unstable();

    exposition
        .lines()
        .filter(|line| !line.starts_with('#'))
        .find_map(|line| {
            let (series, value) = line.rsplit_once(' ')?;
            let (series_name, rendered) = match series.split_once('{') {
                Some((series_name, rest)) => (series_name, rest.strip_suffix('}')?),
                None => (series, ""),
            };
            if series_name != name {
                return None;
            }

            let mut found: Vec<(&str, &str)> = rendered
                .split("\",")
                .filter(|pair| !pair.is_empty())
                .filter_map(|pair| {
                    let (key, value) = pair.split_once("=\"")?;
                    Some((key, value.trim_end_matches('"')))
                })
                .collect();
            found.sort_unstable();

            if found == expected {
                value.trim().parse().ok()
            } else {
                None
            }
        })
}

impl Drop for TestGateway {
    fn drop(&mut self) {
        self.shutdown.trigger();
    }
}

pub async fn start_gateway(routes: Vec<RouteConfig>) -> TestGateway {
    start_gateway_with_timeouts(routes, TimeoutConfig::default()).await
}

pub async fn start_gateway_with_timeouts(
    routes: Vec<RouteConfig>,
    timeouts: TimeoutConfig,
) -> TestGateway {
    let config = GatewayConfig {
        routes,
        timeouts,
        ..GatewayConfig::default()
    };
    let metrics = Arc::new(MetricsCollector::new().unwrap());
    let server = GatewayServer::new(&config, Arc::clone(&metrics)).unwrap();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = Shutdown::new();
    tokio::spawn(server.run(listener, shutdown.subscribe()));

    TestGateway {
        addr,
        metrics,
        shutdown,
    }
}

/// Serve `app` on an ephemeral port.
pub async fn spawn_app(app: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    addr
}

/// Address that refuses connections.
pub async fn closed_port() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr
}

/// Upstream that answers with a JSON description of what it received.
pub struct EchoUpstream {
    pub addr: SocketAddr,
    pub hits: Arc<AtomicUsize>,
}

impl EchoUpstream {
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

pub async fn start_echo_upstream() -> EchoUpstream {
    let hits = Arc::new(AtomicUsize::new(0));
    let app = Router::new()
        .fallback(echo_handler)
        .with_state(Arc::clone(&hits));
    EchoUpstream {
        addr: spawn_app(app).await,
        hits,
    }
}

async fn echo_handler(State(hits): State<Arc<AtomicUsize>>, request: Request<Body>) -> Json<Value> {
    hits.fetch_add(1, Ordering::SeqCst);
    let (parts, body) = request.into_parts();
    let body = axum::body::to_bytes(body, usize::MAX).await.unwrap_or_default();
    Json(json!({
        "method": parts.method.as_str(),
        "uri": parts.uri.to_string(),
        "headers": header_values(&parts.headers),
        "body_len": body.len(),
    }))
}

fn header_values(headers: &HeaderMap) -> BTreeMap<String, Vec<String>> {
    let mut values: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (name, value) in headers {
        values
            .entry(name.as_str().to_string())
            .or_default()
            .push(value.to_str().unwrap_or_default().to_string());
    }
    values
}

/// Upstream that always answers `status` with `body`.
pub async fn start_fixed_upstream(status: StatusCode, body: &'static str) -> SocketAddr {
    let app = Router::new().fallback(move || async move { (status, body).into_response() });
    spawn_app(app).await
}

/// Upstream that waits `delay` before answering.
pub async fn start_slow_upstream(delay: Duration) -> SocketAddr {
    let app = Router::new().fallback(move || async move {
        tokio::time::sleep(delay).await;
        "finally"
    });
    spawn_app(app).await
}

/// Send a raw HTTP/1.1 request head, then `chunks` as a chunked body, one
/// every `pace`, and read until the server closes.
pub async fn raw_chunked_request(
    addr: SocketAddr,
    head: &str,
    chunks: &[&[u8]],
    pace: Duration,
) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(head.as_bytes()).await.unwrap();
    for chunk in chunks {
        tokio::time::sleep(pace).await;
        stream
            .write_all(format!("{:x}\r\n", chunk.len()).as_bytes())
            .await
            .unwrap();
        stream.write_all(chunk).await.unwrap();
        stream.write_all(b"\r\n").await.unwrap();
    }
    stream.write_all(b"0\r\n\r\n").await.unwrap();

    let mut response = Vec::new();
    let _ = tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut response)).await;
    String::from_utf8_lossy(&response).into_owned()
}

/// Send a raw HTTP/1.1 request and read until the server closes.
pub async fn raw_request(addr: SocketAddr, request: &str) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(request.as_bytes()).await.unwrap();
    let mut response = Vec::new();
    let _ = tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut response)).await;
    String::from_utf8_lossy(&response).into_owned()
}
