//! HTTP server setup and request dispatch.
//!
//! # Responsibilities
//! - Create the Axum router: local endpoints plus the proxy fallback
//! - Wire up middleware (request ID, tracing, panic recovery)
//! - Validate, route and forward every other request
//! - Record one metrics sample per request
//! - Serve until the shutdown signal, then drain
//!
//! # Request states
//! ```text
//! Received → Routed → Forwarding → Completed
//!    │          │          └──────→ Failed (502 / 504 / 500)
//!    │          └─────────────────→ 404
//!    └────────────────────────────→ 400
//! ```

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{header, Request},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower::ServiceBuilder;
use tower_http::{
    catch_panic::CatchPanicLayer,
    request_id::{PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};

use crate::config::GatewayConfig;
use crate::health::health_handler;
use crate::http::request::{request_id, validate, UuidRequestId, X_REQUEST_ID};
use crate::http::response::{handle_panic, GatewayError};
use crate::observability::metrics::CONTENT_TYPE;
use crate::observability::{MetricsCollector, Outcome};
use crate::proxy::body::attach_guard;
use crate::proxy::{ForwardError, ProxyForwarder};
use crate::resilience::TimeoutPolicy;
use crate::routing::{RouteTable, RouteTableError};

pub const HEALTH_PATH: &str = "/health";
pub const METRICS_PATH: &str = "/metrics";

const UPKEEP_INTERVAL: Duration = Duration::from_secs(5);

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub routes: Arc<RouteTable>,
    pub forwarder: Arc<ProxyForwarder>,
    pub metrics: Arc<MetricsCollector>,
}

/// The gateway's HTTP server.
pub struct GatewayServer {
    state: AppState,
}

impl GatewayServer {
    /// Compile the route table and set up the forwarder.
    pub fn new(
        config: &GatewayConfig,
        metrics: Arc<MetricsCollector>,
    ) -> Result<Self, RouteTableError> {
        let routes = RouteTable::new(&config.routes)?;

        for route in routes.routes() {
            tracing::info!(
                route = %route.name(),
                match_prefix = %route.match_prefix(),
                rewrite_prefix = %route.rewrite_prefix(),
                upstream = %route.upstream().base(),
                "Route registered"
            );
        }
        for local in [HEALTH_PATH, METRICS_PATH] {
            if let Some(resolved) = routes.resolve(local) {
                tracing::warn!(
                    route = %resolved.route.name(),
                    path = local,
                    "Route prefix covers a local endpoint; the local endpoint is served instead"
                );
            }
        }

        let state = AppState {
            routes: Arc::new(routes),
            forwarder: Arc::new(ProxyForwarder::new(TimeoutPolicy::from(&config.timeouts))),
            metrics,
        };
        Ok(Self { state })
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Build the Axum router with all middleware layers.
    pub fn router(&self) -> Router {
        Router::new()
            .route(HEALTH_PATH, get(health_handler))
            .route(METRICS_PATH, get(metrics_handler))
            .fallback(proxy_handler)
            .with_state(self.state.clone())
            .layer(
                ServiceBuilder::new()
                    .layer(SetRequestIdLayer::new(X_REQUEST_ID, UuidRequestId))
                    .layer(TraceLayer::new_for_http().make_span_with(
                        |request: &Request<Body>| {
                            tracing::info_span!(
                                "request",
                                method = %request.method(),
                                uri = %request.uri(),
                                request_id = %request_id(request),
                            )
                        },
                    ))
                    .layer(PropagateRequestIdLayer::new(X_REQUEST_ID))
                    .layer(CatchPanicLayer::custom(handle_panic)),
            )
    }

    /// Serve on `listener` until `shutdown` fires, then drain open requests.
    pub async fn run(
        self,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            routes = self.state.routes.routes().len(),
            "Gateway listening"
        );

        let upkeep = spawn_upkeep(Arc::clone(&self.state.metrics));
        let app = self
            .router()
            .into_make_service_with_connect_info::<SocketAddr>();

        let served = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("Shutdown requested, draining in-flight requests");
            })
            .await;

        upkeep.abort();
        served?;
        tracing::info!("Gateway stopped");
        Ok(())
    }
}

fn spawn_upkeep(metrics: Arc<MetricsCollector>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(UPKEEP_INTERVAL);
        loop {
            interval.tick().await;
            metrics.run_upkeep();
        }
    })
}

async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    ([(header::CONTENT_TYPE, CONTENT_TYPE)], state.metrics.render())
}

/// Proxy handler for every path that is not a local endpoint.
async fn proxy_handler(State(state): State<AppState>, request: Request<Body>) -> Response {
    let client_addr = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let request_id = request_id(&request).to_string();

    if let Err(e) = validate(&request) {
        tracing::debug!(request_id = %request_id, error = %e, "Rejected malformed request");
        state.metrics.record_unrouted(Outcome::Invalid);
        return GatewayError::from(e).into_response();
    }

    let path = request.uri().path().to_string();
    let Some(resolved) = state.routes.resolve(&path) else {
        tracing::debug!(request_id = %request_id, path = %path, "No route matched");
        state.metrics.record_unrouted(Outcome::NoRoute);
        return GatewayError::NoRouteMatch { path }.into_response();
    };

    let route = resolved.route;
    let upstream = route.upstream().authority();
    let mut observation = state.metrics.observe(route.name(), upstream);
    let meters = state.metrics.byte_counters(route.name(), upstream);

    match state
        .forwarder
        .forward(&resolved, request, client_addr, meters)
        .await
    {
        Ok(result) => {
            let elapsed = observation.finish(Outcome::Success);
            tracing::debug!(
                request_id = %request_id,
                route = %route.name(),
                status = result.status.as_u16(),
                elapsed_ms = elapsed.as_millis() as u64,
                "Upstream responded"
            );
            let (parts, body) = result.into_response().into_parts();
            Response::from_parts(parts, attach_guard(body, observation))
        }
        Err(err) => {
            match &err {
                ForwardError::Unavailable { upstream, source } => tracing::warn!(
                    request_id = %request_id,
                    route = %route.name(),
                    upstream = %upstream,
                    error = ?source,
                    "Upstream unavailable"
                ),
                ForwardError::Timeout { upstream, elapsed } => tracing::warn!(
                    request_id = %request_id,
                    route = %route.name(),
                    upstream = %upstream,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Upstream timed out"
                ),
                ForwardError::InvalidTarget(detail) => tracing::error!(
                    request_id = %request_id,
                    route = %route.name(),
                    error = %detail,
                    "Failed to build upstream request"
                ),
            }
            let error = GatewayError::from(err);
            observation.finish(error.outcome());
            error.into_response()
        }
    }
}
