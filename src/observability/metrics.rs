//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define gateway metrics (requests, latency, in-flight, bytes)
//! - Render Prometheus text exposition for the `/metrics` endpoint
//! - Track per-route and per-upstream series
//!
//! # Metrics
//! - `requests_total` (counter): requests by route, upstream, outcome
//! - `request_duration_seconds` (histogram): start → response headers (or failure)
//! - `in_flight_requests` (gauge): requests currently forwarded, by route
//! - `request_bytes_total` / `response_bytes_total` (counter): body bytes streamed
//!
//! # Design Decisions
//! - One explicit collector object shared via `Arc`, no global recorder
//! - Low-overhead metric updates (atomic handles from the exporter)
//! - Rendering reads the atomics directly, increments are never blocked
//! - Unrouted requests land in the `unmatched` / `invalid` route buckets

use std::sync::Arc;
use std::time::{Duration, Instant};

use metrics::{Counter, Gauge, Key, Label, Level, Metadata, Recorder, Unit};
use metrics_exporter_prometheus::{
    BuildError, PrometheusBuilder, PrometheusHandle, PrometheusRecorder,
};

pub const REQUESTS_TOTAL: &str = "requests_total";
pub const REQUEST_DURATION_SECONDS: &str = "request_duration_seconds";
pub const IN_FLIGHT_REQUESTS: &str = "in_flight_requests";
pub const REQUEST_BYTES_TOTAL: &str = "request_bytes_total";
pub const RESPONSE_BYTES_TOTAL: &str = "response_bytes_total";

/// Route label used for requests no route matched.
pub const UNMATCHED_ROUTE: &str = "unmatched";
/// Route label used for requests rejected as malformed.
pub const INVALID_ROUTE: &str = "invalid";
/// Upstream label when no upstream was involved.
pub const NO_UPSTREAM: &str = "none";

/// Content type of the rendered exposition.
pub const CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Histogram buckets tuned for typical web latencies.
const LATENCY_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0,
];

fn metadata() -> Metadata<'static> {
    Metadata::new(module_path!(), Level::INFO, Some(module_path!()))
}

/// How a request ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    UpstreamError,
    Timeout,
    NoRoute,
    Invalid,
    InternalError,
    /// The client went away before response headers were relayed.
    Cancelled,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Success => "success",
            Outcome::UpstreamError => "upstream_error",
            Outcome::Timeout => "timeout",
            Outcome::NoRoute => "no_route",
            Outcome::Invalid => "invalid",
            Outcome::InternalError => "internal_error",
            Outcome::Cancelled => "cancelled",
        }
    }
}

/// Process-wide metrics aggregation.
///
/// Created once at startup and shared by every request task; never reset.
pub struct MetricsCollector {
    recorder: PrometheusRecorder,
    handle: PrometheusHandle,
}

impl MetricsCollector {
    pub fn new() -> Result<Self, BuildError> {
        let recorder = PrometheusBuilder::new()
            .set_buckets_for_metric(
                metrics_exporter_prometheus::Matcher::Full(REQUEST_DURATION_SECONDS.to_string()),
                LATENCY_BUCKETS,
            )?
            .build_recorder();
        let handle = recorder.handle();

        recorder.describe_counter(
            REQUESTS_TOTAL.into(),
            None,
            "Forwarded requests by route, upstream and outcome".into(),
        );
        recorder.describe_histogram(
            REQUEST_DURATION_SECONDS.into(),
            Some(Unit::Seconds),
            "Time from request start to upstream response headers".into(),
        );
        recorder.describe_gauge(
            IN_FLIGHT_REQUESTS.into(),
            None,
            "Requests currently being forwarded".into(),
        );
        recorder.describe_counter(
            REQUEST_BYTES_TOTAL.into(),
            Some(Unit::Bytes),
            "Request body bytes streamed to upstreams".into(),
        );
        recorder.describe_counter(
            RESPONSE_BYTES_TOTAL.into(),
            Some(Unit::Bytes),
            "Response body bytes streamed back to clients".into(),
        );

        Ok(Self { recorder, handle })
    }

    /// Start observing a forwarded request.
    ///
    /// The in-flight gauge is incremented now and decremented when the
    /// returned observation is dropped.
    pub fn observe(self: &Arc<Self>, route: &str, upstream: &str) -> RequestObservation {
        let in_flight = self.gauge(IN_FLIGHT_REQUESTS, vec![Label::new("route", route.to_string())]);
        in_flight.increment(1.0);

        RequestObservation {
            collector: Arc::clone(self),
            route: route.to_string(),
            upstream: upstream.to_string(),
            started: Instant::now(),
            in_flight,
            finished: false,
        }
    }

    /// Record a request that was answered without reaching any upstream.
    pub fn record_unrouted(&self, outcome: Outcome) {
        let route = match outcome {
            Outcome::Invalid => INVALID_ROUTE,
            _ => UNMATCHED_ROUTE,
        };
        self.counter(REQUESTS_TOTAL, request_labels(route, NO_UPSTREAM, Some(outcome)))
            .increment(1);
    }

    /// Counters for request and response body bytes of one route.
    pub fn byte_counters(&self, route: &str, upstream: &str) -> (Counter, Counter) {
        (
            self.counter(REQUEST_BYTES_TOTAL, request_labels(route, upstream, None)),
            self.counter(RESPONSE_BYTES_TOTAL, request_labels(route, upstream, None)),
        )
    }

    /// Render the Prometheus text exposition.
    pub fn render(&self) -> String {
        self.handle.render()
    }

    /// Drain histogram buffers; call periodically.
    pub fn run_upkeep(&self) {
        self.handle.run_upkeep();
    }

    fn record(&self, route: &str, upstream: &str, outcome: Outcome, elapsed: Duration) {
        self.counter(REQUESTS_TOTAL, request_labels(route, upstream, Some(outcome)))
            .increment(1);
        self.recorder
            .register_histogram(
                &Key::from_parts(REQUEST_DURATION_SECONDS, request_labels(route, upstream, None)),
                &metadata(),
            )
            .record(elapsed.as_secs_f64());
    }

    fn counter(&self, name: &'static str, labels: Vec<Label>) -> Counter {
        self.recorder
            .register_counter(&Key::from_parts(name, labels), &metadata())
    }

    fn gauge(&self, name: &'static str, labels: Vec<Label>) -> Gauge {
        self.recorder
            .register_gauge(&Key::from_parts(name, labels), &metadata())
    }
}

fn request_labels(route: &str, upstream: &str, outcome: Option<Outcome>) -> Vec<Label> {
    let mut labels = vec![
        Label::new("route", route.to_string()),
        Label::new("upstream", upstream.to_string()),
    ];
    if let Some(outcome) = outcome {
        labels.push(Label::new("outcome", outcome.as_str()));
    }
    labels
}

/// Guard tracking one forwarded request.
///
/// Decrements the in-flight gauge on drop, whatever the exit path. A request
/// dropped before [`finish`](Self::finish) is counted as cancelled.
pub struct RequestObservation {
    collector: Arc<MetricsCollector>,
    route: String,
    upstream: String,
    started: Instant,
    in_flight: Gauge,
    finished: bool,
}

impl RequestObservation {
    /// Record the outcome and latency. Only the first call counts.
    pub fn finish(&mut self, outcome: Outcome) -> Duration {
        let elapsed = self.started.elapsed();
        if !self.finished {
            self.finished = true;
            self.collector
                .record(&self.route, &self.upstream, outcome, elapsed);
        }
        elapsed
    }
}

impl Drop for RequestObservation {
    fn drop(&mut self) {
        if !self.finished {
            tracing::debug!(route = %self.route, "Request cancelled before completion");
            self.finish(Outcome::Cancelled);
        }
        self.in_flight.decrement(1.0);
    }
}

/// Read one sample value from a rendered exposition.
///
/// Labels are compared as a set, so their rendering order does not matter.
#[cfg(test)]
pub(crate) fn sample_value(exposition: &str, name: &str, labels: &[(&str, &str)]) -> Option<f64> {
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
