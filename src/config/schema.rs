//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

/// Root configuration for the gateway.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GatewayConfig {
    /// Listener configuration (bind address).
    pub listener: ListenerConfig,

    /// Route definitions mapping public prefixes to upstream services.
    pub routes: Vec<RouteConfig>,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
        }
    }
}

/// A single upstream service exposed under a public prefix.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct RouteConfig {
    /// Route identifier for logging/metrics.
    pub name: String,

    /// Public path prefix owned by this upstream.
    pub match_prefix: String,

    /// Prefix the upstream expects in place of `match_prefix`.
    pub rewrite_prefix: String,

    /// Upstream base URL (e.g., "http://profile-service:8080").
    pub upstream: String,
}

impl RouteConfig {
    pub fn new(
        name: impl Into<String>,
        match_prefix: impl Into<String>,
        rewrite_prefix: impl Into<String>,
        upstream: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            match_prefix: match_prefix.into(),
            rewrite_prefix: rewrite_prefix.into(),
            upstream: upstream.into(),
        }
    }
}

/// Timeout configuration for upstream calls and shutdown.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Upstream connection establishment timeout in seconds.
    pub connect_secs: u64,

    /// Maximum silence while waiting for upstream headers or between body
    /// chunks, in seconds.
    pub idle_secs: u64,

    /// How long in-flight requests may drain after a shutdown signal.
    pub shutdown_grace_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_secs: 3,
            idle_secs: 30,
            shutdown_grace_secs: 30,
        }
    }
}
