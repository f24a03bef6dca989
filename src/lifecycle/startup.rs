//! Startup orchestration.
//!
//! # Responsibilities
//! - Initialize subsystems from a validated configuration
//! - Bind the listener last, once everything else is ready
//! - Run the server until shutdown, bounded by the grace period
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Subsystems initialize in order, not concurrently
//! - Listeners start last (traffic only when ready)

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use metrics_exporter_prometheus::BuildError;
use thiserror::Error;
use tokio::net::TcpListener;

use crate::config::GatewayConfig;
use crate::http::GatewayServer;
use crate::lifecycle::shutdown::drain_within;
use crate::lifecycle::Shutdown;
use crate::observability::MetricsCollector;
use crate::routing::RouteTableError;

/// Errors that stop the gateway from starting or serving.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("failed to build metrics recorder: {0}")]
    Metrics(#[from] BuildError),

    #[error("invalid route table: {0}")]
    Routes(#[from] RouteTableError),

    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        source: std::io::Error,
    },

    #[error("server error: {0}")]
    Serve(#[from] std::io::Error),

    #[error("server task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// A gateway with its listener bound, ready to serve.
pub struct Gateway {
    server: GatewayServer,
    listener: TcpListener,
    grace: Duration,
}

impl Gateway {
    /// Build every subsystem from `config`, then bind the listener.
    pub async fn start(config: &GatewayConfig) -> Result<Self, StartupError> {
        let metrics = Arc::new(MetricsCollector::new()?);
        let server = GatewayServer::new(config, metrics)?;

        let address = config.listener.bind_address.clone();
        let listener = TcpListener::bind(&address)
            .await
            .map_err(|source| StartupError::Bind { address, source })?;

        Ok(Self {
            server,
            listener,
            grace: Duration::from_secs(config.timeouts.shutdown_grace_secs),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Serve until `shutdown` fires, then let in-flight requests drain for
    /// at most the grace period.
    pub async fn serve(self, shutdown: &Shutdown) -> Result<(), StartupError> {
        let mut stop = shutdown.subscribe();
        let mut server = tokio::spawn(self.server.run(self.listener, shutdown.subscribe()));

        tokio::select! {
            joined = &mut server => return Ok(joined??),
            _ = stop.recv() => {}
        }

        match drain_within(&mut server, self.grace).await {
            Some(joined) => Ok(joined??),
            None => {
                server.abort();
                Ok(())
            }
        }
    }
}
