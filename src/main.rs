//! Profile-cell API gateway.
//!
//! A single public entry point in front of the profile-cell services, built
//! with Tokio and Axum.
//!
//! # Architecture Overview
//!
//! ```text
//!                    ┌──────────────────────────────────────────────┐
//!                    │                  GATEWAY                     │
//!   Client Request   │  ┌─────────┐    ┌─────────┐    ┌──────────┐  │
//!   ─────────────────┼─▶│  http   │───▶│ routing │───▶│  proxy   │──┼──▶ Upstream
//!                    │  │ server  │    │  table  │    │forwarder │  │    Service
//!   Client Response  │  │         │    └─────────┘    │          │  │
//!   ◀────────────────┼──│         │◀──────────────────│ (stream) │◀─┼───
//!                    │  └─────────┘                   └──────────┘  │
//!                    │                                              │
//!                    │  /health  /metrics  (served locally)         │
//!                    │                                              │
//!                    │  Cross-cutting: config, observability,       │
//!                    │  resilience (timeouts), lifecycle            │
//!                    └──────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use profile_gateway::config::load_config;
use profile_gateway::lifecycle::signals::wait_for_signal;
use profile_gateway::observability::logging::{init_logging, LogFormat};
use profile_gateway::routing::RouteTable;
use profile_gateway::{Gateway, Shutdown};

#[derive(Parser, Debug)]
#[command(name = "profile-gateway", version, about = "Profile-cell API gateway")]
struct Cli {
    /// Path to a TOML configuration file.
    #[arg(short, long, env = "GATEWAY_CONFIG")]
    config: Option<PathBuf>,

    /// Bind address, overriding file and environment.
    #[arg(short, long)]
    bind: Option<String>,

    /// Validate the configuration, print the route table and exit.
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    init_logging(LogFormat::from_env());
    let cli = Cli::parse();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "profile-gateway starting");

    let config = match load_config(cli.config.as_deref(), cli.bind.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "Invalid configuration");
            return ExitCode::FAILURE;
        }
    };

    tracing::info!(
        bind_address = %config.listener.bind_address,
        routes = config.routes.len(),
        connect_timeout_secs = config.timeouts.connect_secs,
        idle_timeout_secs = config.timeouts.idle_secs,
        "Configuration loaded"
    );

    if cli.check {
        return match RouteTable::new(&config.routes) {
            Ok(table) => {
                for route in table.routes() {
                    println!(
                        "{:<12} {} -> {}{}",
                        route.name(),
                        route.match_prefix(),
                        route.upstream().base(),
                        route.rewrite_prefix()
                    );
                }
                ExitCode::SUCCESS
            }
            Err(e) => {
                tracing::error!(error = %e, "Invalid route table");
                ExitCode::FAILURE
            }
        };
    }

    let gateway = match Gateway::start(&config).await {
        Ok(gateway) => gateway,
        Err(e) => {
            tracing::error!(error = %e, "Startup failed");
            return ExitCode::FAILURE;
        }
    };

    let shutdown = Shutdown::new();
    let serving = gateway.serve(&shutdown);
    tokio::pin!(serving);

    // Polled first so the server subscribes before any signal is sent.
    let served = tokio::select! {
        biased;
        served = &mut serving => served,
        _ = wait_for_signal() => {
            shutdown.trigger();
            serving.await
        }
    };

    match served {
        Ok(()) => {
            tracing::info!("Shutdown complete");
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(error = %e, "Gateway failed");
            ExitCode::FAILURE
        }
    }
}
