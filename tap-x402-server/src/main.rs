//! TAP/x402 gateway.
//!
//! Serves the local agent key registry and signing endpoints, and a paid MCP execute
//! route that verifies TAP signatures, enforces the price cap, verifies and settles
//! the `X-PAYMENT` assertion, and forwards the tool call with its commitments.
//!
//! # Configuration
//!
//! An optional TOML file is read from the first argument or `CONFIG`, then overlaid
//! with environment variables (see `GatewayConfig::apply_env`). `LOG_FORMAT` and
//! `RUST_LOG` control logging.

#![allow(
    clippy::multiple_crate_versions,
    reason = "transitive dependencies from axum and reqwest"
)]

mod error;
mod observability;
mod routes;
mod state;

use std::{process::ExitCode, sync::Arc};

use tap_x402::config::GatewayConfig;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::{
    error::ServerError,
    observability::{LogFormat, init_observability},
    state::AppState,
};

#[tokio::main]
async fn main() -> ExitCode {
    init_observability(LogFormat::from_env());

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "gateway stopped");
            ExitCode::FAILURE
        }
    }
}

fn load_config() -> Result<GatewayConfig, ServerError> {
    let path = std::env::args().nth(1).or_else(|| std::env::var("CONFIG").ok());
    let mut config = match path {
        Some(path) => {
            info!(%path, "loading configuration");
            GatewayConfig::from_file(&path)?
        }
        None => GatewayConfig::default(),
    };
    config.apply_env()?;
    Ok(config)
}

async fn run() -> Result<(), ServerError> {
    let config = load_config()?;
    let shutdown = CancellationToken::new();

    let guard = Arc::new(config.tap.replay_guard());
    let sweeper = guard.spawn_sweeper(config.tap.sweep_interval(), shutdown.child_token());

    let state = AppState::from_config(&config, guard, shutdown.clone())?;
    if let Some(agent) = &state.agent {
        info!(key_id = agent.key_id(), algorithm = %agent.algorithm(), "local agent key loaded");
    }
    let app = routes::router(Arc::new(state));

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    info!(
        bind = %config.server.bind,
        facilitator = %config.facilitator.base_url,
        mcp = %config.server.mcp_url,
        tap_required = config.tap.required,
        "gateway listening"
    );

    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal(shutdown.clone())).await?;

    shutdown.cancel();
    if sweeper.await.is_err() {
        error!("nonce sweeper panicked");
    }
    info!("gateway stopped cleanly");
    Ok(())
}

/// Resolves on Ctrl-C and cancels in-flight facilitator calls.
async fn shutdown_signal(shutdown: CancellationToken) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for shutdown signal");
    }
    info!("shutdown requested");
    shutdown.cancel();
}
