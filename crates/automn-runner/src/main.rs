// SPDX-License-Identifier: MIT OR Apache-2.0
//! Runner agent binary: loads configuration, wires up the registration
//! manager and execution engine, and serves the HTTP surface.

use automn_runner::http::build_router;
use automn_runner::state::AppState;
use clap::Parser;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "automn-runner", about = "Automn script-execution runner agent")]
struct Cli {
    /// Path to a TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Enable verbose debug-level logging instead of the quiet default.
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.debug { "automn=debug" } else { "automn=info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)))
        .init();
    let env: BTreeMap<String, String> = std::env::vars().collect();
    let (config, warnings) = automn_config::load_config(cli.config.as_deref(), &env)?;
    for warning in &warnings {
        tracing::warn!(%warning, "configuration warning");
    }

    let port = config.port;
    let state = std::sync::Arc::new(AppState::new(config).await);

    let registration = state.registration.clone();
    tokio::spawn(async move {
        registration.register_with_retry().await;
    });
    let heartbeat_registration = state.registration.clone();
    tokio::spawn(async move {
        heartbeat_registration.run_heartbeat_loop().await;
    });

    let app = build_router(state);
    let addr = format!("0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "runner agent listening");
    axum::serve(listener, app).await?;
    Ok(())
}
