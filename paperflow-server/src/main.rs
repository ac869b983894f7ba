//! Paperflow Server
//!
//! Entry point for the paperflow job engine with configuration loading,
//! engine startup, and HTTP server startup.

use std::sync::Arc;

use tokio::net::TcpListener;

use paperflow_engine::{Coordinator, HandlerRegistry};
use paperflow_handlers::register_all_handlers;
use paperflow_server::app::build_router;
use paperflow_server::state::AppState;

mod cli;
mod config_helpers;
mod tracing_setup;

use cli::CliArgs;
use config_helpers::{engine_config_from_config, parse_bind_address};
use tracing_setup::install_tracing_from_config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();

    if args.help_requested {
        CliArgs::print_help();
        return Ok(());
    }

    // Resolve config path: CLI > environment variable
    let config_path = args
        .config_path
        .or_else(|| std::env::var("PAPERFLOW_CONFIG_PATH").ok());

    let config = paperflow_config::load_config(config_path.as_deref())?;
    paperflow_config::validate_config(&config)?;

    let _reload_handle = install_tracing_from_config(&config.logging);
    tracing::info!(config_path = ?config_path, "configuration loaded");

    let mut handlers = HandlerRegistry::new();
    register_all_handlers(&mut handlers);

    let engine = Coordinator::start(engine_config_from_config(&config), handlers);
    tracing::info!(
        convert_slots = config.workers.convert,
        export_slots = config.workers.export,
        ai_slots = config.workers.ai,
        "engine started"
    );

    let state = Arc::new(AppState::new(engine.clone()));
    let router = build_router(state);

    let addr = parse_bind_address(&config)?;
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, "listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown signal received");
        })
        .await?;

    // Stop worker pools; in-flight handler calls finish on their own.
    engine.shutdown();
    Ok(())
}
