mod config;
mod error;
mod export;
mod gemini;
mod generation;
mod models;
mod orchestrator;
mod routes;
mod validation;

use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::Config;
use crate::gemini::GeminiClient;
use crate::orchestrator::PlanOrchestrator;
use crate::routes::{router, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).init();

    let config = Config::from_env();
    tracing::info!(gemini = ?config.gemini, "Loaded configuration");
    if config.gemini.is_demo() {
        tracing::warn!("GEMINI_API_KEY not set, running in demo mode with canned plans and placeholder images");
    }

    let gemini = Arc::new(GeminiClient::new(config.gemini.clone()).context("failed to build HTTP client")?);
    let state = AppState {
        orchestrator: Arc::new(PlanOrchestrator::new(gemini.clone(), gemini)),
    };

    let addr = config.addr();
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!(%addr, "Starting server");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
