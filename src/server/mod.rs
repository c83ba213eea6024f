//! HTTP API: routing and request/response mapping over the analytics service.

pub mod errors;
pub mod routes;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::application::AnalyticsService;
use crate::config::LedgerSource;

/// Shared state behind every handler.
#[derive(Debug)]
pub struct AppState {
    pub service: Arc<AnalyticsService>,
    /// What `POST /reload` re-reads
    pub source: LedgerSource,
}

impl AppState {
    pub fn new(service: Arc<AnalyticsService>, source: LedgerSource) -> Self {
        Self { service, source }
    }
}

pub fn build_router(state: Arc<AppState>) -> Router {
    routes::router()
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve the API until Ctrl-C.
pub async fn serve(state: Arc<AppState>, bind: SocketAddr) -> Result<()> {
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("failed to bind {}", bind))?;

    tracing::info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server error")?;

    tracing::info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
}
