//! HTTP and WebSocket surface for the orchestrator.
//!
//! ```text
//! ┌──────────┐   HTTP   ┌───────────────────────────────────────────┐
//! │  Client  │ ───────> │  api.rs   (REST handlers, AppState)       │
//! │  (chat)  │ <─────── │  ws.rs    (one socket = one session)      │
//! └──────────┘ WebSocket│      │                                    │
//!                       │      v                                    │
//!                       │  Orchestrator (parse, dispatch, poll)     │
//!                       └───────────────────────────────────────────┘
//! ```

pub mod api;
pub mod ws;

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{Router, routing::get};
use tower_http::cors::CorsLayer;
use tracing::{error, info};

use crate::config::ChatopsConfig;
use crate::orchestrator::Orchestrator;
use crate::store::SqliteJobStore;

pub use api::{AppState, SharedState};

/// Build the full application router with API and WebSocket routes.
pub fn build_router(state: SharedState) -> Router {
    api::api_router()
        .route("/ws", get(ws::ws_handler))
        .with_state(state)
}

/// Start the server and block until Ctrl+C.
pub async fn start_server(config: &ChatopsConfig) -> Result<()> {
    let store = SqliteJobStore::open(&config.server.db_path)
        .with_context(|| format!("Failed to open job store at {}", config.server.db_path.display()))?;
    let orchestrator = Orchestrator::from_config(config, Arc::new(store))?;

    let state = Arc::new(AppState {
        orchestrator: orchestrator.clone(),
    });
    let mut app = build_router(state);
    if config.server.dev_mode {
        app = app.layer(CorsLayer::permissive());
    }

    let host = if config.server.dev_mode { "0.0.0.0" } else { "127.0.0.1" };
    let addr = format!("{}:{}", host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    let local_addr = listener.local_addr()?;
    info!(
        addr = %local_addr,
        executor = %orchestrator.executor_kind(),
        classifier = orchestrator.parser().has_classifier(),
        "chatops server listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    orchestrator.shutdown();
    info!("server shut down gracefully");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for Ctrl+C");
        std::future::pending::<()>().await;
    }
    info!("shutting down");
}
