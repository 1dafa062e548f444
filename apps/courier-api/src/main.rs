//! Courier API Server - contact/list mailing backend
//!
//! Provides REST endpoints for:
//! - Immediate transactional email sending
//! - Scheduled (deferred) email lifecycle: create, list, edit, cancel
//! - Send history
//!
//! A single background dispatcher polls the scheduled-email queue and works
//! off due jobs; see `courier-core`.

use anyhow::Result;
use axum::{
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use courier_core::Dispatcher;

mod config;
mod error;
mod extract;
mod handlers;
mod models;
mod state;

use config::ApiConfig;
use state::AppState;

fn app_router(state: Arc<AppState>) -> Router {
    // CORS configuration for web clients
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Health check
        .route("/health", get(handlers::health))
        // Immediate send
        .route("/api/emails/send", post(handlers::send_email))
        // Scheduled email lifecycle
        .route("/api/emails/schedule", post(handlers::schedule_email))
        .route("/api/emails/scheduled", get(handlers::list_scheduled))
        .route(
            "/api/emails/scheduled/:id",
            get(handlers::get_scheduled).put(handlers::edit_scheduled),
        )
        .route(
            "/api/emails/scheduled/:id/cancel",
            post(handlers::cancel_scheduled),
        )
        // Send history
        .route("/api/emails/history", get(handlers::list_history))
        // Add middleware
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("courier_api=info".parse()?)
                .add_directive("courier_core=info".parse()?)
                .add_directive("tower_http=debug".parse()?),
        )
        .init();

    let config = ApiConfig::from_env();

    info!("Initializing Courier API...");
    let state = Arc::new(AppState::new(&config).await?);

    // The one dispatcher instance for this process.
    let dispatcher = Dispatcher::new(
        state.db.clone(),
        state.transport.clone(),
        state.http.clone(),
        config.dispatcher_config(),
    );
    let dispatcher = dispatcher.start();

    let app = app_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    info!("Starting Courier API on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Let an in-flight poll cycle finish before exiting.
    dispatcher.shutdown().await;

    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("Shutdown signal received");
}
