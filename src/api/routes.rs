//! HTTP router and server startup.

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::agent::Agent;
use crate::config::Config;

use super::generate;

/// Shared application state.
pub struct AppState {
    pub config: Config,
    pub agent: Arc<Agent>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let agent = Arc::new(Agent::new(&config));
        Self { config, agent }
    }

    /// State with a caller-supplied agent (useful for testing).
    pub fn with_agent(config: Config, agent: Arc<Agent>) -> Self {
        Self { config, agent }
    }
}

/// Build the API router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/health", get(generate::health))
        .route("/api/generate", post(generate::generate))
        .route("/api/generate/stream", post(generate::generate_stream))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Start the HTTP server.
pub async fn serve(config: Config) -> anyhow::Result<()> {
    tokio::fs::create_dir_all(&config.output_root).await?;

    let addr = format!("{}:{}", config.host, config.port);
    let state = Arc::new(AppState::new(config));
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", addr);
    axum::serve(listener, app).await?;

    Ok(())
}
