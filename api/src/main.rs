use anyhow::{Context, Result};
use axum::{
    routing::{get, post},
    Router,
};
use shared::Config;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::EnvFilter;

mod handlers;
mod state;

use state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Starting StrategyFlow API server...");

    let config = Config::from_env()?;
    let state = AppState::new(&config).await?;

    let app = Router::new()
        .route("/health", get(handlers::health_check))
        .route("/version", get(handlers::version))
        .route("/api/v1/workflows/sync-all", post(handlers::sync_all))
        .route(
            "/api/v1/strategies/:id/workflow/sync",
            post(handlers::sync_workflow),
        )
        .route(
            "/api/v1/strategies/:id/workflow/rebuild",
            post(handlers::rebuild_workflow),
        )
        .route(
            "/api/v1/strategies/:id/workflow/activate",
            post(handlers::activate_workflow),
        )
        .route(
            "/api/v1/strategies/:id/workflow/deactivate",
            post(handlers::deactivate_workflow),
        )
        .route(
            "/api/v1/strategies/:id/workflow/diff",
            get(handlers::workflow_diff),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(&config.api_bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.api_bind_addr))?;
    info!("API server listening on http://{}", config.api_bind_addr);

    axum::serve(listener, app).await?;

    Ok(())
}
