//! Web server setup and routing

use anyhow::Result;
use axum::{
    routing::{get, put},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::api;
use crate::state::AppState;

/// Routes for the four filesystem callbacks
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/read/{*path}", get(api::read_file))
        .route("/api/write/{*path}", put(api::write_file))
        .route("/api/dir", get(api::list_root))
        .route("/api/dir/{*path}", get(api::list_dir))
        .route("/api/attr/{*path}", get(api::get_attr))
        .layer(TraceLayer::new_for_http())
        // CORS
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

/// Run the web server
pub async fn run(state: Arc<AppState>, bind: &str) -> Result<()> {
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!(address = %bind, protocol = "HTTP", "Starting web server");
    axum::serve(listener, app).await?;
    Ok(())
}
