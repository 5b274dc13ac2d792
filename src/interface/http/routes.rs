use std::path::Path;
use std::sync::Arc;

use axum::{routing::get, Router};
use tower_http::{cors::CorsLayer, services::ServeDir};

use crate::application::MonitoringService;

use super::handlers::{containers_handler, health_handler, AppState};
use super::socket::ws_handler;

pub fn create_router(monitoring_service: Arc<MonitoringService>, static_dir: &Path) -> Router {
    let state = AppState { monitoring_service };

    Router::new()
        // API routes
        .route("/api/health", get(health_handler))
        .route("/api/containers", get(containers_handler))
        // Live stats
        .route("/ws", get(ws_handler))
        // Display client
        .fallback_service(ServeDir::new(static_dir))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
