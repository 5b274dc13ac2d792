use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use tracing::error;

use crate::application::MonitoringService;
use crate::domain::ContainerSummary;
use crate::ports::RuntimeError;

/// Error type that renders as `{"error": ...}` with a 500
#[derive(Debug)]
pub struct AppError(String);

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({ "error": self.0 })),
        )
            .into_response()
    }
}

impl From<RuntimeError> for AppError {
    fn from(err: RuntimeError) -> Self {
        AppError(format!("Failed to get containers: {}", err))
    }
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub monitoring_service: Arc<MonitoringService>,
}

/// Handler for GET /api/health
pub async fn health_handler(State(state): State<AppState>) -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::OK,
        Json(serde_json::json!({
            "status": "healthy",
            "service": "statstream",
            "activeStreams": state.monitoring_service.registry().active_streams(),
        })),
    )
}

/// Handler for GET /api/containers
pub async fn containers_handler(
    State(state): State<AppState>,
) -> Result<Json<Vec<ContainerSummary>>, AppError> {
    let containers = state.monitoring_service.get_containers().await.map_err(|e| {
        error!("Error listing containers: {}", e);
        AppError::from(e)
    })?;
    Ok(Json(containers))
}
