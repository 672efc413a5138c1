use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde_json::json;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use super::{agent, causal, explain};
use crate::error::EngineError;
use crate::models::HealthResponse;
use crate::service::DecisionService;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<DecisionService>,
}

/// Create the API router
pub fn create_router(service: Arc<DecisionService>) -> Router {
    let state = AppState { service };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(root))
        .route("/health", get(health_check))
        .route("/causal/discover", post(causal::discover))
        .route("/features/select", post(causal::select_features))
        .route("/agent/train", post(agent::train))
        .route("/agent/predict", post(agent::predict))
        .route("/agent/models/:model_id", get(agent::model_metadata))
        .route("/explain/perdecision", post(explain::per_decision))
        .route("/explain/global", post(explain::global))
        .route("/explain/causalpath", post(explain::causal_path))
        .route("/explain/counterfactual", post(explain::counterfactual))
        .route("/explain/sensitivity", post(explain::sensitivity))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

// ===== Route Handlers =====

async fn root() -> Json<serde_json::Value> {
    Json(json!({
        "message": "TCARP backend is running",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Health check endpoint
async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse::ok())
}

// ===== Error Handling =====

#[derive(Debug)]
pub struct ApiError(pub EngineError);

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        ApiError(err)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            EngineError::Validation(_) | EngineError::UnknownFeature(_) => StatusCode::BAD_REQUEST,
            EngineError::InsufficientData(_) => StatusCode::UNPROCESSABLE_ENTITY,
            EngineError::ModelNotFound(_) => StatusCode::NOT_FOUND,
            EngineError::SymbolMismatch { .. } => StatusCode::CONFLICT,
            EngineError::MarketData(_) => StatusCode::BAD_GATEWAY,
            EngineError::Discovery(_)
            | EngineError::AttributionShortfall { .. }
            | EngineError::Storage(_)
            | EngineError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(kind = self.0.kind(), "Request failed: {}", self.0);
        } else {
            tracing::debug!(kind = self.0.kind(), "Request rejected: {}", self.0);
        }

        let body = Json(json!({
            "error": self.0.kind(),
            "message": self.0.to_string(),
        }));

        (status, body).into_response()
    }
}
