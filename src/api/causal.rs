use axum::{extract::State, response::Json};

use super::routes::{ApiError, AppState};
use crate::causal::MarkovBlanket;
use crate::models::{DiscoverRequest, DiscoverResponse, FeatureSelectRequest};

pub async fn discover(
    State(state): State<AppState>,
    Json(req): Json<DiscoverRequest>,
) -> Result<Json<DiscoverResponse>, ApiError> {
    Ok(Json(state.service.discover(req).await?))
}

/// Markov blanket of `target` in the discovered graph
pub async fn select_features(
    State(state): State<AppState>,
    Json(req): Json<FeatureSelectRequest>,
) -> Result<Json<MarkovBlanket>, ApiError> {
    Ok(Json(state.service.select_features(req).await?))
}
