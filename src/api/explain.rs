use axum::{extract::State, response::Json};

use super::routes::{ApiError, AppState};
use crate::explain::{CounterfactualResult, SensitivityReport};
use crate::models::{
    CausalPathRequest, CausalPathResponse, CounterfactualRequest, GlobalExplainResponse,
    PerDecisionResponse, PredictRequest, SensitivityRequest,
};

pub async fn per_decision(
    State(state): State<AppState>,
    Json(req): Json<PredictRequest>,
) -> Result<Json<PerDecisionResponse>, ApiError> {
    Ok(Json(state.service.explain_per_decision(req).await?))
}

pub async fn global(
    State(state): State<AppState>,
    Json(req): Json<PredictRequest>,
) -> Result<Json<GlobalExplainResponse>, ApiError> {
    Ok(Json(state.service.explain_global(req).await?))
}

pub async fn causal_path(
    State(state): State<AppState>,
    Json(req): Json<CausalPathRequest>,
) -> Result<Json<CausalPathResponse>, ApiError> {
    Ok(Json(state.service.causal_paths(req).await?))
}

pub async fn counterfactual(
    State(state): State<AppState>,
    Json(req): Json<CounterfactualRequest>,
) -> Result<Json<CounterfactualResult>, ApiError> {
    Ok(Json(state.service.counterfactual(req).await?))
}

pub async fn sensitivity(
    State(state): State<AppState>,
    Json(req): Json<SensitivityRequest>,
) -> Result<Json<SensitivityReport>, ApiError> {
    Ok(Json(state.service.sensitivity(req).await?))
}
