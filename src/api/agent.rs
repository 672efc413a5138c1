use axum::{
    extract::{Path, State},
    response::Json,
};

use super::routes::{ApiError, AppState};
use crate::models::{PredictRequest, PredictResponse, TrainRequest, TrainResponse};
use crate::store::ModelMetadata;

pub async fn train(
    State(state): State<AppState>,
    Json(req): Json<TrainRequest>,
) -> Result<Json<TrainResponse>, ApiError> {
    Ok(Json(state.service.train(req).await?))
}

pub async fn predict(
    State(state): State<AppState>,
    Json(req): Json<PredictRequest>,
) -> Result<Json<PredictResponse>, ApiError> {
    Ok(Json(state.service.predict(req).await?))
}

pub async fn model_metadata(
    State(state): State<AppState>,
    Path(model_id): Path<String>,
) -> Result<Json<ModelMetadata>, ApiError> {
    Ok(Json(state.service.model_metadata(&model_id).await?))
}
