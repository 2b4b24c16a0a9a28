//! Prediction endpoints.

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;
use std::time::Duration;

use crate::api::error::ApiError;
use crate::api::AppState;
use crate::predict::{PredictionHistoryItem, PredictionResponse};

const PREDICTION_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Deserialize)]
pub struct PredictionRequest {
    pub race_id: String,
    #[serde(default)]
    pub is_final: bool,
    pub bias_date: Option<String>,
}

pub async fn create(
    State(state): State<AppState>,
    Json(request): Json<PredictionRequest>,
) -> Result<Json<PredictionResponse>, ApiError> {
    let result = tokio::time::timeout(
        PREDICTION_TIMEOUT,
        state.predictions.generate_prediction(
            &request.race_id,
            request.is_final,
            request.bias_date.as_deref(),
        ),
    )
    .await
    .map_err(|_| ApiError::prediction_timeout())?;

    Ok(Json(result?))
}

pub async fn by_id(
    Path(prediction_id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<PredictionResponse>, ApiError> {
    state
        .predictions
        .get_prediction(&prediction_id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::prediction_not_found(&prediction_id))
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub race_id: String,
    pub is_final: Option<bool>,
}

pub async fn list(
    Query(params): Query<HistoryQuery>,
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let items: Vec<PredictionHistoryItem> = state
        .predictions
        .list_predictions(&params.race_id, params.is_final)
        .await?;
    Ok(Json(serde_json::json!({
        "race_id": params.race_id,
        "predictions": items,
    })))
}
