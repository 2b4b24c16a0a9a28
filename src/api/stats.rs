//! Model diagnostics endpoints.

use axum::extract::State;
use axum::Json;

use crate::api::error::ApiError;
use crate::api::AppState;
use crate::db::calibration_store;

/// Active calibration bin statistics, as persisted by the last retrain.
pub async fn calibration(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let stats = calibration_store::active_calibration_stats(state.db()?).await?;
    match stats {
        Some((model_version, calibration_data)) => Ok(Json(serde_json::json!({
            "model_version": model_version,
            "calibration": calibration_data,
        }))),
        None => Ok(Json(serde_json::json!({
            "model_version": null,
            "calibration": null,
        }))),
    }
}
