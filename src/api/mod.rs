//! REST API surface: thin axum handlers over the engine and the store.

pub mod error;
pub mod horses;
pub mod jockeys;
pub mod odds;
pub mod predictions;
pub mod races;
pub mod stats;

use axum::routing::{get, post};
use axum::Router;
use sqlx::PgPool;
use std::sync::Arc;

use crate::api::error::ApiError;
use crate::model::ModelManager;
use crate::models::Config;
use crate::predict::PredictionService;

#[derive(Clone)]
pub struct AppState {
    pub pool: Option<PgPool>,
    pub config: Config,
    pub models: Arc<ModelManager>,
    pub predictions: Arc<PredictionService>,
}

impl AppState {
    pub fn db(&self) -> Result<&PgPool, ApiError> {
        self.pool
            .as_ref()
            .ok_or_else(|| ApiError::database("no database connection (mock mode)"))
    }
}

async fn health() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({ "status": "ok" }))
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/races/today", get(races::today))
        .route("/races/upcoming", get(races::upcoming))
        .route("/races/date/:date", get(races::by_date))
        .route("/races/search/name", get(races::search_by_name))
        .route("/races/:race_id", get(races::by_id))
        .route("/predictions", post(predictions::create).get(predictions::list))
        .route("/predictions/:prediction_id", get(predictions::by_id))
        .route("/horses/search", get(horses::search))
        .route("/horses/:kettonum", get(horses::by_id))
        .route("/jockeys/search", get(jockeys::search))
        .route("/odds/:race_id", get(odds::by_race))
        .route("/stats/calibration", get(stats::calibration))
        .with_state(state)
}
