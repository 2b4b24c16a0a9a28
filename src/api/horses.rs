//! Horse lookup endpoints.

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;

use crate::api::error::ApiError;
use crate::api::AppState;
use crate::db::horse_queries::{self, HorseMaster};

pub async fn by_id(
    Path(kettonum): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<HorseMaster>, ApiError> {
    horse_queries::get_horse(state.db()?, &kettonum)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::horse_not_found(&kettonum))
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub name: String,
    pub limit: Option<i64>,
}

pub async fn search(
    Query(params): Query<SearchQuery>,
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if params.name.trim().is_empty() {
        return Err(ApiError::invalid_request("query parameter name is required"));
    }
    let limit = params.limit.unwrap_or(20).clamp(1, 100);
    let horses = horse_queries::search_horses(state.db()?, params.name.trim(), limit).await?;
    Ok(Json(serde_json::json!({
        "count": horses.len(),
        "horses": horses,
    })))
}
