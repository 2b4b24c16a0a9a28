//! Jockey lookup endpoints.

use axum::extract::{Query, State};
use axum::Json;
use chrono::Datelike;
use serde::Deserialize;

use crate::api::error::ApiError;
use crate::api::AppState;
use crate::db::jockey_queries;

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
    let pool = state.db()?;
    let jockeys = jockey_queries::search_jockeys(pool, params.name.trim(), limit).await?;

    // Attach current-year form to each hit
    let year = chrono::Utc::now().year();
    let mut enriched = Vec::with_capacity(jockeys.len());
    for jockey in jockeys {
        let stats = jockey_queries::jockey_annual_stats(pool, &jockey.kishu_code, year).await?;
        enriched.push(serde_json::json!({
            "kishu_code": jockey.kishu_code,
            "name": jockey.kishumei,
            "annual": stats,
        }));
    }

    Ok(Json(serde_json::json!({
        "count": enriched.len(),
        "jockeys": enriched,
    })))
}
