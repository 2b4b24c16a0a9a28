//! Pre-race odds endpoint.

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;

use crate::api::error::ApiError;
use crate::api::AppState;
use crate::db::odds_queries;
use crate::models::{is_valid_race_code, TicketType};

#[derive(Debug, Deserialize)]
pub struct OddsQuery {
    pub ticket_type: Option<String>,
}

pub async fn by_race(
    Path(race_id): Path<String>,
    Query(params): Query<OddsQuery>,
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if !is_valid_race_code(&race_id) {
        return Err(ApiError::invalid_request("race id must be 16 digits"));
    }
    let raw_type = params.ticket_type.as_deref().unwrap_or("win");
    let ticket_type = TicketType::parse(raw_type).ok_or_else(|| {
        ApiError::invalid_request(format!("unsupported ticket type: {}", raw_type))
    })?;

    let odds = odds_queries::get_odds(state.db()?, &race_id, ticket_type).await?;
    Ok(Json(serde_json::json!({
        "race_id": race_id,
        "ticket_type": ticket_type.as_str(),
        "count": odds.len(),
        "odds": odds,
    })))
}
