//! Race lookup endpoints.

use axum::extract::{Path, Query, State};
use axum::Json;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::api::error::ApiError;
use crate::api::AppState;
use crate::db::race_queries;
use crate::models::{is_valid_race_code, race_code_venue, venue_name, RaceInfo, Surface};
use crate::predict::output::resolve_race_name;

#[derive(Debug, Serialize)]
pub struct RaceSummary {
    pub race_id: String,
    pub race_name: String,
    pub race_date: String,
    pub venue: String,
    pub race_number: String,
    pub start_time: String,
    pub distance_m: i64,
    pub surface: Option<Surface>,
    pub grade_code: String,
}

fn summarize(race: &RaceInfo) -> RaceSummary {
    RaceSummary {
        race_id: race.race_code.clone(),
        race_name: resolve_race_name(race),
        race_date: if race.kaisai_nen.len() == 4 && race.kaisai_gappi.len() == 4 {
            format!(
                "{}-{}-{}",
                race.kaisai_nen,
                &race.kaisai_gappi[..2],
                &race.kaisai_gappi[2..]
            )
        } else {
            String::new()
        },
        venue: venue_name(race_code_venue(&race.race_code)).to_string(),
        race_number: race.race_bango.trim_start_matches('0').to_string(),
        start_time: race.hasso_jikoku.clone(),
        distance_m: race.kyori.trim().parse().unwrap_or(0),
        surface: Surface::from_track_code(&race.track_code),
        grade_code: race.grade_code.clone(),
    }
}

#[derive(Debug, Serialize)]
pub struct RaceListResponse {
    pub races: Vec<RaceSummary>,
    pub count: usize,
}

fn list_response(races: Vec<RaceInfo>) -> Json<RaceListResponse> {
    let races: Vec<RaceSummary> = races.iter().map(summarize).collect();
    Json(RaceListResponse {
        count: races.len(),
        races,
    })
}

pub async fn today(State(state): State<AppState>) -> Result<Json<RaceListResponse>, ApiError> {
    let races = race_queries::races_today(state.db()?).await?;
    Ok(list_response(races))
}

#[derive(Debug, Deserialize)]
pub struct UpcomingQuery {
    pub days: Option<i64>,
}

pub async fn upcoming(
    Query(params): Query<UpcomingQuery>,
    State(state): State<AppState>,
) -> Result<Json<RaceListResponse>, ApiError> {
    let days = params.days.unwrap_or(7).clamp(1, 31);
    let races = race_queries::races_upcoming(state.db()?, days).await?;
    Ok(list_response(races))
}

pub async fn by_date(
    Path(date): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<RaceListResponse>, ApiError> {
    let date = NaiveDate::parse_from_str(&date, "%Y-%m-%d")
        .map_err(|_| ApiError::invalid_request("date must be YYYY-MM-DD"))?;
    let races = race_queries::races_by_date(state.db()?, date).await?;
    Ok(list_response(races))
}

pub async fn by_id(
    Path(race_id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if !is_valid_race_code(&race_id) {
        return Err(ApiError::invalid_request("race id must be 16 digits"));
    }
    let bundle = race_queries::get_race_bundle(state.db()?, &race_id)
        .await
        .map_err(|e| match e {
            crate::error::EngineError::MissingData(_) => ApiError::race_not_found(&race_id),
            other => other.into(),
        })?;

    let horses: Vec<serde_json::Value> = bundle
        .horses
        .iter()
        .filter(|h| h.horse_number() >= 1)
        .map(|h| {
            serde_json::json!({
                "horse_number": h.horse_number(),
                "post": h.wakuban.trim().parse::<u32>().unwrap_or(0),
                "kettonum": h.ketto_toroku_bango,
                "name": h.bamei.trim(),
                "age": h.barei.trim().parse::<u32>().ok(),
                "jockey": h.kishumei.trim(),
                "carried_weight": h.futan_juryo.trim().parse::<f64>().map(|w| w / 10.0).ok(),
                "body_weight": h.bataiju.trim().parse::<i64>().ok(),
                "declared_odds": h.tansho_odds.trim().parse::<f64>().map(|o| o / 10.0).ok(),
            })
        })
        .collect();

    Ok(Json(serde_json::json!({
        "race": summarize(&bundle.race),
        "horses": horses,
    })))
}

#[derive(Debug, Deserialize)]
pub struct NameQuery {
    pub q: String,
    pub limit: Option<i64>,
}

pub async fn search_by_name(
    Query(params): Query<NameQuery>,
    State(state): State<AppState>,
) -> Result<Json<RaceListResponse>, ApiError> {
    if params.q.trim().is_empty() {
        return Err(ApiError::invalid_request("query parameter q is required"));
    }
    let limit = params.limit.unwrap_or(20).clamp(1, 100);
    let races = race_queries::search_races_by_name(state.db()?, params.q.trim(), limit).await?;
    Ok(list_response(races))
}
