//! Prediction persistence.
//!
//! `(race_id, is_final)` is unique; re-running a prediction upserts the row
//! and the newest `predicted_at` wins.

use chrono::{DateTime, NaiveDate, Utc};
use sqlx::PgPool;

use crate::db::text;
use crate::error::{EngineError, EngineResult};
use crate::predict::output::PredictionResult;

/// A stored prediction row.
#[derive(Debug, Clone)]
pub struct StoredPrediction {
    pub prediction_id: String,
    pub race_id: String,
    pub race_date: NaiveDate,
    pub is_final: bool,
    pub result: PredictionResult,
    pub predicted_at: DateTime<Utc>,
}

/// Upsert a prediction result; returns the persisted prediction id.
pub async fn upsert_prediction(
    pool: &PgPool,
    prediction_id: &str,
    race_id: &str,
    race_date: NaiveDate,
    is_final: bool,
    result: &PredictionResult,
    predicted_at: DateTime<Utc>,
) -> EngineResult<String> {
    let payload = serde_json::to_value(result)?;

    let row: Option<(String,)> = sqlx::query_as(
        "INSERT INTO predictions ( \
             prediction_id, race_id, race_date, is_final, prediction_result, predicted_at \
         ) VALUES ($1, $2, $3, $4, $5, $6) \
         ON CONFLICT (race_id, is_final) DO UPDATE SET \
             prediction_result = EXCLUDED.prediction_result, \
             predicted_at = EXCLUDED.predicted_at \
         RETURNING prediction_id",
    )
    .bind(prediction_id)
    .bind(race_id)
    .bind(race_date)
    .bind(is_final)
    .bind(payload)
    .bind(predicted_at)
    .fetch_optional(pool)
    .await?;

    row.map(|(id,)| id)
        .ok_or_else(|| EngineError::Database("prediction upsert returned no row".to_string()))
}

pub async fn get_prediction_by_id(
    pool: &PgPool,
    prediction_id: &str,
) -> EngineResult<Option<StoredPrediction>> {
    let row = sqlx::query(
        "SELECT prediction_id, race_id, race_date, is_final, prediction_result, predicted_at \
         FROM predictions WHERE prediction_id = $1",
    )
    .bind(prediction_id)
    .fetch_optional(pool)
    .await?;

    row.map(|r| stored_from_row(&r)).transpose()
}

/// Prediction history for a race, newest first. `is_final = None` returns both.
pub async fn get_predictions_by_race(
    pool: &PgPool,
    race_id: &str,
    is_final: Option<bool>,
) -> EngineResult<Vec<StoredPrediction>> {
    let rows = match is_final {
        Some(flag) => {
            sqlx::query(
                "SELECT prediction_id, race_id, race_date, is_final, prediction_result, predicted_at \
                 FROM predictions WHERE race_id = $1 AND is_final = $2 \
                 ORDER BY predicted_at DESC",
            )
            .bind(race_id)
            .bind(flag)
            .fetch_all(pool)
            .await?
        }
        None => {
            sqlx::query(
                "SELECT prediction_id, race_id, race_date, is_final, prediction_result, predicted_at \
                 FROM predictions WHERE race_id = $1 \
                 ORDER BY predicted_at DESC",
            )
            .bind(race_id)
            .fetch_all(pool)
            .await?
        }
    };

    rows.iter().map(stored_from_row).collect()
}

fn stored_from_row(row: &sqlx::postgres::PgRow) -> EngineResult<StoredPrediction> {
    use sqlx::Row;

    let payload: serde_json::Value = row
        .try_get("prediction_result")
        .map_err(|e| EngineError::Database(e.to_string()))?;
    let result: PredictionResult = serde_json::from_value(payload)?;

    Ok(StoredPrediction {
        prediction_id: text(row, "prediction_id"),
        race_id: text(row, "race_id"),
        race_date: row
            .try_get("race_date")
            .map_err(|e| EngineError::Database(e.to_string()))?,
        is_final: row
            .try_get("is_final")
            .map_err(|e| EngineError::Database(e.to_string()))?,
        result,
        predicted_at: row
            .try_get("predicted_at")
            .map_err(|e| EngineError::Database(e.to_string()))?,
    })
}
