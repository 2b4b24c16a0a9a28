//! Daily bias snapshot storage.
//!
//! One row per date in `daily_bias`, holding the within-day venue biases and
//! jockey day-form as a JSON blob produced by the bias analyzer job.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::collections::HashMap;

use crate::error::EngineResult;

/// Per-venue bias scalars for one race day.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VenueBias {
    #[serde(default)]
    pub waku_bias: f64,
    #[serde(default)]
    pub pace_bias: f64,
}

/// One jockey's win / top-3 record within the day so far.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JockeyDayForm {
    #[serde(default)]
    pub win_rate: f64,
    #[serde(default)]
    pub top3_rate: f64,
}

/// The full snapshot for one date.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BiasSnapshot {
    #[serde(default)]
    pub venue_biases: HashMap<String, VenueBias>,
    #[serde(default)]
    pub jockey_performances: HashMap<String, JockeyDayForm>,
}

/// Load the bias snapshot for a date, if one was computed.
pub async fn load_bias_snapshot(
    pool: &PgPool,
    date: NaiveDate,
) -> EngineResult<Option<BiasSnapshot>> {
    let row: Option<(serde_json::Value,)> = sqlx::query_as(
        "SELECT bias_data FROM daily_bias WHERE bias_date = $1 \
         ORDER BY created_at DESC LIMIT 1",
    )
    .bind(date)
    .fetch_optional(pool)
    .await?;

    match row {
        Some((value,)) => {
            let snapshot: BiasSnapshot = serde_json::from_value(value)
                .map_err(|e| crate::error::EngineError::Database(format!("bias_data: {}", e)))?;
            Ok(Some(snapshot))
        }
        None => Ok(None),
    }
}
