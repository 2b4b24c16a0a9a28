//! Calibration-statistics sidecar persistence.
//!
//! Each retrain writes one `model_calibration` row with the 20-bin pre/post
//! calibration statistics; exactly one row is active at a time.

use chrono::Utc;
use sqlx::PgPool;

use crate::error::EngineResult;

/// Deactivate previous rows and insert the new calibration stats as active.
pub async fn save_calibration_stats(
    pool: &PgPool,
    model_version: &str,
    stats: &serde_json::Value,
) -> EngineResult<()> {
    let mut tx = pool.begin().await?;

    sqlx::query("UPDATE model_calibration SET is_active = FALSE WHERE is_active = TRUE")
        .execute(&mut *tx)
        .await?;

    sqlx::query(
        "INSERT INTO model_calibration (model_version, calibration_data, created_at, is_active) \
         VALUES ($1, $2, $3, TRUE)",
    )
    .bind(model_version)
    .bind(stats)
    .bind(Utc::now())
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(())
}

/// The active calibration stats blob, if any.
pub async fn active_calibration_stats(
    pool: &PgPool,
) -> EngineResult<Option<(String, serde_json::Value)>> {
    let row: Option<(String, serde_json::Value)> = sqlx::query_as(
        "SELECT model_version, calibration_data FROM model_calibration \
         WHERE is_active = TRUE ORDER BY created_at DESC LIMIT 1",
    )
    .fetch_optional(pool)
    .await?;
    Ok(row)
}
