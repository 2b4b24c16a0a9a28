//! Jockey master queries and annual aggregates.

use serde::Serialize;
use sqlx::postgres::PgRow;
use sqlx::PgPool;

use crate::db::{opt_i64, text};
use crate::error::EngineResult;

#[derive(Debug, Clone, Serialize)]
pub struct JockeyMaster {
    pub kishu_code: String,
    pub kishumei: String,
    pub shozoku: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct JockeyAnnualStats {
    pub kishu_code: String,
    pub rides: i64,
    pub wins: i64,
    pub places: i64,
    pub win_rate: f64,
    pub place_rate: f64,
}

fn jockey_from_row(row: &PgRow) -> JockeyMaster {
    JockeyMaster {
        kishu_code: text(row, "kishu_code"),
        kishumei: text(row, "kishumei_ryakusho"),
        shozoku: text(row, "shozoku_code"),
    }
}

pub async fn search_jockeys(
    pool: &PgPool,
    name: &str,
    limit: i64,
) -> EngineResult<Vec<JockeyMaster>> {
    let sql = "SELECT kishu_code, kishumei_ryakusho, shozoku_code FROM kishu_master \
               WHERE kishumei_ryakusho ILIKE $1 ORDER BY kishu_code LIMIT $2";
    let pattern = format!("%{}%", name);
    let rows = sqlx::query(sql)
        .bind(pattern)
        .bind(limit)
        .fetch_all(pool)
        .await?;
    Ok(rows.iter().map(jockey_from_row).collect())
}

/// Current-year ride counts and win/place rates for one jockey.
pub async fn jockey_annual_stats(
    pool: &PgPool,
    kishu_code: &str,
    year: i32,
) -> EngineResult<Option<JockeyAnnualStats>> {
    let sql = "SELECT kishu_code, COUNT(*) AS rides, \
               SUM(CASE WHEN kakutei_chakujun = '01' THEN 1 ELSE 0 END) AS wins, \
               SUM(CASE WHEN kakutei_chakujun IN ('01','02','03') THEN 1 ELSE 0 END) AS places \
        FROM umagoto_race_joho \
        WHERE kishu_code = $1 AND data_kubun = '7' AND kaisai_nen = $2 \
          AND kakutei_chakujun ~ '^[0-9]+$' \
        GROUP BY kishu_code";
    let row = sqlx::query(sql)
        .bind(kishu_code)
        .bind(year.to_string())
        .fetch_optional(pool)
        .await?;

    Ok(row.map(|r| {
        let rides = opt_i64(&r, "rides").unwrap_or(0);
        let wins = opt_i64(&r, "wins").unwrap_or(0);
        let places = opt_i64(&r, "places").unwrap_or(0);
        JockeyAnnualStats {
            kishu_code: text(&r, "kishu_code"),
            rides,
            wins,
            places,
            win_rate: if rides > 0 { wins as f64 / rides as f64 } else { 0.0 },
            place_rate: if rides > 0 { places as f64 / rides as f64 } else { 0.0 },
        }
    }))
}
