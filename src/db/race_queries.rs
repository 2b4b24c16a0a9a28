//! Race and entry queries.
//!
//! Declared/preliminary rows (`data_kubun` '1'-'6') serve the prediction
//! path; finalized rows ('7') serve training and evaluation.

use chrono::{NaiveDate, Utc};
use sqlx::postgres::PgRow;
use sqlx::PgPool;

use crate::db::text;
use crate::error::{EngineError, EngineResult};
use crate::models::{EntryInfo, RaceBundle, RaceInfo};

const RACE_COLS: &str = "race_code, kaisai_nen, kaisai_gappi, keibajo_code, race_bango, \
     kyosomei_hondai, kyori, track_code, grade_code, shiba_babajotai_code, \
     dirt_babajotai_code, tenko_code, hasso_jikoku, kyoso_joken_code, \
     kyoso_shubetsu_code, data_kubun";

fn race_from_row(row: &PgRow) -> RaceInfo {
    RaceInfo {
        race_code: text(row, "race_code"),
        kaisai_nen: text(row, "kaisai_nen"),
        kaisai_gappi: text(row, "kaisai_gappi"),
        keibajo_code: text(row, "keibajo_code"),
        race_bango: text(row, "race_bango"),
        kyoso_mei: text(row, "kyosomei_hondai"),
        kyori: text(row, "kyori"),
        track_code: text(row, "track_code"),
        grade_code: text(row, "grade_code"),
        shiba_babajotai_code: text(row, "shiba_babajotai_code"),
        dirt_babajotai_code: text(row, "dirt_babajotai_code"),
        tenko_code: text(row, "tenko_code"),
        hasso_jikoku: text(row, "hasso_jikoku"),
        kyoso_joken_code: text(row, "kyoso_joken_code"),
        kyoso_shubetsu_code: text(row, "kyoso_shubetsu_code"),
        data_kubun: text(row, "data_kubun"),
    }
}

fn entry_from_row(row: &PgRow) -> EntryInfo {
    EntryInfo {
        race_code: text(row, "race_code"),
        umaban: text(row, "umaban"),
        wakuban: text(row, "wakuban"),
        ketto_toroku_bango: text(row, "ketto_toroku_bango"),
        bamei: text(row, "bamei"),
        seibetsu_code: text(row, "seibetsu_code"),
        barei: text(row, "barei"),
        futan_juryo: text(row, "futan_juryo"),
        blinker_shiyo_kubun: text(row, "blinker_shiyo_kubun"),
        kishu_code: text(row, "kishu_code"),
        kishumei: text(row, "kishumei"),
        chokyoshi_code: text(row, "chokyoshi_code"),
        bataiju: text(row, "bataiju"),
        zogen_sa: text(row, "zogen_sa"),
        tansho_odds: text(row, "tansho_odds"),
        kakutei_chakujun: text(row, "kakutei_chakujun"),
    }
}

pub async fn check_race_exists(pool: &PgPool, race_code: &str) -> EngineResult<bool> {
    let row: Option<(i64,)> = sqlx::query_as(
        "SELECT 1::bigint FROM race_shosai WHERE race_code = $1 LIMIT 1",
    )
    .bind(race_code)
    .fetch_optional(pool)
    .await?;
    Ok(row.is_some())
}

pub async fn get_race_info(pool: &PgPool, race_code: &str) -> EngineResult<Option<RaceInfo>> {
    let sql = format!(
        "SELECT {RACE_COLS} FROM race_shosai \
         WHERE race_code = $1 \
         ORDER BY data_kubun DESC LIMIT 1"
    );
    let row = sqlx::query(&sql).bind(race_code).fetch_optional(pool).await?;
    Ok(row.map(|r| race_from_row(&r)))
}

/// Single aggregation call for the prediction path: race header plus all
/// declared starters with jockey display names.
pub async fn get_race_bundle(pool: &PgPool, race_code: &str) -> EngineResult<RaceBundle> {
    let race = get_race_info(pool, race_code)
        .await?
        .ok_or_else(|| EngineError::MissingData(format!("race not found: {}", race_code)))?;

    // One row per starter: the most finalized data_kubun wins
    let sql = "SELECT DISTINCT ON (u.umaban::int) \
               u.race_code, u.umaban, u.wakuban, u.ketto_toroku_bango, u.bamei, \
               u.seibetsu_code, u.barei, u.futan_juryo, u.blinker_shiyo_kubun, \
               u.kishu_code, COALESCE(k.kishumei_ryakusho, '') AS kishumei, \
               u.chokyoshi_code, u.bataiju, u.zogen_sa, u.tansho_odds, u.kakutei_chakujun \
        FROM umagoto_race_joho u \
        LEFT JOIN kishu_master k ON u.kishu_code = k.kishu_code \
        WHERE u.race_code = $1 \
          AND u.data_kubun IN ('1', '2', '3', '4', '5', '6', '7') \
        ORDER BY u.umaban::int, u.data_kubun DESC";

    let rows = sqlx::query(sql).bind(race_code).fetch_all(pool).await?;
    let horses = rows.iter().map(entry_from_row).collect();

    Ok(RaceBundle { race, horses })
}

async fn races_for_date_range(
    pool: &PgPool,
    from: NaiveDate,
    to: NaiveDate,
) -> EngineResult<Vec<RaceInfo>> {
    let sql = format!(
        "SELECT {RACE_COLS} FROM race_shosai \
         WHERE (kaisai_nen || kaisai_gappi) BETWEEN $1 AND $2 \
         ORDER BY race_code"
    );
    let from_key = from.format("%Y%m%d").to_string();
    let to_key = to.format("%Y%m%d").to_string();
    let rows = sqlx::query(&sql)
        .bind(from_key)
        .bind(to_key)
        .fetch_all(pool)
        .await?;
    Ok(rows.iter().map(race_from_row).collect())
}

pub async fn races_today(pool: &PgPool) -> EngineResult<Vec<RaceInfo>> {
    let today = Utc::now().date_naive();
    races_for_date_range(pool, today, today).await
}

/// Races in the next `days` days, today included.
pub async fn races_upcoming(pool: &PgPool, days: i64) -> EngineResult<Vec<RaceInfo>> {
    let today = Utc::now().date_naive();
    races_for_date_range(pool, today, today + chrono::Duration::days(days)).await
}

pub async fn races_by_date(pool: &PgPool, date: NaiveDate) -> EngineResult<Vec<RaceInfo>> {
    races_for_date_range(pool, date, date).await
}

pub async fn search_races_by_name(
    pool: &PgPool,
    name: &str,
    limit: i64,
) -> EngineResult<Vec<RaceInfo>> {
    let sql = format!(
        "SELECT {RACE_COLS} FROM race_shosai \
         WHERE kyosomei_hondai ILIKE $1 \
         ORDER BY race_code DESC LIMIT $2"
    );
    let pattern = format!("%{}%", name);
    let rows = sqlx::query(&sql)
        .bind(pattern)
        .bind(limit)
        .fetch_all(pool)
        .await?;
    Ok(rows.iter().map(race_from_row).collect())
}
