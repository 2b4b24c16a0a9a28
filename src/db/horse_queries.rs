//! Horse master queries.

use serde::Serialize;
use sqlx::postgres::PgRow;
use sqlx::PgPool;

use crate::db::text;
use crate::error::EngineResult;

#[derive(Debug, Clone, Serialize)]
pub struct HorseMaster {
    pub ketto_toroku_bango: String,
    pub bamei: String,
    pub seibetsu_code: String,
    pub birth_date: String,
    pub keiro_code: String,
    pub sire_id: String,
    pub broodmare_sire_id: String,
    pub chokyoshi_code: String,
}

fn horse_from_row(row: &PgRow) -> HorseMaster {
    HorseMaster {
        ketto_toroku_bango: text(row, "ketto_toroku_bango"),
        bamei: text(row, "bamei"),
        seibetsu_code: text(row, "seibetsu_code"),
        birth_date: text(row, "seinengappi"),
        keiro_code: text(row, "keiro_code"),
        sire_id: text(row, "ketto1_hanshoku_toroku_bango"),
        broodmare_sire_id: text(row, "ketto3_hanshoku_toroku_bango"),
        chokyoshi_code: text(row, "chokyoshi_code"),
    }
}

const HORSE_COLS: &str = "ketto_toroku_bango, bamei, seibetsu_code, seinengappi, keiro_code, \
     ketto1_hanshoku_toroku_bango, ketto3_hanshoku_toroku_bango, chokyoshi_code";

pub async fn get_horse(pool: &PgPool, kettonum: &str) -> EngineResult<Option<HorseMaster>> {
    let sql = format!(
        "SELECT {HORSE_COLS} FROM kyosoba_master2 WHERE ketto_toroku_bango = $1 LIMIT 1"
    );
    let row = sqlx::query(&sql).bind(kettonum).fetch_optional(pool).await?;
    Ok(row.map(|r| horse_from_row(&r)))
}

pub async fn search_horses(
    pool: &PgPool,
    name: &str,
    limit: i64,
) -> EngineResult<Vec<HorseMaster>> {
    let sql = format!(
        "SELECT {HORSE_COLS} FROM kyosoba_master2 \
         WHERE bamei ILIKE $1 ORDER BY ketto_toroku_bango DESC LIMIT $2"
    );
    let pattern = format!("%{}%", name);
    let rows = sqlx::query(&sql)
        .bind(pattern)
        .bind(limit)
        .fetch_all(pool)
        .await?;
    Ok(rows.iter().map(horse_from_row).collect())
}
