//! Pedigree lookups and sire offspring aggregates.

use sqlx::PgPool;
use std::collections::HashMap;

use crate::db::{opt_i64, text};
use crate::error::EngineResult;
use crate::features::RateStats;

#[derive(Debug, Clone, Default)]
pub struct Pedigree {
    pub sire_id: String,
    pub broodmare_sire_id: String,
}

/// Sire id and broodmare-sire id per horse.
pub async fn pedigree_batch(
    pool: &PgPool,
    kettonums: &[String],
) -> EngineResult<HashMap<String, Pedigree>> {
    if kettonums.is_empty() {
        return Ok(HashMap::new());
    }
    let placeholders = crate::db::placeholders(1, kettonums.len());
    let sql = format!(
        "SELECT ketto_toroku_bango, \
                ketto1_hanshoku_toroku_bango AS sire_id, \
                ketto3_hanshoku_toroku_bango AS broodmare_sire_id \
         FROM kyosoba_master2 \
         WHERE ketto_toroku_bango IN ({placeholders})"
    );
    let mut query = sqlx::query(&sql);
    for k in kettonums {
        query = query.bind(k);
    }
    let rows = query.fetch_all(pool).await?;

    Ok(rows
        .iter()
        .map(|row| {
            (
                text(row, "ketto_toroku_bango"),
                Pedigree {
                    sire_id: text(row, "sire_id"),
                    broodmare_sire_id: text(row, "broodmare_sire_id"),
                },
            )
        })
        .collect())
}

/// Offspring records over the last 3 years, split by surface, keyed
/// `"{sire_id}_{turf|dirt}"`.
pub async fn sire_stats_batch(
    pool: &PgPool,
    sire_ids: &[String],
    year: i32,
) -> EngineResult<HashMap<String, RateStats>> {
    let unique: Vec<&String> = {
        let mut seen = std::collections::HashSet::new();
        sire_ids
            .iter()
            .filter(|s| !s.is_empty() && seen.insert(s.as_str()))
            .take(1000)
            .collect()
    };
    if unique.is_empty() {
        return Ok(HashMap::new());
    }

    let placeholders = crate::db::placeholders(2, unique.len());
    let sql = format!(
        "SELECT k.ketto1_hanshoku_toroku_bango AS sire_id, \
                CASE WHEN r.track_code LIKE '1%' THEN 'turf' ELSE 'dirt' END AS surface, \
                COUNT(*)::bigint AS runs, \
                SUM(CASE WHEN u.kakutei_chakujun = '01' THEN 1 ELSE 0 END)::bigint AS wins, \
                SUM(CASE WHEN u.kakutei_chakujun IN ('01','02','03') THEN 1 ELSE 0 END)::bigint AS places \
         FROM umagoto_race_joho u \
         JOIN kyosoba_master2 k ON u.ketto_toroku_bango = k.ketto_toroku_bango \
         JOIN race_shosai r ON u.race_code = r.race_code AND r.data_kubun = '7' \
         WHERE u.data_kubun = '7' \
           AND u.kakutei_chakujun ~ '^[0-9]+$' \
           AND u.kaisai_nen >= $1 \
           AND (r.track_code LIKE '1%' OR r.track_code LIKE '2%') \
           AND k.ketto1_hanshoku_toroku_bango IN ({placeholders}) \
         GROUP BY sire_id, surface"
    );
    let mut query = sqlx::query(&sql).bind((year - 3).to_string());
    for s in &unique {
        query = query.bind(s.as_str());
    }
    let rows = query.fetch_all(pool).await?;

    let mut out = HashMap::new();
    for row in &rows {
        let runs = opt_i64(row, "runs").unwrap_or(0);
        let wins = opt_i64(row, "wins").unwrap_or(0);
        let places = opt_i64(row, "places").unwrap_or(0);
        let key = format!("{}_{}", text(row, "sire_id"), text(row, "surface"));
        out.insert(
            key,
            RateStats {
                runs,
                win_rate: if runs > 0 { wins as f64 / runs as f64 } else { 0.08 },
                place_rate: if runs > 0 { places as f64 / runs as f64 } else { 0.25 },
            },
        );
    }
    Ok(out)
}

/// Offspring records in maiden and newcomer races over the last 5 years.
/// Sires with fewer than 5 offspring runs are omitted.
pub async fn sire_maiden_stats_batch(
    pool: &PgPool,
    sire_ids: &[String],
    year: i32,
) -> EngineResult<HashMap<String, RateStats>> {
    let unique: Vec<&String> = {
        let mut seen = std::collections::HashSet::new();
        sire_ids
            .iter()
            .filter(|s| !s.is_empty() && seen.insert(s.as_str()))
            .take(1000)
            .collect()
    };
    if unique.is_empty() {
        return Ok(HashMap::new());
    }

    let placeholders = crate::db::placeholders(2, unique.len());
    let sql = format!(
        "SELECT k.ketto1_hanshoku_toroku_bango AS sire_id, \
                COUNT(*)::bigint AS runs, \
                SUM(CASE WHEN u.kakutei_chakujun = '01' THEN 1 ELSE 0 END)::bigint AS wins, \
                SUM(CASE WHEN u.kakutei_chakujun IN ('01','02','03') THEN 1 ELSE 0 END)::bigint AS places \
         FROM umagoto_race_joho u \
         JOIN kyosoba_master2 k ON u.ketto_toroku_bango = k.ketto_toroku_bango \
         JOIN race_shosai rs ON u.race_code = rs.race_code AND rs.data_kubun = '7' \
         WHERE u.data_kubun = '7' \
           AND u.kakutei_chakujun ~ '^[0-9]+$' \
           AND u.kaisai_nen >= $1 \
           AND (rs.kyoso_joken_code_2sai IN ('701', '703') \
                OR rs.kyoso_joken_code_3sai IN ('701', '703')) \
           AND k.ketto1_hanshoku_toroku_bango IN ({placeholders}) \
         GROUP BY sire_id"
    );
    let mut query = sqlx::query(&sql).bind((year - 5).to_string());
    for s in &unique {
        query = query.bind(s.as_str());
    }
    let rows = query.fetch_all(pool).await?;

    let mut out = HashMap::new();
    for row in &rows {
        let runs = opt_i64(row, "runs").unwrap_or(0);
        if runs < 5 {
            continue;
        }
        let wins = opt_i64(row, "wins").unwrap_or(0);
        let places = opt_i64(row, "places").unwrap_or(0);
        out.insert(
            text(row, "sire_id"),
            RateStats {
                runs,
                win_rate: wins as f64 / runs as f64,
                place_rate: places as f64 / runs as f64,
            },
        );
    }
    Ok(out)
}
