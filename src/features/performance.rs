//! Performance-split aggregates: surface, turn direction, track condition,
//! rest interval and distance category. All leak-filtered in SQL.

use sqlx::PgPool;
use std::collections::HashMap;

use crate::db::{opt_i64, text};
use crate::error::EngineResult;
use crate::features::queries::{horse_filter_clause, HorseRaceMap};
use crate::features::{RateStats, TurnStats};

fn rate_row(row: &sqlx::postgres::PgRow) -> (i64, f64, f64) {
    let runs = opt_i64(row, "runs").unwrap_or(0);
    let wins = opt_i64(row, "wins").unwrap_or(0);
    let places = opt_i64(row, "places").unwrap_or(0);
    if runs > 0 {
        (
            runs,
            wins as f64 / runs as f64,
            places as f64 / runs as f64,
        )
    } else {
        (0, 0.0, 0.0)
    }
}

/// Turf and dirt run counts and rates, keyed `"{kettonum}_{turf|dirt}"`.
pub async fn surface_stats_batch(
    pool: &PgPool,
    kettonums: &[String],
    map: &HorseRaceMap,
) -> EngineResult<HashMap<String, RateStats>> {
    if kettonums.is_empty() {
        return Ok(HashMap::new());
    }
    let (values_clause, params) = horse_filter_clause(kettonums, map, 1);
    let sql = format!(
        "WITH horse_filter AS ({values_clause}) \
         SELECT u.ketto_toroku_bango, \
                CASE WHEN r.track_code LIKE '1%' THEN 'turf' ELSE 'dirt' END AS surface, \
                COUNT(*)::bigint AS runs, \
                SUM(CASE WHEN u.kakutei_chakujun = '01' THEN 1 ELSE 0 END)::bigint AS wins, \
                SUM(CASE WHEN u.kakutei_chakujun IN ('01','02','03') THEN 1 ELSE 0 END)::bigint AS places \
         FROM umagoto_race_joho u \
         JOIN race_shosai r ON u.race_code = r.race_code AND r.data_kubun = '7' \
         JOIN horse_filter hf ON u.ketto_toroku_bango = hf.kettonum \
         WHERE u.data_kubun = '7' \
           AND u.kakutei_chakujun ~ '^[0-9]+$' \
           AND (r.track_code LIKE '1%' OR r.track_code LIKE '2%') \
           AND u.race_code < hf.current_race_code \
         GROUP BY u.ketto_toroku_bango, surface"
    );
    let mut query = sqlx::query(&sql);
    for p in &params {
        query = query.bind(p);
    }
    let rows = query.fetch_all(pool).await?;

    let mut out = HashMap::with_capacity(rows.len());
    for row in &rows {
        let (runs, win_rate, place_rate) = rate_row(row);
        let key = format!(
            "{}_{}",
            text(row, "ketto_toroku_bango"),
            text(row, "surface")
        );
        out.insert(
            key,
            RateStats {
                runs,
                win_rate,
                place_rate,
            },
        );
    }
    Ok(out)
}

/// Right-handed venues: 01, 02, 03, 06, 08, 09, 10. Left-handed: 04, 05, 07.
pub async fn turn_stats_batch(
    pool: &PgPool,
    kettonums: &[String],
    map: &HorseRaceMap,
) -> EngineResult<HashMap<String, TurnStats>> {
    if kettonums.is_empty() {
        return Ok(HashMap::new());
    }
    let (values_clause, params) = horse_filter_clause(kettonums, map, 1);
    let sql = format!(
        "WITH horse_filter AS ({values_clause}) \
         SELECT u.ketto_toroku_bango, r.keibajo_code, \
                COUNT(*)::bigint AS runs, \
                SUM(CASE WHEN u.kakutei_chakujun IN ('01','02','03') THEN 1 ELSE 0 END)::bigint AS places \
         FROM umagoto_race_joho u \
         JOIN race_shosai r ON u.race_code = r.race_code AND r.data_kubun = '7' \
         JOIN horse_filter hf ON u.ketto_toroku_bango = hf.kettonum \
         WHERE u.data_kubun = '7' \
           AND u.kakutei_chakujun ~ '^[0-9]+$' \
           AND u.race_code < hf.current_race_code \
         GROUP BY u.ketto_toroku_bango, r.keibajo_code"
    );
    let mut query = sqlx::query(&sql);
    for p in &params {
        query = query.bind(p);
    }
    let rows = query.fetch_all(pool).await?;

    const RIGHT: [&str; 7] = ["01", "02", "03", "06", "08", "09", "10"];
    const LEFT: [&str; 3] = ["04", "05", "07"];

    let mut acc: HashMap<String, (i64, i64, i64, i64)> = HashMap::new();
    for row in &rows {
        let kettonum = text(row, "ketto_toroku_bango");
        let venue = text(row, "keibajo_code");
        let runs = opt_i64(row, "runs").unwrap_or(0);
        let places = opt_i64(row, "places").unwrap_or(0);
        let slot = acc.entry(kettonum).or_default();
        if RIGHT.contains(&venue.as_str()) {
            slot.0 += runs;
            slot.1 += places;
        } else if LEFT.contains(&venue.as_str()) {
            slot.2 += runs;
            slot.3 += places;
        }
    }

    Ok(acc
        .into_iter()
        .map(|(k, (r_runs, r_places, l_runs, l_places))| {
            (
                k,
                TurnStats {
                    right_turn_runs: r_runs,
                    left_turn_runs: l_runs,
                    right_turn_rate: if r_runs > 0 {
                        r_places as f64 / r_runs as f64
                    } else {
                        0.25
                    },
                    left_turn_rate: if l_runs > 0 {
                        l_places as f64 / l_runs as f64
                    } else {
                        0.25
                    },
                },
            )
        })
        .collect())
}

/// Track-condition splits over the {turf,dirt} x {good..bad} cross product,
/// keyed `"{kettonum}_{turf|dirt}_{ryo|yayaomo|omo|furyo}"`.
pub async fn baba_stats_batch(
    pool: &PgPool,
    kettonums: &[String],
    map: &HorseRaceMap,
) -> EngineResult<HashMap<String, RateStats>> {
    if kettonums.is_empty() {
        return Ok(HashMap::new());
    }
    let (values_clause, params) = horse_filter_clause(kettonums, map, 1);
    let sql = format!(
        "WITH horse_filter AS ({values_clause}) \
         SELECT u.ketto_toroku_bango, \
                CASE WHEN r.track_code LIKE '1%' THEN 'turf' ELSE 'dirt' END AS surface, \
                CASE WHEN r.track_code LIKE '1%' THEN r.shiba_babajotai_code \
                     ELSE r.dirt_babajotai_code END AS cond, \
                COUNT(*)::bigint AS runs, \
                SUM(CASE WHEN u.kakutei_chakujun = '01' THEN 1 ELSE 0 END)::bigint AS wins, \
                SUM(CASE WHEN u.kakutei_chakujun IN ('01','02','03') THEN 1 ELSE 0 END)::bigint AS places \
         FROM umagoto_race_joho u \
         JOIN race_shosai r ON u.race_code = r.race_code AND r.data_kubun = '7' \
         JOIN horse_filter hf ON u.ketto_toroku_bango = hf.kettonum \
         WHERE u.data_kubun = '7' \
           AND u.kakutei_chakujun ~ '^[0-9]+$' \
           AND (r.track_code LIKE '1%' OR r.track_code LIKE '2%') \
           AND u.race_code < hf.current_race_code \
         GROUP BY u.ketto_toroku_bango, surface, cond"
    );
    let mut query = sqlx::query(&sql);
    for p in &params {
        query = query.bind(p);
    }
    let rows = query.fetch_all(pool).await?;

    let mut out = HashMap::new();
    for row in &rows {
        let suffix = match text(row, "cond").trim() {
            "1" => "ryo",
            "2" => "yayaomo",
            "3" => "omo",
            "4" => "furyo",
            _ => continue,
        };
        let (runs, win_rate, place_rate) = rate_row(row);
        let key = format!(
            "{}_{}_{}",
            text(row, "ketto_toroku_bango"),
            text(row, "surface"),
            suffix
        );
        out.insert(
            key,
            RateStats {
                runs,
                win_rate,
                place_rate,
            },
        );
    }
    Ok(out)
}

/// Rest-interval bucket rates, derived by LAG over each horse's race dates,
/// keyed `"{kettonum}_{rentou|week1|week2|week3|week4plus}"`.
pub async fn interval_stats_batch(
    pool: &PgPool,
    kettonums: &[String],
    map: &HorseRaceMap,
) -> EngineResult<HashMap<String, RateStats>> {
    if kettonums.is_empty() {
        return Ok(HashMap::new());
    }
    let (values_clause, params) = horse_filter_clause(kettonums, map, 1);
    let sql = format!(
        "WITH horse_filter AS ({values_clause}), \
         race_intervals AS ( \
             SELECT u.ketto_toroku_bango, u.kakutei_chakujun, \
                    DATE(CONCAT(u.kaisai_nen, '-', SUBSTRING(u.kaisai_gappi, 1, 2), '-', \
                                SUBSTRING(u.kaisai_gappi, 3, 2))) \
                    - LAG(DATE(CONCAT(u.kaisai_nen, '-', SUBSTRING(u.kaisai_gappi, 1, 2), '-', \
                                      SUBSTRING(u.kaisai_gappi, 3, 2)))) \
                      OVER (PARTITION BY u.ketto_toroku_bango ORDER BY u.race_code) AS interval_days \
             FROM umagoto_race_joho u \
             JOIN horse_filter hf ON u.ketto_toroku_bango = hf.kettonum \
             WHERE u.data_kubun = '7' \
               AND u.kakutei_chakujun ~ '^[0-9]+$' \
               AND u.race_code < hf.current_race_code \
         ) \
         SELECT ketto_toroku_bango, \
                CASE WHEN interval_days <= 7 THEN 'rentou' \
                     WHEN interval_days <= 14 THEN 'week1' \
                     WHEN interval_days <= 21 THEN 'week2' \
                     WHEN interval_days <= 28 THEN 'week3' \
                     ELSE 'week4plus' END AS bucket, \
                COUNT(*)::bigint AS runs, \
                SUM(CASE WHEN kakutei_chakujun = '01' THEN 1 ELSE 0 END)::bigint AS wins, \
                SUM(CASE WHEN kakutei_chakujun IN ('01','02','03') THEN 1 ELSE 0 END)::bigint AS places \
         FROM race_intervals \
         WHERE interval_days BETWEEN 1 AND 365 \
         GROUP BY ketto_toroku_bango, bucket"
    );
    let mut query = sqlx::query(&sql);
    for p in &params {
        query = query.bind(p);
    }
    let rows = query.fetch_all(pool).await?;

    let mut out = HashMap::new();
    for row in &rows {
        let (runs, win_rate, place_rate) = rate_row(row);
        let key = format!("{}_{}", text(row, "ketto_toroku_bango"), text(row, "bucket"));
        out.insert(
            key,
            RateStats {
                runs,
                win_rate,
                place_rate,
            },
        );
    }
    Ok(out)
}

/// Distance-category rates over each horse's last 20 races, keyed
/// `"{kettonum}_{sprint|mile|middle|classic|long}"`.
pub async fn distance_stats_batch(
    pool: &PgPool,
    kettonums: &[String],
    map: &HorseRaceMap,
) -> EngineResult<HashMap<String, RateStats>> {
    if kettonums.is_empty() {
        return Ok(HashMap::new());
    }
    let (values_clause, params) = horse_filter_clause(kettonums, map, 1);
    let sql = format!(
        "WITH horse_filter AS ({values_clause}), \
         ranked AS ( \
             SELECT u.ketto_toroku_bango, u.kakutei_chakujun, r.kyori, \
                    ROW_NUMBER() OVER ( \
                        PARTITION BY u.ketto_toroku_bango ORDER BY u.race_code DESC \
                    ) AS rn \
             FROM umagoto_race_joho u \
             JOIN race_shosai r ON u.race_code = r.race_code AND r.data_kubun = '7' \
             JOIN horse_filter hf ON u.ketto_toroku_bango = hf.kettonum \
             WHERE u.data_kubun = '7' \
               AND u.kakutei_chakujun ~ '^[0-9]+$' \
               AND u.race_code < hf.current_race_code \
         ) \
         SELECT ketto_toroku_bango, \
                CASE WHEN CAST(kyori AS INT) <= 1200 THEN 'sprint' \
                     WHEN CAST(kyori AS INT) <= 1600 THEN 'mile' \
                     WHEN CAST(kyori AS INT) <= 2000 THEN 'middle' \
                     WHEN CAST(kyori AS INT) <= 2400 THEN 'classic' \
                     ELSE 'long' END AS category, \
                COUNT(*)::bigint AS runs, \
                SUM(CASE WHEN kakutei_chakujun = '01' THEN 1 ELSE 0 END)::bigint AS wins, \
                SUM(CASE WHEN kakutei_chakujun IN ('01','02','03') THEN 1 ELSE 0 END)::bigint AS places \
         FROM ranked \
         WHERE rn <= 20 \
         GROUP BY ketto_toroku_bango, category"
    );
    let mut query = sqlx::query(&sql);
    for p in &params {
        query = query.bind(p);
    }
    let rows = query.fetch_all(pool).await?;

    let mut out = HashMap::new();
    for row in &rows {
        let (runs, win_rate, place_rate) = rate_row(row);
        let key = format!(
            "{}_{}",
            text(row, "ketto_toroku_bango"),
            text(row, "category")
        );
        out.insert(
            key,
            RateStats {
                runs,
                win_rate,
                place_rate,
            },
        );
    }
    Ok(out)
}
