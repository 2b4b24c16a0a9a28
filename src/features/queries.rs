//! Batched feature queries: candidate races, entries, last-10 aggregates,
//! jockey/trainer annual caches, jockey-horse combos and workout data.
//!
//! Leak prevention happens inside SQL: each per-horse aggregate joins a
//! `(kettonum, current_race_code)` VALUES table and keeps only rows with
//! `race_code < current_race_code`, so the target race can never feed its
//! own features.

use sqlx::PgPool;
use std::collections::HashMap;

use crate::db::{opt_f64, opt_i64, text};
use crate::error::EngineResult;
use crate::features::{ComboStats, PastStats, RateStats, TrainingStats};
use crate::models::{EntryInfo, RaceInfo, Surface};

/// Map horse -> the race being predicted/trained for, used to push the leak
/// filter into SQL.
pub type HorseRaceMap = HashMap<String, String>;

pub fn horse_race_map(entries: &[EntryInfo]) -> HorseRaceMap {
    entries
        .iter()
        .filter(|e| !e.ketto_toroku_bango.is_empty() && !e.race_code.is_empty())
        .map(|e| (e.ketto_toroku_bango.clone(), e.race_code.clone()))
        .collect()
}

/// Build the `(VALUES ...) AS t(kettonum, current_race_code)` clause starting
/// at placeholder `$start`, plus the bind values. Horses without a known
/// current race compare against an all-nines sentinel so nothing is filtered.
pub(crate) fn horse_filter_clause(
    kettonums: &[String],
    map: &HorseRaceMap,
    start: usize,
) -> (String, Vec<String>) {
    let mut parts = Vec::with_capacity(kettonums.len());
    let mut params = Vec::with_capacity(kettonums.len() * 2);
    let mut n = start;
    for k in kettonums {
        parts.push(format!("(${}, ${})", n, n + 1));
        n += 2;
        params.push(k.clone());
        params.push(
            map.get(k)
                .cloned()
                .unwrap_or_else(|| "9999999999999999".to_string()),
        );
    }
    (
        format!(
            "SELECT * FROM (VALUES {}) AS t(kettonum, current_race_code)",
            parts.join(",")
        ),
        params,
    )
}

/// Finalized races for one training year, in race-code order.
pub async fn finalized_races(
    pool: &PgPool,
    year: i32,
    surface: Surface,
    max_races: i64,
) -> EngineResult<Vec<RaceInfo>> {
    let surface_clause = surface
        .sql_filter()
        .map(|f| format!(" AND {}", f))
        .unwrap_or_default();
    let sql = format!(
        "SELECT race_code, kaisai_nen, kaisai_gappi, keibajo_code, race_bango, \
                kyosomei_hondai, kyori, track_code, grade_code, shiba_babajotai_code, \
                dirt_babajotai_code, tenko_code, hasso_jikoku, kyoso_joken_code, \
                kyoso_shubetsu_code, data_kubun \
         FROM race_shosai \
         WHERE kaisai_nen = $1 AND data_kubun = '7'{surface_clause} \
         ORDER BY race_code LIMIT $2"
    );
    let rows = sqlx::query(&sql)
        .bind(year.to_string())
        .bind(max_races)
        .fetch_all(pool)
        .await?;

    Ok(rows
        .iter()
        .map(|row| RaceInfo {
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
        })
        .collect())
}

/// All finalized starter rows for the given races, one batch query.
pub async fn finalized_entries(
    pool: &PgPool,
    race_codes: &[String],
) -> EngineResult<Vec<EntryInfo>> {
    if race_codes.is_empty() {
        return Ok(Vec::new());
    }
    let placeholders = crate::db::placeholders(1, race_codes.len());
    let sql = format!(
        "SELECT race_code, umaban, wakuban, ketto_toroku_bango, bamei, seibetsu_code, \
                barei, futan_juryo, blinker_shiyo_kubun, kishu_code, chokyoshi_code, \
                bataiju, zogen_sa, tansho_odds, kakutei_chakujun \
         FROM umagoto_race_joho \
         WHERE race_code IN ({placeholders}) AND data_kubun = '7' \
         ORDER BY race_code, umaban::int"
    );
    let mut query = sqlx::query(&sql);
    for rc in race_codes {
        query = query.bind(rc);
    }
    let rows = query.fetch_all(pool).await?;

    Ok(rows
        .iter()
        .map(|row| EntryInfo {
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
            kishumei: String::new(),
            chokyoshi_code: text(row, "chokyoshi_code"),
            bataiju: text(row, "bataiju"),
            zogen_sa: text(row, "zogen_sa"),
            tansho_odds: text(row, "tansho_odds"),
            kakutei_chakujun: text(row, "kakutei_chakujun"),
        })
        .collect())
}

/// Last-10 performance aggregates per horse, with the 0.85 decay-weighted
/// variants, corner-3→4 progression and per-metric stddevs, all computed
/// strictly over races earlier than each horse's current race.
pub async fn past_stats_batch(
    pool: &PgPool,
    kettonums: &[String],
    map: &HorseRaceMap,
) -> EngineResult<HashMap<String, PastStats>> {
    if kettonums.is_empty() {
        return Ok(HashMap::new());
    }
    let (values_clause, params) = horse_filter_clause(kettonums, map, 1);

    let sql = format!(
        "WITH horse_filter AS ({values_clause}), \
         ranked AS ( \
             SELECT u.ketto_toroku_bango, u.race_code, u.kakutei_chakujun, u.soha_time, \
                    u.kohan_3f, u.corner3_juni, u.corner4_juni, u.kishu_code, \
                    u.kaisai_nen, u.kaisai_gappi, \
                    ROW_NUMBER() OVER ( \
                        PARTITION BY u.ketto_toroku_bango ORDER BY u.race_code DESC \
                    ) AS rn \
             FROM umagoto_race_joho u \
             JOIN horse_filter hf ON u.ketto_toroku_bango = hf.kettonum \
             WHERE u.data_kubun = '7' \
               AND u.kakutei_chakujun ~ '^[0-9]+$' \
               AND u.race_code < hf.current_race_code \
         ) \
         SELECT ketto_toroku_bango, \
             COUNT(*)::bigint AS race_count, \
             AVG(CAST(kakutei_chakujun AS INTEGER))::float8 AS avg_rank, \
             SUM(CASE WHEN kakutei_chakujun = '01' THEN 1 ELSE 0 END)::bigint AS win_count, \
             SUM(CASE WHEN kakutei_chakujun IN ('01','02','03') THEN 1 ELSE 0 END)::bigint AS place_count, \
             AVG(CAST(NULLIF(soha_time, '') AS INTEGER))::float8 AS avg_time, \
             MIN(CAST(NULLIF(soha_time, '') AS INTEGER))::float8 AS best_time, \
             MAX(CASE WHEN rn = 1 THEN CAST(NULLIF(soha_time, '') AS INTEGER) END)::float8 AS recent_time, \
             AVG(CAST(NULLIF(kohan_3f, '') AS INTEGER))::float8 AS avg_last3f, \
             MIN(CAST(NULLIF(kohan_3f, '') AS INTEGER))::float8 AS best_last3f, \
             AVG(CAST(NULLIF(corner3_juni, '') AS INTEGER))::float8 AS avg_corner3, \
             AVG(CAST(NULLIF(corner4_juni, '') AS INTEGER))::float8 AS avg_corner4, \
             MIN(CAST(kakutei_chakujun AS INTEGER))::bigint AS best_finish, \
             MAX(CASE WHEN rn = 1 THEN kishu_code END) AS last_jockey, \
             MAX(CASE WHEN rn = 1 THEN kaisai_nen || kaisai_gappi END) AS last_race_date, \
             (SUM(CAST(kakutei_chakujun AS INTEGER) * POWER(0.85, rn - 1)) \
                 / NULLIF(SUM(POWER(0.85, rn - 1)), 0))::float8 AS weighted_avg_rank, \
             (SUM(CASE WHEN kakutei_chakujun = '01' THEN POWER(0.85, rn - 1) ELSE 0 END) \
                 / NULLIF(SUM(POWER(0.85, rn - 1)), 0))::float8 AS weighted_win_rate, \
             (SUM(CASE WHEN kakutei_chakujun IN ('01','02','03') THEN POWER(0.85, rn - 1) ELSE 0 END) \
                 / NULLIF(SUM(POWER(0.85, rn - 1)), 0))::float8 AS weighted_place_rate, \
             (SUM(CAST(NULLIF(kohan_3f, '') AS INTEGER) * POWER(0.85, rn - 1)) \
                 / NULLIF(SUM(CASE WHEN kohan_3f IS NOT NULL AND kohan_3f != '' \
                                   THEN POWER(0.85, rn - 1) ELSE 0 END), 0))::float8 AS weighted_avg_last3f, \
             AVG(CAST(NULLIF(corner3_juni, '') AS INTEGER) \
                 - CAST(NULLIF(corner4_juni, '') AS INTEGER))::float8 AS avg_position_change_3to4, \
             STDDEV(CAST(NULLIF(corner3_juni, '') AS INTEGER) \
                 - CAST(NULLIF(corner4_juni, '') AS INTEGER))::float8 AS std_position_change_3to4, \
             STDDEV(CAST(kakutei_chakujun AS INTEGER))::float8 AS rank_stddev, \
             STDDEV(CAST(NULLIF(soha_time, '') AS INTEGER))::float8 AS time_stddev, \
             STDDEV(CAST(NULLIF(kohan_3f, '') AS INTEGER))::float8 AS last3f_stddev \
         FROM ranked \
         WHERE rn <= 10 \
         GROUP BY ketto_toroku_bango"
    );

    let mut query = sqlx::query(&sql);
    for p in &params {
        query = query.bind(p);
    }
    let rows = query.fetch_all(pool).await?;

    let mut out = HashMap::with_capacity(rows.len());
    for row in &rows {
        let race_count = opt_i64(row, "race_count").unwrap_or(0);
        let win_count = opt_i64(row, "win_count").unwrap_or(0);
        let place_count = opt_i64(row, "place_count").unwrap_or(0);
        let div = |n: i64| {
            if race_count > 0 {
                n as f64 / race_count as f64
            } else {
                0.0
            }
        };
        out.insert(
            text(row, "ketto_toroku_bango"),
            PastStats {
                race_count,
                avg_rank: opt_f64(row, "avg_rank").unwrap_or(8.0),
                win_rate: div(win_count),
                place_rate: div(place_count),
                win_count,
                avg_time: opt_f64(row, "avg_time"),
                best_time: opt_f64(row, "best_time"),
                recent_time: opt_f64(row, "recent_time"),
                avg_last3f: opt_f64(row, "avg_last3f").unwrap_or(350.0) / 10.0,
                best_last3f: opt_f64(row, "best_last3f").map(|v| v / 10.0).unwrap_or(35.0),
                avg_corner3: opt_f64(row, "avg_corner3").unwrap_or(8.0),
                avg_corner4: opt_f64(row, "avg_corner4").unwrap_or(8.0),
                best_finish: opt_i64(row, "best_finish").unwrap_or(10),
                last_jockey: text(row, "last_jockey"),
                last_race_date: text(row, "last_race_date"),
                weighted_avg_rank: opt_f64(row, "weighted_avg_rank").unwrap_or(8.0),
                weighted_win_rate: opt_f64(row, "weighted_win_rate").unwrap_or(0.0),
                weighted_place_rate: opt_f64(row, "weighted_place_rate").unwrap_or(0.0),
                weighted_avg_last3f: opt_f64(row, "weighted_avg_last3f")
                    .map(|v| v / 10.0)
                    .unwrap_or(35.0),
                avg_position_change_3to4: opt_f64(row, "avg_position_change_3to4").unwrap_or(0.0),
                std_position_change_3to4: opt_f64(row, "std_position_change_3to4").unwrap_or(0.0),
                rank_stddev: opt_f64(row, "rank_stddev").unwrap_or(5.0),
                time_stddev: opt_f64(row, "time_stddev").unwrap_or(50.0),
                last3f_stddev: opt_f64(row, "last3f_stddev").map(|v| v / 10.0).unwrap_or(2.0),
                ..Default::default()
            },
        );
    }
    Ok(out)
}

/// Previous-year annual win/place rates for jockeys and trainers.
pub async fn jockey_trainer_caches(
    pool: &PgPool,
    year: i32,
) -> EngineResult<(HashMap<String, RateStats>, HashMap<String, RateStats>)> {
    let mut jockeys = HashMap::new();
    let mut trainers = HashMap::new();

    for (code_col, target) in [
        ("kishu_code", &mut jockeys),
        ("chokyoshi_code", &mut trainers),
    ] {
        let sql = format!(
            "SELECT {code_col} AS code, COUNT(*)::bigint AS total, \
                    SUM(CASE WHEN kakutei_chakujun = '01' THEN 1 ELSE 0 END)::bigint AS wins, \
                    SUM(CASE WHEN kakutei_chakujun IN ('01','02','03') THEN 1 ELSE 0 END)::bigint AS places \
             FROM umagoto_race_joho \
             WHERE data_kubun = '7' \
               AND kaisai_nen >= $1 AND kaisai_nen < $2 \
               AND kakutei_chakujun ~ '^[0-9]+$' \
             GROUP BY {code_col}"
        );
        let rows = sqlx::query(&sql)
            .bind((year - 1).to_string())
            .bind(year.to_string())
            .fetch_all(pool)
            .await?;
        for row in &rows {
            let code = text(row, "code");
            let total = opt_i64(row, "total").unwrap_or(0);
            if code.is_empty() || total == 0 {
                continue;
            }
            let wins = opt_i64(row, "wins").unwrap_or(0);
            let places = opt_i64(row, "places").unwrap_or(0);
            target.insert(
                code,
                RateStats {
                    runs: total,
                    win_rate: wins as f64 / total as f64,
                    place_rate: places as f64 / total as f64,
                },
            );
        }
    }

    Ok((jockeys, trainers))
}

/// Career record for each declared (jockey, horse) pairing, one VALUES join.
pub async fn jockey_horse_combo_batch(
    pool: &PgPool,
    pairs: &[(String, String)],
) -> EngineResult<HashMap<String, ComboStats>> {
    let unique: Vec<&(String, String)> = {
        let mut seen = std::collections::HashSet::new();
        pairs
            .iter()
            .filter(|p| !p.0.is_empty() && !p.1.is_empty() && seen.insert((&p.0, &p.1)))
            .take(1000)
            .collect()
    };
    if unique.is_empty() {
        return Ok(HashMap::new());
    }

    let mut parts = Vec::with_capacity(unique.len());
    let mut n = 1;
    for _ in &unique {
        parts.push(format!("(${}, ${})", n, n + 1));
        n += 2;
    }
    let sql = format!(
        "SELECT u.kishu_code, u.ketto_toroku_bango, COUNT(*)::bigint AS runs, \
                SUM(CASE WHEN u.kakutei_chakujun = '01' THEN 1 ELSE 0 END)::bigint AS wins \
         FROM umagoto_race_joho u \
         JOIN (VALUES {}) AS t(kishu, kettonum) \
           ON u.kishu_code = t.kishu AND u.ketto_toroku_bango = t.kettonum \
         WHERE u.data_kubun = '7' AND u.kakutei_chakujun ~ '^[0-9]+$' \
         GROUP BY u.kishu_code, u.ketto_toroku_bango",
        parts.join(",")
    );
    let mut query = sqlx::query(&sql);
    for (jockey, kettonum) in &unique {
        query = query.bind(jockey).bind(kettonum);
    }
    let rows = query.fetch_all(pool).await?;

    let mut out = HashMap::with_capacity(rows.len());
    for row in &rows {
        let key = format!(
            "{}_{}",
            text(row, "kishu_code"),
            text(row, "ketto_toroku_bango")
        );
        out.insert(
            key,
            ComboStats {
                runs: opt_i64(row, "runs").unwrap_or(0),
                wins: opt_i64(row, "wins").unwrap_or(0),
            },
        );
    }
    Ok(out)
}

/// Slope-course workout aggregates per horse. Workout rows carry no race
/// linkage, so no leak filter applies.
pub async fn training_stats_batch(
    pool: &PgPool,
    kettonums: &[String],
) -> EngineResult<HashMap<String, TrainingStats>> {
    if kettonums.is_empty() {
        return Ok(HashMap::new());
    }
    let placeholders = crate::db::placeholders(1, kettonums.len());
    let sql = format!(
        "SELECT ketto_toroku_bango, COUNT(*)::bigint AS count, \
                AVG(CAST(NULLIF(time_gokei_4furlong, '') AS INTEGER))::float8 AS avg_4f, \
                AVG(CAST(NULLIF(time_gokei_3furlong, '') AS INTEGER))::float8 AS avg_3f, \
                AVG(CAST(NULLIF(lap_time_1furlong, '') AS INTEGER))::float8 AS avg_1f \
         FROM hanro_chokyo \
         WHERE ketto_toroku_bango IN ({placeholders}) \
         GROUP BY ketto_toroku_bango"
    );
    let mut query = sqlx::query(&sql);
    for k in kettonums {
        query = query.bind(k);
    }
    let rows = query.fetch_all(pool).await?;

    let mut out = HashMap::with_capacity(rows.len());
    for row in &rows {
        let count = opt_i64(row, "count").unwrap_or(0);
        let avg_4f = opt_f64(row, "avg_4f").map(|v| v / 10.0).unwrap_or(52.0);
        let avg_3f = opt_f64(row, "avg_3f").map(|v| v / 10.0).unwrap_or(38.0);
        let avg_1f = opt_f64(row, "avg_1f").map(|v| v / 10.0).unwrap_or(12.5);

        // 4F time to a 30-80 score: 52s is the 50-point baseline
        let score = (50.0 + (52.0 - avg_4f) * 5.0).clamp(30.0, 80.0);

        out.insert(
            text(row, "ketto_toroku_bango"),
            TrainingStats {
                count,
                score,
                time_4f: avg_4f,
                time_3f: avg_3f,
                lap_1f: avg_1f,
                days_before: 7,
            },
        );
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_horse_filter_clause_binds_pairs() {
        let kettonums = vec!["A".to_string(), "B".to_string()];
        let mut map = HorseRaceMap::new();
        map.insert("A".to_string(), "2023060506010101".to_string());

        let (clause, params) = horse_filter_clause(&kettonums, &map, 1);
        assert!(clause.contains("($1, $2),($3, $4)"));
        assert_eq!(
            params,
            vec![
                "A".to_string(),
                "2023060506010101".to_string(),
                "B".to_string(),
                // unknown current race compares above every real race code
                "9999999999999999".to_string(),
            ]
        );
    }

    #[test]
    fn test_past_stats_sql_pushes_leak_filter() {
        // The leak-prevention clause must live in SQL, not application code.
        let kettonums = vec!["A".to_string()];
        let (clause, _) = horse_filter_clause(&kettonums, &HorseRaceMap::new(), 1);
        assert!(clause.starts_with("SELECT * FROM (VALUES"));
    }
}
