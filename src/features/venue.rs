//! Venue aptitude, previous-race (zenso) details, and jockey recent /
//! maiden-restricted form.

use sqlx::PgPool;
use std::collections::HashMap;

use crate::db::{opt_i64, text};
use crate::error::EngineResult;
use crate::features::queries::{horse_filter_clause, HorseRaceMap};
use crate::features::util::{grade_to_rank, safe_f64, safe_i64};
use crate::features::RateStats;

/// Venue codes with tighter turns.
pub const SMALL_TRACK_VENUES: [&str; 5] = ["01", "02", "03", "06", "10"];

/// Per-horse venue x surface rates, keyed `"{kettonum}_{venue}_{shiba|dirt}"`.
pub async fn venue_stats_batch(
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
         SELECT u.ketto_toroku_bango, r.keibajo_code, \
                CASE WHEN r.track_code LIKE '1%' THEN 'shiba' ELSE 'dirt' END AS surface, \
                COUNT(*)::bigint AS runs, \
                SUM(CASE WHEN u.kakutei_chakujun = '01' THEN 1 ELSE 0 END)::bigint AS wins, \
                SUM(CASE WHEN u.kakutei_chakujun IN ('01','02','03') THEN 1 ELSE 0 END)::bigint AS places \
         FROM umagoto_race_joho u \
         JOIN race_shosai r ON u.race_code = r.race_code AND r.data_kubun = '7' \
         JOIN horse_filter hf ON u.ketto_toroku_bango = hf.kettonum \
         WHERE u.data_kubun = '7' \
           AND u.kakutei_chakujun ~ '^[0-9]+$' \
           AND u.race_code < hf.current_race_code \
         GROUP BY u.ketto_toroku_bango, r.keibajo_code, surface"
    );
    let mut query = sqlx::query(&sql);
    for p in &params {
        query = query.bind(p);
    }
    let rows = query.fetch_all(pool).await?;

    let mut out = HashMap::new();
    for row in &rows {
        let runs = opt_i64(row, "runs").unwrap_or(0);
        if runs == 0 {
            continue;
        }
        let wins = opt_i64(row, "wins").unwrap_or(0);
        let places = opt_i64(row, "places").unwrap_or(0);
        let key = format!(
            "{}_{}_{}",
            text(row, "ketto_toroku_bango"),
            text(row, "keibajo_code"),
            text(row, "surface")
        );
        out.insert(
            key,
            RateStats {
                runs,
                win_rate: wins as f64 / runs as f64,
                place_rate: places as f64 / runs as f64,
            },
        );
    }
    Ok(out)
}

/// Features derived from a horse's previous (up to 5) races.
#[derive(Debug, Clone)]
pub struct ZensoFeatures {
    pub zenso1_chakujun: f64,
    pub zenso1_ninki: f64,
    pub zenso1_agari: f64,
    pub zenso1_corner_avg: f64,
    pub zenso1_distance: f64,
    pub zenso1_grade: f64,
    pub zenso2_chakujun: f64,
    pub zenso3_chakujun: f64,
    pub zenso_chakujun_trend: f64,
    pub zenso_agari_trend: f64,
    pub small_track_rate: f64,
    pub large_track_rate: f64,
    pub zenso1_agari_rank: f64,
    pub zenso2_agari_rank: f64,
    pub avg_agari_rank_3: f64,
    pub zenso1_position_up_1to2: f64,
    pub zenso1_position_up_2to3: f64,
    pub zenso1_position_up_3to4: f64,
    pub zenso1_early_position_avg: f64,
    pub zenso1_late_position_avg: f64,
    pub late_push_tendency: f64,
}

impl Default for ZensoFeatures {
    fn default() -> Self {
        Self {
            zenso1_chakujun: 10.0,
            zenso1_ninki: 10.0,
            zenso1_agari: 35.0,
            zenso1_corner_avg: 8.0,
            zenso1_distance: 1600.0,
            zenso1_grade: 3.0,
            zenso2_chakujun: 10.0,
            zenso3_chakujun: 10.0,
            zenso_chakujun_trend: 0.0,
            zenso_agari_trend: 0.0,
            small_track_rate: 0.25,
            large_track_rate: 0.25,
            zenso1_agari_rank: 9.0,
            zenso2_agari_rank: 9.0,
            avg_agari_rank_3: 9.0,
            zenso1_position_up_1to2: 0.0,
            zenso1_position_up_2to3: 0.0,
            zenso1_position_up_3to4: 0.0,
            zenso1_early_position_avg: 8.0,
            zenso1_late_position_avg: 8.0,
            late_push_tendency: 0.0,
        }
    }
}

#[derive(Debug, Clone, Default)]
struct ZensoRace {
    chakujun: i64,
    ninki: i64,
    kohan_3f: f64,
    corner1: f64,
    corner2: f64,
    corner3: f64,
    corner4: f64,
    kyori: i64,
    grade_code: String,
    keibajo_code: String,
    agari_rank: i64,
}

/// Previous-race details per horse. The final-3f rank within each past race
/// is computed in SQL via a window RANK before the per-horse cut to 5 rows.
pub async fn zenso_batch(
    pool: &PgPool,
    kettonums: &[String],
    map: &HorseRaceMap,
) -> EngineResult<HashMap<String, ZensoFeatures>> {
    if kettonums.is_empty() {
        return Ok(HashMap::new());
    }
    let (values_clause, params) = horse_filter_clause(kettonums, map, 1);
    let sql = format!(
        "WITH horse_filter AS ({values_clause}), \
         with_agari_rank AS ( \
             SELECT u.ketto_toroku_bango, u.race_code, u.kakutei_chakujun, \
                    u.tansho_ninkijun, u.kohan_3f, \
                    u.corner1_juni, u.corner2_juni, u.corner3_juni, u.corner4_juni, \
                    r.kyori, r.grade_code, r.keibajo_code, \
                    RANK() OVER ( \
                        PARTITION BY u.race_code \
                        ORDER BY CAST(NULLIF(u.kohan_3f, '') AS INTEGER) \
                    ) AS agari_rank \
             FROM umagoto_race_joho u \
             JOIN race_shosai r ON u.race_code = r.race_code AND r.data_kubun = '7' \
             JOIN horse_filter hf ON u.ketto_toroku_bango = hf.kettonum \
             WHERE u.data_kubun = '7' \
               AND u.kakutei_chakujun ~ '^[0-9]+$' \
               AND u.race_code < hf.current_race_code \
         ), \
         ranked AS ( \
             SELECT *, ROW_NUMBER() OVER ( \
                 PARTITION BY ketto_toroku_bango ORDER BY race_code DESC \
             ) AS rn \
             FROM with_agari_rank \
         ) \
         SELECT * FROM ranked WHERE rn <= 5 ORDER BY ketto_toroku_bango, rn"
    );
    let mut query = sqlx::query(&sql);
    for p in &params {
        query = query.bind(p);
    }
    let rows = query.fetch_all(pool).await?;

    let mut horse_races: HashMap<String, Vec<ZensoRace>> = HashMap::new();
    for row in &rows {
        horse_races
            .entry(text(row, "ketto_toroku_bango"))
            .or_default()
            .push(ZensoRace {
                chakujun: safe_i64(&text(row, "kakutei_chakujun"), 10),
                ninki: safe_i64(&text(row, "tansho_ninkijun"), 10),
                kohan_3f: safe_f64(&text(row, "kohan_3f"), 350.0) / 10.0,
                corner1: safe_f64(&text(row, "corner1_juni"), 8.0),
                corner2: safe_f64(&text(row, "corner2_juni"), 8.0),
                corner3: safe_f64(&text(row, "corner3_juni"), 8.0),
                corner4: safe_f64(&text(row, "corner4_juni"), 8.0),
                kyori: safe_i64(&text(row, "kyori"), 1600),
                grade_code: text(row, "grade_code"),
                keibajo_code: text(row, "keibajo_code"),
                agari_rank: opt_i64(row, "agari_rank").unwrap_or(9),
            });
    }

    let mut out = HashMap::with_capacity(horse_races.len());
    for (kettonum, races) in horse_races {
        out.insert(kettonum, derive_zenso_features(&races));
    }
    Ok(out)
}

fn derive_zenso_features(races: &[ZensoRace]) -> ZensoFeatures {
    let mut f = ZensoFeatures::default();
    let z1 = races.first();
    let z2 = races.get(1);
    let z3 = races.get(2);

    if let Some(z1) = z1 {
        f.zenso1_chakujun = z1.chakujun as f64;
        f.zenso1_ninki = z1.ninki as f64;
        f.zenso1_agari = z1.kohan_3f;
        f.zenso1_corner_avg = (z1.corner3 + z1.corner4) / 2.0;
        f.zenso1_distance = z1.kyori as f64;
        f.zenso1_grade = grade_to_rank(&z1.grade_code);
        f.zenso1_agari_rank = z1.agari_rank as f64;
        f.zenso1_position_up_1to2 = z1.corner1 - z1.corner2;
        f.zenso1_position_up_2to3 = z1.corner2 - z1.corner3;
        f.zenso1_position_up_3to4 = z1.corner3 - z1.corner4;
        f.zenso1_early_position_avg = (z1.corner1 + z1.corner2) / 2.0;
        f.zenso1_late_position_avg = (z1.corner3 + z1.corner4) / 2.0;
    }
    if let Some(z2) = z2 {
        f.zenso2_chakujun = z2.chakujun as f64;
        f.zenso2_agari_rank = z2.agari_rank as f64;
    }
    if let Some(z3) = z3 {
        f.zenso3_chakujun = z3.chakujun as f64;
    }

    // Finishing-position trend over the last three races
    if races.len() >= 3 {
        let c1 = races[0].chakujun;
        let c3 = races[2].chakujun;
        f.zenso_chakujun_trend = if c1 < c3 - 2 {
            1.0
        } else if c1 > c3 + 2 {
            -1.0
        } else {
            0.0
        };
    }

    let agaris: Vec<f64> = races
        .iter()
        .take(3)
        .map(|r| r.kohan_3f)
        .filter(|&a| a > 0.0)
        .collect();
    if agaris.len() >= 3 {
        f.zenso_agari_trend = if agaris[0] < agaris[2] - 0.3 {
            1.0
        } else if agaris[0] > agaris[2] + 0.3 {
            -1.0
        } else {
            0.0
        };
    }

    let agari_ranks: Vec<f64> = races
        .iter()
        .take(3)
        .map(|r| r.agari_rank as f64)
        .filter(|&a| a > 0.0)
        .collect();
    if !agari_ranks.is_empty() {
        f.avg_agari_rank_3 = agari_ranks.iter().sum::<f64>() / agari_ranks.len() as f64;
    }

    // Small / large track split over all fetched races
    let (mut small_runs, mut small_places, mut large_runs, mut large_places) = (0, 0, 0, 0);
    for r in races {
        let is_small = SMALL_TRACK_VENUES.contains(&r.keibajo_code.as_str());
        if is_small {
            small_runs += 1;
            if r.chakujun <= 3 {
                small_places += 1;
            }
        } else {
            large_runs += 1;
            if r.chakujun <= 3 {
                large_places += 1;
            }
        }
    }
    if small_runs > 0 {
        f.small_track_rate = small_places as f64 / small_runs as f64;
    }
    if large_runs > 0 {
        f.large_track_rate = large_places as f64 / large_runs as f64;
    }

    // Late push: moved up 3+ positions from corner 3 to 4
    if !races.is_empty() {
        let late_pushes = races
            .iter()
            .take(5)
            .filter(|r| r.corner3 - r.corner4 >= 3.0)
            .count();
        f.late_push_tendency = late_pushes as f64 / races.len() as f64;
    }

    f
}

/// Current-year rides and rates per jockey.
pub async fn jockey_recent_batch(
    pool: &PgPool,
    jockey_codes: &[String],
    year: i32,
) -> EngineResult<HashMap<String, RateStats>> {
    let unique: Vec<&String> = {
        let mut seen = std::collections::HashSet::new();
        jockey_codes
            .iter()
            .filter(|c| !c.is_empty() && seen.insert(c.as_str()))
            .collect()
    };
    if unique.is_empty() {
        return Ok(HashMap::new());
    }

    let placeholders = crate::db::placeholders(2, unique.len());
    let sql = format!(
        "SELECT kishu_code, COUNT(*)::bigint AS runs, \
                SUM(CASE WHEN kakutei_chakujun = '01' THEN 1 ELSE 0 END)::bigint AS wins, \
                SUM(CASE WHEN kakutei_chakujun IN ('01','02','03') THEN 1 ELSE 0 END)::bigint AS places \
         FROM umagoto_race_joho \
         WHERE data_kubun = '7' \
           AND kakutei_chakujun ~ '^[0-9]+$' \
           AND kaisai_nen = $1 \
           AND kishu_code IN ({placeholders}) \
         GROUP BY kishu_code"
    );
    let mut query = sqlx::query(&sql).bind(year.to_string());
    for c in &unique {
        query = query.bind(c.as_str());
    }
    let rows = query.fetch_all(pool).await?;

    let mut out = HashMap::new();
    for row in &rows {
        let runs = opt_i64(row, "runs").unwrap_or(0);
        let wins = opt_i64(row, "wins").unwrap_or(0);
        let places = opt_i64(row, "places").unwrap_or(0);
        out.insert(
            text(row, "kishu_code"),
            RateStats {
                runs,
                win_rate: if runs > 0 { wins as f64 / runs as f64 } else { 0.08 },
                place_rate: if runs > 0 { places as f64 / runs as f64 } else { 0.25 },
            },
        );
    }
    Ok(out)
}

/// Jockey record in maiden/newcomer races over the last 3 years; fewer than
/// 10 rides is too noisy and is omitted.
pub async fn jockey_maiden_stats_batch(
    pool: &PgPool,
    jockey_codes: &[String],
    year: i32,
) -> EngineResult<HashMap<String, RateStats>> {
    let unique: Vec<&String> = {
        let mut seen = std::collections::HashSet::new();
        jockey_codes
            .iter()
            .filter(|c| !c.is_empty() && seen.insert(c.as_str()))
            .collect()
    };
    if unique.is_empty() {
        return Ok(HashMap::new());
    }

    let placeholders = crate::db::placeholders(2, unique.len());
    let sql = format!(
        "SELECT u.kishu_code, COUNT(*)::bigint AS runs, \
                SUM(CASE WHEN u.kakutei_chakujun = '01' THEN 1 ELSE 0 END)::bigint AS wins, \
                SUM(CASE WHEN u.kakutei_chakujun IN ('01','02','03') THEN 1 ELSE 0 END)::bigint AS places \
         FROM umagoto_race_joho u \
         JOIN race_shosai rs ON u.race_code = rs.race_code AND rs.data_kubun = '7' \
         WHERE u.data_kubun = '7' \
           AND u.kakutei_chakujun ~ '^[0-9]+$' \
           AND u.kaisai_nen >= $1 \
           AND (rs.kyoso_joken_code_2sai IN ('701', '703') \
                OR rs.kyoso_joken_code_3sai IN ('701', '703')) \
           AND u.kishu_code IN ({placeholders}) \
         GROUP BY u.kishu_code"
    );
    let mut query = sqlx::query(&sql).bind((year - 3).to_string());
    for c in &unique {
        query = query.bind(c.as_str());
    }
    let rows = query.fetch_all(pool).await?;

    let mut out = HashMap::new();
    for row in &rows {
        let runs = opt_i64(row, "runs").unwrap_or(0);
        if runs < 10 {
            continue;
        }
        let wins = opt_i64(row, "wins").unwrap_or(0);
        let places = opt_i64(row, "places").unwrap_or(0);
        out.insert(
            text(row, "kishu_code"),
            RateStats {
                runs,
                win_rate: wins as f64 / runs as f64,
                place_rate: places as f64 / runs as f64,
            },
        );
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn race(chakujun: i64, c3: f64, c4: f64, agari: f64, venue: &str) -> ZensoRace {
        ZensoRace {
            chakujun,
            ninki: 5,
            kohan_3f: agari,
            corner1: c3 + 1.0,
            corner2: c3 + 0.5,
            corner3: c3,
            corner4: c4,
            kyori: 1800,
            grade_code: "E".to_string(),
            keibajo_code: venue.to_string(),
            agari_rank: 3,
        }
    }

    #[test]
    fn test_trend_improving() {
        // finished 2nd last time out, 8th three races back
        let races = vec![
            race(2, 5.0, 4.0, 34.0, "05"),
            race(5, 6.0, 5.0, 34.8, "05"),
            race(8, 7.0, 7.0, 35.2, "06"),
        ];
        let f = derive_zenso_features(&races);
        assert_eq!(f.zenso_chakujun_trend, 1.0);
        assert_eq!(f.zenso_agari_trend, 1.0);
        assert_eq!(f.zenso1_chakujun, 2.0);
    }

    #[test]
    fn test_late_push_tendency() {
        let races = vec![
            race(1, 10.0, 5.0, 34.0, "05"), // +5 positions
            race(4, 8.0, 7.0, 35.0, "05"),
            race(3, 9.0, 4.0, 34.5, "05"), // +5 positions
        ];
        let f = derive_zenso_features(&races);
        assert!((f.late_push_tendency - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_empty_races_use_priors() {
        let f = derive_zenso_features(&[]);
        assert_eq!(f.zenso1_chakujun, 10.0);
        assert_eq!(f.small_track_rate, 0.25);
    }
}
