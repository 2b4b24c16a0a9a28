//! Current track-condition snapshots.
//!
//! `tenko_baba_jotai` rows are keyed by the 14-char meeting code (race code
//! minus the race number) and are time-stamped; the most recently inserted
//! row wins.

use sqlx::PgPool;

use crate::db::text;
use crate::error::EngineResult;
use crate::models::{race_code_meeting, Surface};

/// Surface condition codes: 1 good, 2 slightly heavy, 3 heavy, 4 bad.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackCondition {
    pub surface: Surface,
    pub condition: u8,
    pub weather: u8,
}

impl TrackCondition {
    pub fn condition_name(&self) -> &'static str {
        match self.condition {
            1 => "good",
            2 => "slightly_heavy",
            3 => "heavy",
            4 => "bad",
            _ => "unknown",
        }
    }
}

/// Read the current surface condition for a race's meeting.
///
/// Returns `None` when no snapshot exists or the race's surface cannot be
/// resolved (the track adjuster then skips).
pub async fn current_track_condition(
    pool: &PgPool,
    race_code: &str,
) -> EngineResult<Option<TrackCondition>> {
    let track_row = sqlx::query(
        "SELECT track_code FROM race_shosai \
         WHERE race_code = $1 AND data_kubun IN ('1','2','3','4','5','6','7') \
         LIMIT 1",
    )
    .bind(race_code)
    .fetch_optional(pool)
    .await?;

    let track_code = match track_row {
        Some(row) => text(&row, "track_code"),
        None => return Ok(None),
    };
    let surface = match Surface::from_track_code(&track_code) {
        Some(s) => s,
        None => return Ok(None),
    };

    let row = sqlx::query(
        "SELECT tenko_jotai_genzai, baba_jotai_shiba_genzai, baba_jotai_dirt_genzai \
         FROM tenko_baba_jotai \
         WHERE race_code = $1 \
         ORDER BY insert_timestamp DESC LIMIT 1",
    )
    .bind(race_code_meeting(race_code))
    .fetch_optional(pool)
    .await?;

    let row = match row {
        Some(r) => r,
        None => return Ok(None),
    };

    let weather = text(&row, "tenko_jotai_genzai").trim().parse().unwrap_or(0);
    let condition_raw = match surface {
        Surface::Dirt => text(&row, "baba_jotai_dirt_genzai"),
        _ => text(&row, "baba_jotai_shiba_genzai"),
    };
    let condition: u8 = condition_raw.trim().parse().unwrap_or(0);
    if condition == 0 {
        return Ok(None);
    }

    Ok(Some(TrackCondition {
        surface,
        condition,
        weather,
    }))
}

/// Per-horse record on one exact surface/condition combination.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConditionRecord {
    pub runs: i64,
    pub win_rate: f64,
    pub top3_rate: f64,
}

/// Each horse's career record on the given surface and condition, in a
/// single GROUP BY over finalized history.
pub async fn horse_condition_records(
    pool: &PgPool,
    kettonums: &[String],
    condition: &TrackCondition,
) -> EngineResult<std::collections::HashMap<String, ConditionRecord>> {
    if kettonums.is_empty() {
        return Ok(Default::default());
    }

    let track_prefix = match condition.surface {
        Surface::Dirt => "2",
        _ => "1",
    };
    let cond = condition.condition.to_string();

    let placeholders = crate::db::placeholders(3, kettonums.len());
    let sql = format!(
        "SELECT u.ketto_toroku_bango, COUNT(*) AS runs, \
                SUM(CASE WHEN u.kakutei_chakujun = '01' THEN 1 ELSE 0 END) AS wins, \
                SUM(CASE WHEN u.kakutei_chakujun IN ('01','02','03') THEN 1 ELSE 0 END) AS top3 \
         FROM umagoto_race_joho u \
         JOIN race_shosai r ON u.race_code = r.race_code AND r.data_kubun = '7' \
         WHERE u.data_kubun = '7' \
           AND u.kakutei_chakujun ~ '^[0-9]+$' \
           AND r.track_code LIKE $1 \
           AND (r.shiba_babajotai_code = $2 OR r.dirt_babajotai_code = $2) \
           AND u.ketto_toroku_bango IN ({placeholders}) \
         GROUP BY u.ketto_toroku_bango"
    );

    let mut query = sqlx::query(&sql)
        .bind(format!("{}%", track_prefix))
        .bind(cond);
    for k in kettonums {
        query = query.bind(k);
    }
    let rows = query.fetch_all(pool).await?;

    let mut out = std::collections::HashMap::with_capacity(rows.len());
    for row in &rows {
        let runs = crate::db::opt_i64(row, "runs").unwrap_or(0);
        let wins = crate::db::opt_i64(row, "wins").unwrap_or(0);
        let top3 = crate::db::opt_i64(row, "top3").unwrap_or(0);
        out.insert(
            text(row, "ketto_toroku_bango"),
            ConditionRecord {
                runs,
                win_rate: if runs > 0 { wins as f64 / runs as f64 } else { 0.0 },
                top3_rate: if runs > 0 { top3 as f64 / runs as f64 } else { 0.0 },
            },
        );
    }
    Ok(out)
}
