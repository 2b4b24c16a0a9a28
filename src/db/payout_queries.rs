//! Payout (settlement) queries. Consumed only by evaluation.

use sqlx::PgPool;
use std::collections::HashMap;

use crate::db::text;
use crate::error::EngineResult;

/// Winning combinations for one race: the win payout plus up to three
/// place payouts. Horse numbers are stored without leading zeros.
#[derive(Debug, Clone, Default)]
pub struct RacePayout {
    pub win_umaban: Option<String>,
    pub win_payout: i64,
    pub place: Vec<(String, i64)>,
}

fn norm_umaban(raw: &str) -> Option<String> {
    let s = raw.trim().trim_start_matches('0');
    if s.is_empty() {
        None
    } else {
        Some(s.to_string())
    }
}

fn parse_payout(raw: &str) -> i64 {
    raw.trim().parse().unwrap_or(0)
}

/// All payouts for a year, keyed by race code.
pub async fn payouts_for_year(
    pool: &PgPool,
    year: i32,
) -> EngineResult<HashMap<String, RacePayout>> {
    let sql = "SELECT race_code, \
               tansho1_umaban, tansho1_haraimodoshikin, \
               fukusho1_umaban, fukusho1_haraimodoshikin, \
               fukusho2_umaban, fukusho2_haraimodoshikin, \
               fukusho3_umaban, fukusho3_haraimodoshikin \
        FROM haraimodoshi \
        WHERE SUBSTRING(race_code, 1, 4) = $1";

    let rows = sqlx::query(sql)
        .bind(year.to_string())
        .fetch_all(pool)
        .await?;

    let mut out = HashMap::with_capacity(rows.len());
    for row in &rows {
        let race_code = text(row, "race_code");
        let mut payout = RacePayout {
            win_umaban: norm_umaban(&text(row, "tansho1_umaban")),
            win_payout: parse_payout(&text(row, "tansho1_haraimodoshikin")),
            place: Vec::new(),
        };
        for i in 1..=3 {
            let umaban = text(row, &format!("fukusho{}_umaban", i));
            let amount = parse_payout(&text(row, &format!("fukusho{}_haraimodoshikin", i)));
            if let Some(u) = norm_umaban(&umaban) {
                if amount > 0 {
                    payout.place.push((u, amount));
                }
            }
        }
        out.insert(race_code, payout);
    }
    Ok(out)
}
