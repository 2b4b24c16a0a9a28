//! Pre-race odds queries.
//!
//! Odds values are stored as 10x fixed-point text ("85" = 8.5).

use serde::Serialize;
use sqlx::PgPool;
use std::collections::HashMap;

use crate::db::text;
use crate::error::EngineResult;
use crate::models::TicketType;

#[derive(Debug, Clone, Serialize)]
pub struct OddsEntry {
    /// Horse number, or "n-m" combination for quinella
    pub combination: String,
    pub odds: f64,
    pub ninkijun: u32,
}

fn parse_odds(raw: &str) -> Option<f64> {
    let v: f64 = raw.trim().parse().ok()?;
    if v > 0.0 {
        Some(v / 10.0)
    } else {
        None
    }
}

/// Latest odds snapshot for one race and ticket type.
pub async fn get_odds(
    pool: &PgPool,
    race_code: &str,
    ticket_type: TicketType,
) -> EngineResult<Vec<OddsEntry>> {
    let (sql, combo_cols): (&str, &[&str]) = match ticket_type {
        TicketType::Win => (
            "SELECT umaban, odds, tansho_ninkijun AS ninkijun FROM odds1_tansho \
             WHERE race_code = $1 ORDER BY umaban::int",
            &["umaban"],
        ),
        TicketType::Place => (
            "SELECT umaban, odds_saitei AS odds, fukusho_ninkijun AS ninkijun FROM odds1_fukusho \
             WHERE race_code = $1 ORDER BY umaban::int",
            &["umaban"],
        ),
        TicketType::Quinella => (
            "SELECT kumiban_1 AS umaban, kumiban_2 AS umaban2, odds, umaren_ninkijun AS ninkijun \
             FROM odds2_umaren WHERE race_code = $1 ORDER BY odds::int",
            &["umaban", "umaban2"],
        ),
    };

    let rows = sqlx::query(sql).bind(race_code).fetch_all(pool).await?;

    let mut out = Vec::with_capacity(rows.len());
    for row in &rows {
        let odds = match parse_odds(&text(row, "odds")) {
            Some(o) => o,
            None => continue,
        };
        let combination = combo_cols
            .iter()
            .map(|c| text(row, c).trim().trim_start_matches('0').to_string())
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join("-");
        let ninkijun = text(row, "ninkijun").trim().parse().unwrap_or(0);
        out.push(OddsEntry {
            combination,
            odds,
            ninkijun,
        });
    }
    Ok(out)
}

/// Win odds for every race of a year: race_code -> horse number -> odds.
/// Feeds the expected-value betting simulation in the evaluator.
pub async fn win_odds_for_year(
    pool: &PgPool,
    year: i32,
) -> EngineResult<HashMap<String, HashMap<String, f64>>> {
    let sql = "SELECT race_code, umaban, odds FROM odds1_tansho \
               WHERE SUBSTRING(race_code, 1, 4) = $1";
    let rows = sqlx::query(sql)
        .bind(year.to_string())
        .fetch_all(pool)
        .await?;

    let mut out: HashMap<String, HashMap<String, f64>> = HashMap::new();
    for row in &rows {
        let race_code = text(row, "race_code");
        let umaban = text(row, "umaban").trim().to_string();
        if let Some(odds) = parse_odds(&text(row, "odds")) {
            out.entry(race_code)
                .or_default()
                .insert(umaban.trim_start_matches('0').to_string(), odds);
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_odds_fixed_point() {
        assert_eq!(parse_odds("85"), Some(8.5));
        assert_eq!(parse_odds(" 0012 "), Some(1.2));
        assert_eq!(parse_odds("0"), None);
        assert_eq!(parse_odds(""), None);
    }
}
