//! Daily bias adjustment.
//!
//! Conservative linear reweighting from within-meeting signals (post
//! position bias, jockey day form) observed earlier on the race day. The
//! base model stays stationary; this injects short-horizon context the
//! weekly retrain cannot capture.

use chrono::{Datelike, NaiveDate, Weekday};
use parking_lot::RwLock;
use sqlx::PgPool;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

use crate::db::bias_queries::{load_bias_snapshot, BiasSnapshot};
use crate::error::EngineResult;
use crate::models::{race_code_date, race_code_venue, EntryInfo};
use crate::predict::probability::HorseScore;

/// Per-process snapshot cache. Read-mostly; the first successful load for a
/// date wins and negative results are cached too.
#[derive(Clone, Default)]
pub struct BiasCache {
    inner: Arc<RwLock<HashMap<NaiveDate, Option<Arc<BiasSnapshot>>>>>,
}

impl BiasCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get_or_load(
        &self,
        pool: &PgPool,
        date: NaiveDate,
    ) -> EngineResult<Option<Arc<BiasSnapshot>>> {
        if let Some(cached) = self.inner.read().get(&date) {
            return Ok(cached.clone());
        }
        let snapshot = load_bias_snapshot(pool, date).await?.map(Arc::new);
        let mut guard = self.inner.write();
        let entry = guard.entry(date).or_insert_with(|| snapshot.clone());
        Ok(entry.clone())
    }
}

/// Bias date resolution: explicit parameter, then the environment-configured
/// date, then auto-detection — Sunday races fall back to the preceding
/// Saturday's snapshot.
pub fn resolve_bias_date(
    param: Option<&str>,
    configured: Option<&str>,
    race_code: &str,
) -> Option<NaiveDate> {
    if let Some(raw) = param.or(configured) {
        return NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok();
    }
    let race_date = race_code_date(race_code)?;
    if race_date.weekday() == Weekday::Sun {
        return Some(race_date - chrono::Duration::days(1));
    }
    None
}

/// Apply the daily bias to per-horse scores. A snapshot without an entry
/// for this venue leaves every score untouched.
pub fn apply_bias(
    scores: &mut [HorseScore],
    race_code: &str,
    entries: &[EntryInfo],
    snapshot: &BiasSnapshot,
) {
    let venue = race_code_venue(race_code);
    let venue_bias = match snapshot.venue_biases.get(venue) {
        Some(vb) => vb,
        None => {
            debug!("No venue bias for venue {}", venue);
            return;
        }
    };
    info!(
        "Applying daily bias: venue={}, waku={:.3}, pace={:.3}",
        venue, venue_bias.waku_bias, venue_bias.pace_bias
    );

    let by_number: HashMap<u32, &EntryInfo> =
        entries.iter().map(|e| (e.horse_number(), e)).collect();

    for score in scores.iter_mut() {
        let entry = match by_number.get(&score.horse_number) {
            Some(e) => e,
            None => continue,
        };

        let mut adjustment = 0.0;

        // Post position: inner gates profit from a positive waku bias
        if let Ok(waku) = entry.wakuban.trim().parse::<u32>() {
            if (1..=4).contains(&waku) {
                adjustment += venue_bias.waku_bias * 0.02;
            } else if waku >= 5 {
                adjustment -= venue_bias.waku_bias * 0.02;
            }
        }

        // Jockeys riding well today
        if let Some(form) = snapshot.jockey_performances.get(&entry.kishu_code) {
            adjustment += form.win_rate * 0.03;
            adjustment += form.top3_rate * 0.01;
        }

        score.rank_score -= adjustment;
        let factor = 1.0 + adjustment * 2.0;
        score.win_probability = (score.win_probability * factor).clamp(0.001, 0.99);
        if let Some(q) = score.quinella_probability.as_mut() {
            *q = (*q * factor).clamp(0.001, 0.99);
        }
        if let Some(p) = score.place_probability.as_mut() {
            *p = (*p * factor).clamp(0.001, 0.99);
        }
        // Confidence-interval bounds move with the same factor
        if let Some(lo) = score.win_ci_lower.as_mut() {
            *lo = (*lo * factor).max(0.0);
        }
        if let Some(hi) = score.win_ci_upper.as_mut() {
            *hi = (*hi * factor).min(1.0);
        }
        score.bias_adjustment = adjustment;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::bias_queries::{JockeyDayForm, VenueBias};

    fn entry(umaban: &str, wakuban: &str, kishu: &str) -> EntryInfo {
        EntryInfo {
            umaban: umaban.to_string(),
            wakuban: wakuban.to_string(),
            kishu_code: kishu.to_string(),
            ..Default::default()
        }
    }

    fn score(n: u32, win: f64) -> HorseScore {
        HorseScore {
            horse_number: n,
            rank_score: 1.0,
            win_probability: win,
            ..Default::default()
        }
    }

    fn snapshot_with_waku(venue: &str, waku_bias: f64) -> BiasSnapshot {
        let mut snapshot = BiasSnapshot::default();
        snapshot.venue_biases.insert(
            venue.to_string(),
            VenueBias {
                waku_bias,
                pace_bias: 0.0,
            },
        );
        snapshot
    }

    #[test]
    fn test_inner_and_outer_post_adjustment() {
        // waku_bias +0.5: post 2 gains 0.01, post 7 loses 0.01
        let race_code = "2025012506010911";
        let entries = vec![entry("01", "2", "J1"), entry("02", "7", "J2")];
        let mut scores = vec![score(1, 0.10), score(2, 0.10)];
        let snapshot = snapshot_with_waku("06", 0.5);

        apply_bias(&mut scores, race_code, &entries, &snapshot);

        assert!((scores[0].bias_adjustment - 0.01).abs() < 1e-12);
        assert!((scores[0].win_probability - 0.102).abs() < 1e-12);
        assert!((scores[1].bias_adjustment + 0.01).abs() < 1e-12);
        assert!((scores[1].win_probability - 0.098).abs() < 1e-12);
        // rank score moves against the adjustment
        assert!((scores[0].rank_score - 0.99).abs() < 1e-12);
    }

    #[test]
    fn test_jockey_day_form_contribution() {
        let race_code = "2025012506010911";
        let entries = vec![entry("01", "5", "HOT")];
        let mut scores = vec![score(1, 0.10)];
        let mut snapshot = snapshot_with_waku("06", 0.0);
        snapshot.jockey_performances.insert(
            "HOT".to_string(),
            JockeyDayForm {
                win_rate: 0.5,
                top3_rate: 0.8,
            },
        );

        apply_bias(&mut scores, race_code, &entries, &snapshot);
        // 0.5*0.03 + 0.8*0.01 = 0.023
        assert!((scores[0].bias_adjustment - 0.023).abs() < 1e-12);
    }

    #[test]
    fn test_empty_snapshot_is_identity_twice() {
        let race_code = "2025012506010911";
        let entries = vec![entry("01", "2", "J1")];
        let mut scores = vec![score(1, 0.25)];
        let snapshot = BiasSnapshot::default();

        apply_bias(&mut scores, race_code, &entries, &snapshot);
        apply_bias(&mut scores, race_code, &entries, &snapshot);
        assert_eq!(scores[0].win_probability, 0.25);
        assert_eq!(scores[0].bias_adjustment, 0.0);
    }

    #[test]
    fn test_bias_date_resolution_order() {
        // Sunday 2025-01-26 at Nakayama
        let sunday_race = "2025012606010911";
        assert_eq!(
            resolve_bias_date(Some("2025-01-20"), None, sunday_race),
            NaiveDate::from_ymd_opt(2025, 1, 20)
        );
        assert_eq!(
            resolve_bias_date(None, Some("2025-01-21"), sunday_race),
            NaiveDate::from_ymd_opt(2025, 1, 21)
        );
        // auto: Sunday falls back to Saturday
        assert_eq!(
            resolve_bias_date(None, None, sunday_race),
            NaiveDate::from_ymd_opt(2025, 1, 25)
        );
        // Saturday race: no auto-detection
        assert_eq!(resolve_bias_date(None, None, "2025012506010911"), None);
    }
}
