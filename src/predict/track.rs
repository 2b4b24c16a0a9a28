//! Track-condition adjustment, applied to final predictions only.
//!
//! The step constants are kept bit-identical across implementations so
//! backtests stay comparable; do not re-tune them without a paired
//! evaluation.

use std::collections::HashMap;
use tracing::info;

use crate::db::condition_queries::{ConditionRecord, TrackCondition};
use crate::models::EntryInfo;
use crate::predict::probability::HorseScore;

/// Per-horse delta for the current condition.
fn condition_delta(condition: u8, record: Option<&ConditionRecord>) -> f64 {
    let mut adjustment = 0.0;

    match record {
        Some(rec) if rec.runs >= 2 => {
            if condition >= 2 {
                if rec.win_rate > 0.15 {
                    adjustment += 0.03;
                } else if rec.win_rate > 0.05 {
                    adjustment += 0.01;
                }
                if rec.top3_rate > 0.4 {
                    adjustment += 0.02;
                } else if rec.top3_rate > 0.2 {
                    adjustment += 0.01;
                }
                if rec.runs >= 5 {
                    adjustment += 0.01;
                }
            }
        }
        Some(_) => {}
        None => {
            // Unproven in the wet
            if condition >= 2 {
                adjustment -= 0.02;
            }
        }
    }

    adjustment
}

/// Reweight scores by each horse's record on the current surface state.
/// Renormalization afterwards restores the race-level sum invariants.
pub fn apply_track_adjustment(
    scores: &mut [HorseScore],
    entries: &[EntryInfo],
    condition: &TrackCondition,
    records: &HashMap<String, ConditionRecord>,
) {
    let by_number: HashMap<u32, &EntryInfo> =
        entries.iter().map(|e| (e.horse_number(), e)).collect();

    let mut adjusted = 0usize;
    for score in scores.iter_mut() {
        let entry = match by_number.get(&score.horse_number) {
            Some(e) => e,
            None => continue,
        };
        let record = records.get(&entry.ketto_toroku_bango);
        let adjustment = condition_delta(condition.condition, record);
        if adjustment != 0.0 {
            adjusted += 1;
        }

        score.rank_score -= adjustment;
        score.win_probability =
            (score.win_probability * (1.0 + adjustment * 3.0)).clamp(0.001, 0.99);
        if let Some(q) = score.quinella_probability.as_mut() {
            *q = (*q * (1.0 + adjustment * 2.5)).clamp(0.005, 0.99);
        }
        if let Some(p) = score.place_probability.as_mut() {
            *p = (*p * (1.0 + adjustment * 2.0)).clamp(0.01, 0.99);
        }
        score.track_adjustment = adjustment;
    }

    info!(
        "Track condition adjustment: {} ({}), adjusted horses={}",
        condition.condition_name(),
        condition.condition,
        adjusted
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Surface;

    fn wet_condition() -> TrackCondition {
        TrackCondition {
            surface: Surface::Turf,
            condition: 3,
            weather: 3,
        }
    }

    #[test]
    fn test_proven_mudder_gets_full_bonus() {
        // win 20%, top3 50%, 6 runs: 0.03 + 0.02 + 0.01
        let rec = ConditionRecord {
            runs: 6,
            win_rate: 0.20,
            top3_rate: 0.50,
        };
        assert!((condition_delta(3, Some(&rec)) - 0.06).abs() < 1e-12);
    }

    #[test]
    fn test_mild_record_gets_small_bonus() {
        let rec = ConditionRecord {
            runs: 3,
            win_rate: 0.10,
            top3_rate: 0.25,
        };
        assert!((condition_delta(2, Some(&rec)) - 0.02).abs() < 1e-12);
    }

    #[test]
    fn test_unproven_in_wet_penalized() {
        assert!((condition_delta(2, None) + 0.02).abs() < 1e-12);
        // On a good track there is nothing to penalize
        assert_eq!(condition_delta(1, None), 0.0);
    }

    #[test]
    fn test_single_run_is_ignored() {
        let rec = ConditionRecord {
            runs: 1,
            win_rate: 1.0,
            top3_rate: 1.0,
        };
        assert_eq!(condition_delta(3, Some(&rec)), 0.0);
    }

    #[test]
    fn test_apply_scales_families_differently() {
        let entries = vec![EntryInfo {
            umaban: "01".to_string(),
            ketto_toroku_bango: "K1".to_string(),
            ..Default::default()
        }];
        let mut scores = vec![HorseScore {
            horse_number: 1,
            rank_score: 1.0,
            win_probability: 0.10,
            quinella_probability: Some(0.20),
            place_probability: Some(0.30),
            ..Default::default()
        }];
        let mut records = HashMap::new();
        records.insert(
            "K1".to_string(),
            ConditionRecord {
                runs: 6,
                win_rate: 0.20,
                top3_rate: 0.50,
            },
        );

        apply_track_adjustment(&mut scores, &entries, &wet_condition(), &records);

        let s = &scores[0];
        assert!((s.track_adjustment - 0.06).abs() < 1e-12);
        assert!((s.win_probability - 0.10 * 1.18).abs() < 1e-12);
        assert!((s.quinella_probability.unwrap() - 0.20 * 1.15).abs() < 1e-12);
        assert!((s.place_probability.unwrap() - 0.30 * 1.12).abs() < 1e-12);
        assert!((s.rank_score - 0.94).abs() < 1e-12);
    }
}
