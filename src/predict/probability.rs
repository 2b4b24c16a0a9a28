//! Race-level probability derivation.
//!
//! Applied after calibration and any bias/track adjustments, so the sum
//! invariants always hold on the final output: win sums to 1, quinella to
//! min(2, N), place to min(3, N).

use crate::model::ensemble::ScoreBundle;

/// Per-horse probability bundle flowing through the adjusters.
#[derive(Debug, Clone, Default)]
pub struct HorseScore {
    pub horse_number: u32,
    pub rank_score: f64,
    pub win_probability: f64,
    pub quinella_probability: Option<f64>,
    pub place_probability: Option<f64>,
    pub win_ci_lower: Option<f64>,
    pub win_ci_upper: Option<f64>,
    pub bias_adjustment: f64,
    pub track_adjustment: f64,
}

/// Turn raw model output into per-horse scores. Legacy artifacts without
/// classifier heads fall back to `softmax(-rank_score)` win probabilities.
pub fn scores_from_bundle(horse_numbers: &[u32], bundle: &ScoreBundle) -> Vec<HorseScore> {
    let n = horse_numbers.len();
    let win = match &bundle.win {
        Some(w) => w.clone(),
        None => {
            let exps: Vec<f64> = bundle.rank_scores.iter().map(|&s| (-s).exp()).collect();
            let sum: f64 = exps.iter().sum();
            exps.iter()
                .map(|&e| if sum > 0.0 { e / sum } else { 1.0 / n as f64 })
                .collect()
        }
    };

    horse_numbers
        .iter()
        .enumerate()
        .map(|(i, &horse_number)| {
            let win_probability = win[i].min(1.0);
            // 95% band from the cross-family spread
            let spread = bundle.win_spread.as_ref().map(|s| s[i]);
            HorseScore {
                horse_number,
                rank_score: bundle.rank_scores[i],
                win_probability,
                quinella_probability: bundle.quinella.as_ref().map(|q| q[i].min(1.0)),
                place_probability: bundle.place.as_ref().map(|p| p[i].min(1.0)),
                win_ci_lower: spread.map(|s| (win_probability - 1.96 * s).max(0.0)),
                win_ci_upper: spread.map(|s| (win_probability + 1.96 * s).min(1.0)),
                bias_adjustment: 0.0,
                track_adjustment: 0.0,
            }
        })
        .collect()
}

/// Scale each probability family to its race-level target sum.
pub fn normalize_race(scores: &mut [HorseScore]) {
    let n = scores.len();
    if n == 0 {
        return;
    }

    let win_sum: f64 = scores.iter().map(|s| s.win_probability).sum();
    if win_sum > 0.0 {
        for s in scores.iter_mut() {
            s.win_probability /= win_sum;
        }
    }

    let quinella_target = 2.0f64.min(n as f64);
    let quinella_sum: f64 = scores.iter().filter_map(|s| s.quinella_probability).sum();
    if quinella_sum > 0.0 {
        for s in scores.iter_mut() {
            if let Some(q) = s.quinella_probability.as_mut() {
                *q *= quinella_target / quinella_sum;
            }
        }
    }

    let place_target = 3.0f64.min(n as f64);
    let place_sum: f64 = scores.iter().filter_map(|s| s.place_probability).sum();
    if place_sum > 0.0 {
        for s in scores.iter_mut() {
            if let Some(p) = s.place_probability.as_mut() {
                *p *= place_target / place_sum;
            }
        }
    }
}

/// First/second/third/out-of-place masses for one horse.
///
/// With both classifier heads the masses come straight from the probability
/// differences; the legacy split shares the residual place mass between
/// second and third with rank-dependent weights. A regressor-only artifact
/// carries no classifier mass to split, so second and third stay absent and
/// the residual is everything beyond the win probability.
pub fn position_distribution(
    win: f64,
    quinella: Option<f64>,
    place: Option<f64>,
    rank: usize,
) -> (f64, Option<f64>, Option<f64>, f64) {
    let first = win;
    let (second, third) = match (quinella, place) {
        (Some(q), Some(p)) => (Some((q - first).max(0.0)), Some((p - q).max(0.0))),
        (None, Some(p)) => {
            let remaining = (p - first).max(0.0);
            let second_share = if rank <= 3 {
                0.55
            } else if rank <= 6 {
                0.5
            } else {
                0.45
            };
            (
                Some(remaining * second_share),
                Some(remaining * (1.0 - second_share)),
            )
        }
        _ => (None, None),
    };
    let out = (1.0 - first - second.unwrap_or(0.0) - third.unwrap_or(0.0)).max(0.0);
    (first, second, third, out)
}

/// Confidence from the win-probability gap to the next horse; the last
/// horse gets the neutral 0.5.
pub fn horse_confidence(gap_to_next: Option<f64>) -> f64 {
    match gap_to_next {
        Some(gap) => (0.5 + gap * 5.0).clamp(0.1, 0.95),
        None => 0.5,
    }
}

/// Race-level confidence from the margin at the top of the board.
pub fn race_confidence(sorted_win_probs: &[f64]) -> f64 {
    if sorted_win_probs.len() < 2 {
        return 0.5;
    }
    let top1 = sorted_win_probs[0];
    let top2 = sorted_win_probs[1];
    let gap_ratio = (top1 - top2) / top1.max(0.01);
    (0.4 + gap_ratio * 0.5 + top1).min(0.95)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_scores(win: &[f64], quinella: &[f64], place: &[f64]) -> Vec<HorseScore> {
        win.iter()
            .enumerate()
            .map(|(i, &w)| HorseScore {
                horse_number: i as u32 + 1,
                win_probability: w,
                quinella_probability: Some(quinella[i]),
                place_probability: Some(place[i]),
                ..Default::default()
            })
            .collect()
    }

    #[test]
    fn test_normalization_invariants() {
        // The worked five-horse example: quinella sums 2.20, place 3.15
        let mut scores = make_scores(
            &[0.40, 0.25, 0.15, 0.12, 0.08],
            &[0.70, 0.55, 0.40, 0.30, 0.25],
            &[0.80, 0.70, 0.60, 0.55, 0.50],
        );
        normalize_race(&mut scores);

        let win_sum: f64 = scores.iter().map(|s| s.win_probability).sum();
        let quinella_sum: f64 = scores.iter().filter_map(|s| s.quinella_probability).sum();
        let place_sum: f64 = scores.iter().filter_map(|s| s.place_probability).sum();
        assert!((win_sum - 1.0).abs() < 1e-6);
        assert!((quinella_sum - 2.0).abs() < 1e-6);
        assert!((place_sum - 3.0).abs() < 1e-6);

        // Horse 1's distribution is consistent and non-negative
        let s = &scores[0];
        let (first, second, third, out) = position_distribution(
            s.win_probability,
            s.quinella_probability,
            s.place_probability,
            1,
        );
        let second = second.unwrap();
        let third = third.unwrap();
        assert!((first - s.win_probability).abs() < 1e-12);
        assert!(
            (second - (s.quinella_probability.unwrap() - s.win_probability)).abs() < 1e-12
        );
        assert!(
            (third - (s.place_probability.unwrap() - s.quinella_probability.unwrap())).abs()
                < 1e-12
        );
        assert!(first >= 0.0 && second >= 0.0 && third >= 0.0 && out >= 0.0);
        assert!((first + second + third + out - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_single_starter_degenerates_to_certainty() {
        let mut scores = make_scores(&[0.42], &[0.6], &[0.7]);
        normalize_race(&mut scores);
        assert!((scores[0].win_probability - 1.0).abs() < 1e-9);
        assert!((scores[0].quinella_probability.unwrap() - 1.0).abs() < 1e-9);
        assert!((scores[0].place_probability.unwrap() - 1.0).abs() < 1e-9);
        let (first, ..) = position_distribution(1.0, Some(1.0), Some(1.0), 1);
        assert!((first - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_legacy_residual_split_by_rank() {
        // place 0.5, win 0.1 -> residual 0.4
        let (_, second, third, _) = position_distribution(0.1, None, Some(0.5), 1);
        assert!((second.unwrap() - 0.4 * 0.55).abs() < 1e-9);
        assert!((third.unwrap() - 0.4 * 0.45).abs() < 1e-9);

        let (_, second, third, _) = position_distribution(0.1, None, Some(0.5), 9);
        assert!((second.unwrap() - 0.4 * 0.45).abs() < 1e-9);
        assert!((third.unwrap() - 0.4 * 0.55).abs() < 1e-9);
    }

    #[test]
    fn test_regressor_only_skips_quinella_and_place() {
        // No classifier heads at all: second/third are absent, not invented
        let (first, second, third, out) = position_distribution(0.2, None, None, 1);
        assert_eq!(first, 0.2);
        assert!(second.is_none());
        assert!(third.is_none());
        assert!((out - 0.8).abs() < 1e-12);
    }

    #[test]
    fn test_softmax_fallback_orders_by_score() {
        // Legacy regressor: lower rank score is better
        let bundle = ScoreBundle {
            rank_scores: vec![1.0, 3.0, 2.0],
            ..Default::default()
        };
        let scores = scores_from_bundle(&[1, 2, 3], &bundle);
        assert!(scores[0].win_probability > scores[2].win_probability);
        assert!(scores[2].win_probability > scores[1].win_probability);
        let sum: f64 = scores.iter().map(|s| s.win_probability).sum();
        assert!((sum - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_confidence_bounds() {
        assert_eq!(horse_confidence(None), 0.5);
        assert_eq!(horse_confidence(Some(0.0)), 0.5);
        assert_eq!(horse_confidence(Some(1.0)), 0.95);
        assert!((horse_confidence(Some(0.02)) - 0.6).abs() < 1e-9);

        assert!(race_confidence(&[0.9, 0.05]) <= 0.95);
        assert_eq!(race_confidence(&[1.0]), 0.5);
    }
}
