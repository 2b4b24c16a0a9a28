//! Model evaluation: AUC / Brier / top-3 coverage, return simulations, the
//! composite promotion score, and old-vs-new comparison on a held-out year.

use sqlx::PgPool;
use std::collections::HashMap;
use std::path::Path;
use tracing::{info, warn};

use crate::db::odds_queries::win_odds_for_year;
use crate::db::payout_queries::{payouts_for_year, RacePayout};
use crate::error::{EngineError, EngineResult};
use crate::features::row::{FeatureRow, Features};
use crate::features::FeatureExtractor;
use crate::model::artifact;
use crate::model::ensemble::EnsembleModel;
use crate::models::Surface;

/// Rank-based AUC with tied-score handling.
pub fn auc(labels: &[f64], scores: &[f64]) -> f64 {
    assert_eq!(labels.len(), scores.len());
    let n_pos = labels.iter().filter(|&&l| l > 0.5).count();
    let n_neg = labels.len() - n_pos;
    if n_pos == 0 || n_neg == 0 {
        return 0.5;
    }

    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[a].partial_cmp(&scores[b]).unwrap_or(std::cmp::Ordering::Equal));

    // Average ranks over ties
    let mut ranks = vec![0.0f64; scores.len()];
    let mut i = 0usize;
    while i < order.len() {
        let mut j = i;
        while j + 1 < order.len() && scores[order[j + 1]] == scores[order[i]] {
            j += 1;
        }
        let avg_rank = (i + j) as f64 / 2.0 + 1.0;
        for &idx in &order[i..=j] {
            ranks[idx] = avg_rank;
        }
        i = j + 1;
    }

    let pos_rank_sum: f64 = labels
        .iter()
        .zip(&ranks)
        .filter(|(&l, _)| l > 0.5)
        .map(|(_, &r)| r)
        .sum();
    (pos_rank_sum - n_pos as f64 * (n_pos as f64 + 1.0) / 2.0) / (n_pos as f64 * n_neg as f64)
}

pub fn brier_score(labels: &[f64], probs: &[f64]) -> f64 {
    if labels.is_empty() {
        return 0.0;
    }
    labels
        .iter()
        .zip(probs)
        .map(|(&l, &p)| (p - l) * (p - l))
        .sum::<f64>()
        / labels.len() as f64
}

/// Fraction of races whose actual winner lands in the top 3 by score.
/// Races with fewer than 3 starters or no recorded winner are skipped.
pub fn top3_coverage(rows: &[FeatureRow], scores: &[f64], higher_is_better: bool) -> f64 {
    let mut by_race: HashMap<&str, Vec<usize>> = HashMap::new();
    for (i, row) in rows.iter().enumerate() {
        by_race.entry(row.race_code.as_str()).or_default().push(i);
    }

    let mut hits = 0usize;
    let mut total = 0usize;
    for indices in by_race.values() {
        if indices.len() < 3 {
            continue;
        }
        let winner = indices
            .iter()
            .find(|&&i| rows[i].target == Some(1.0))
            .copied();
        let winner = match winner {
            Some(w) => w,
            None => continue,
        };
        let mut sorted = indices.clone();
        sorted.sort_by(|&a, &b| {
            let cmp = scores[a].partial_cmp(&scores[b]).unwrap_or(std::cmp::Ordering::Equal);
            if higher_is_better {
                cmp.reverse()
            } else {
                cmp
            }
        });
        if sorted.iter().take(3).any(|&i| i == winner) {
            hits += 1;
        }
        total += 1;
    }
    if total > 0 {
        hits as f64 / total as f64
    } else {
        0.0
    }
}

#[derive(Debug, Clone, Default)]
pub struct ReturnStats {
    pub win_return: f64,
    pub place_return: f64,
    pub win_bet: i64,
    pub win_won: i64,
    pub place_bet: i64,
    pub place_won: i64,
}

/// Bet a fixed 100 on the top pick of every race, for win and place tickets.
pub fn simulate_returns(
    rows: &[FeatureRow],
    scores: &[f64],
    payouts: &HashMap<String, RacePayout>,
    higher_is_better: bool,
) -> ReturnStats {
    let mut by_race: HashMap<&str, Vec<usize>> = HashMap::new();
    for (i, row) in rows.iter().enumerate() {
        by_race.entry(row.race_code.as_str()).or_default().push(i);
    }

    let mut stats = ReturnStats::default();
    for (race_code, indices) in by_race {
        let top = indices.iter().copied().max_by(|&a, &b| {
            let cmp = scores[a].partial_cmp(&scores[b]).unwrap_or(std::cmp::Ordering::Equal);
            if higher_is_better {
                cmp
            } else {
                cmp.reverse()
            }
        });
        let top = match top {
            Some(t) => t,
            None => continue,
        };
        let pick = rows[top].umaban.to_string();
        let payout = match payouts.get(race_code) {
            Some(p) => p,
            None => continue,
        };

        stats.win_bet += 100;
        if payout.win_umaban.as_deref() == Some(pick.as_str()) {
            stats.win_won += payout.win_payout;
        }

        stats.place_bet += 100;
        if let Some((_, amount)) = payout.place.iter().find(|(u, _)| u == &pick) {
            stats.place_won += amount;
        }
    }

    if stats.win_bet > 0 {
        stats.win_return = stats.win_won as f64 / stats.win_bet as f64;
    }
    if stats.place_bet > 0 {
        stats.place_return = stats.place_won as f64 / stats.place_bet as f64;
    }
    stats
}

#[derive(Debug, Clone, Default)]
pub struct EvReturnStats {
    pub ev_return: f64,
    pub ev_bet_count: i64,
    pub ev_race_count: i64,
    pub ev_total_bet: i64,
    pub ev_total_won: i64,
}

/// Production-matching expected-value simulation: stake 100 on every horse
/// whose `p_win * odds` clears the threshold; settle from payouts.
pub fn simulate_ev_returns(
    rows: &[FeatureRow],
    win_probs: &[f64],
    odds: &HashMap<String, HashMap<String, f64>>,
    payouts: &HashMap<String, RacePayout>,
    ev_threshold: f64,
) -> EvReturnStats {
    let mut stats = EvReturnStats::default();
    let mut races_with_bets: std::collections::HashSet<&str> = std::collections::HashSet::new();

    for (i, row) in rows.iter().enumerate() {
        let race_odds = match odds.get(&row.race_code) {
            Some(o) => o,
            None => continue,
        };
        let umaban = row.umaban.to_string();
        let horse_odds = match race_odds.get(&umaban) {
            Some(&o) if o > 0.0 => o,
            _ => continue,
        };
        let p = win_probs[i];
        if p <= 0.0 || p * horse_odds < ev_threshold {
            continue;
        }

        stats.ev_total_bet += 100;
        stats.ev_bet_count += 1;
        races_with_bets.insert(row.race_code.as_str());

        if let Some(payout) = payouts.get(&row.race_code) {
            if payout.win_umaban.as_deref() == Some(umaban.as_str()) {
                stats.ev_total_won += payout.win_payout;
            }
        }
    }

    stats.ev_race_count = races_with_bets.len() as i64;
    if stats.ev_total_bet > 0 {
        stats.ev_return = stats.ev_total_won as f64 / stats.ev_total_bet as f64;
    }
    stats
}

#[derive(Debug, Clone, Default)]
pub struct ModelEvaluation {
    pub rmse: f64,
    pub win_auc: f64,
    pub quinella_auc: f64,
    pub place_auc: f64,
    pub top3_coverage: f64,
    pub win_return: f64,
    pub place_return: f64,
    pub ev_return: f64,
    pub ev_bet_count: i64,
    pub ev_race_count: i64,
}

/// Composite promotion score. AUCs enter rescaled to [0, 1] via
/// `(auc - 0.5) * 2`; returns enter as-is (1.0 = break-even).
pub fn composite_score(eval: &ModelEvaluation) -> f64 {
    let auc01 = |v: f64| (v - 0.5) * 2.0;
    auc01(eval.win_auc) * 0.25
        + auc01(eval.quinella_auc) * 0.15
        + auc01(eval.place_auc) * 0.15
        + eval.top3_coverage * 0.20
        + eval.win_return * 0.10
        + eval.place_return * 0.05
        + eval.ev_return * 0.10
}

/// Full evaluation of one artifact over a feature frame with payout data.
pub fn evaluate_model(
    model: &EnsembleModel,
    rows: &[FeatureRow],
    payouts: &HashMap<String, RacePayout>,
    odds: &HashMap<String, HashMap<String, f64>>,
    label: &str,
) -> ModelEvaluation {
    let higher_is_better = model.is_ranker();
    let bundle = model.predict_scores(rows);

    let mut eval = ModelEvaluation::default();

    // RMSE only means something for a regression head on finishing position
    if !higher_is_better {
        let mse: f64 = bundle
            .rank_scores
            .iter()
            .zip(rows)
            .map(|(&p, r)| {
                let t = r.target.unwrap_or(18.0);
                (p - t) * (p - t)
            })
            .sum::<f64>()
            / rows.len().max(1) as f64;
        eval.rmse = mse.sqrt();
    }

    let targets: Vec<f64> = rows.iter().map(|r| r.target.unwrap_or(99.0)).collect();
    let label_leq = |k: f64| -> Vec<f64> {
        targets
            .iter()
            .map(|&t| if t <= k { 1.0 } else { 0.0 })
            .collect()
    };

    if let Some(win_probs) = &bundle.win {
        eval.win_auc = auc(&label_leq(1.0), win_probs);
        let ev = simulate_ev_returns(rows, win_probs, odds, payouts, 1.5);
        eval.ev_return = ev.ev_return;
        eval.ev_bet_count = ev.ev_bet_count;
        eval.ev_race_count = ev.ev_race_count;
    } else {
        eval.win_auc = 0.5;
    }
    eval.quinella_auc = bundle
        .quinella
        .as_ref()
        .map(|p| auc(&label_leq(2.0), p))
        .unwrap_or(0.5);
    eval.place_auc = bundle
        .place
        .as_ref()
        .map(|p| auc(&label_leq(3.0), p))
        .unwrap_or(0.5);

    eval.top3_coverage = top3_coverage(rows, &bundle.rank_scores, higher_is_better);

    let returns = simulate_returns(rows, &bundle.rank_scores, payouts, higher_is_better);
    eval.win_return = returns.win_return;
    eval.place_return = returns.place_return;

    info!(
        "[{}] win_auc={:.4} quinella_auc={:.4} place_auc={:.4} top3={:.1}% \
         win_ret={:.1}% place_ret={:.1}% ev_ret={:.1}% ({} bets in {} races)",
        label,
        eval.win_auc,
        eval.quinella_auc,
        eval.place_auc,
        eval.top3_coverage * 100.0,
        eval.win_return * 100.0,
        eval.place_return * 100.0,
        eval.ev_return * 100.0,
        eval.ev_bet_count,
        eval.ev_race_count
    );

    eval
}

#[derive(Debug, Clone)]
pub struct ComparisonResult {
    pub old_eval: Option<ModelEvaluation>,
    pub new_eval: ModelEvaluation,
    pub old_score: f64,
    pub new_score: f64,
    pub improvement: f64,
    pub test_samples: usize,
    pub promote: bool,
}

/// Backtest old and new artifacts on a year strictly outside the training
/// window and decide promotion by composite score. Schema drift (old model
/// requires features the extractor no longer produces) adopts the new model
/// automatically.
pub async fn compare_models(
    pool: &PgPool,
    current_path: &Path,
    new_path: &Path,
    test_year: i32,
    surface: Surface,
) -> EngineResult<ComparisonResult> {
    info!(
        "Model comparison on backtest year {} [{}]",
        test_year,
        surface.as_str()
    );

    let new_model = artifact::load(new_path)?;
    let old_model = if current_path.exists() {
        Some(artifact::load(current_path)?)
    } else {
        None
    };

    let extractor = FeatureExtractor::new(pool);
    let rows = extractor.extract_year(test_year, surface, 10000).await?;
    if rows.is_empty() {
        return Err(EngineError::Training(format!(
            "no backtest data for year {}",
            test_year
        )));
    }
    info!("Backtest samples: {}", rows.len());

    let payouts = payouts_for_year(pool, test_year).await?;
    let odds = win_odds_for_year(pool, test_year).await?;

    let new_eval = evaluate_model(&new_model, &rows, &payouts, &odds, "new model");
    let new_score = composite_score(&new_eval);

    let old_eval = match &old_model {
        Some(old) => {
            let known: std::collections::HashSet<&str> = Features::NAMES.iter().copied().collect();
            let missing: Vec<&String> = old
                .feature_names
                .iter()
                .filter(|n| !known.contains(n.as_str()))
                .collect();
            if missing.is_empty() {
                Some(evaluate_model(old, &rows, &payouts, &odds, "old model"))
            } else {
                warn!(
                    "Old model requires {} features the schema no longer carries; adopting new model",
                    missing.len()
                );
                None
            }
        }
        None => None,
    };

    let (old_score, improvement, promote) = match &old_eval {
        Some(old) => {
            let old_score = composite_score(old);
            let improvement = new_score - old_score;
            (old_score, improvement, improvement > 0.0)
        }
        // No comparable old model: adopt
        None => (0.0, 1.0, true),
    };

    info!(
        "Composite scores: old={:.4}, new={:.4}, improvement={:+.4} ({})",
        old_score,
        new_score,
        improvement,
        if promote { "promote" } else { "keep old model" }
    );

    Ok(ComparisonResult {
        old_eval,
        new_eval,
        old_score,
        new_score,
        improvement,
        test_samples: rows.len(),
        promote,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(race: &str, umaban: u32, target: f64) -> FeatureRow {
        FeatureRow {
            race_code: race.to_string(),
            umaban,
            target: Some(target),
            ..Default::default()
        }
    }

    #[test]
    fn test_auc_perfect_and_random() {
        let labels = vec![1.0, 0.0, 1.0, 0.0];
        assert!((auc(&labels, &[0.9, 0.1, 0.8, 0.2]) - 1.0).abs() < 1e-9);
        assert!((auc(&labels, &[0.1, 0.9, 0.2, 0.8]) - 0.0).abs() < 1e-9);
        assert!((auc(&labels, &[0.5, 0.5, 0.5, 0.5]) - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_top3_coverage_counts_winner_in_top3() {
        let rows = vec![
            row("A", 1, 1.0),
            row("A", 2, 2.0),
            row("A", 3, 3.0),
            row("A", 4, 4.0),
            row("B", 1, 2.0),
            row("B", 2, 1.0),
            row("B", 3, 3.0),
            row("B", 4, 4.0),
        ];
        // Race A: winner scored highest. Race B: winner scored lowest of 4.
        let scores = vec![9.0, 5.0, 4.0, 1.0, 9.0, 0.5, 5.0, 4.0];
        assert!((top3_coverage(&rows, &scores, true) - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_ev_simulation_accounting() {
        // p_win 0.20 at odds 8.0 -> EV 1.6 >= 1.5, horse A wins paying 8000
        let rows = vec![row("R1", 7, 1.0), row("R1", 2, 2.0)];
        let win_probs = vec![0.20, 0.05];
        let mut odds = HashMap::new();
        odds.insert("R1".to_string(), {
            let mut o = HashMap::new();
            o.insert("7".to_string(), 8.0);
            o.insert("2".to_string(), 3.0);
            o
        });
        let mut payouts = HashMap::new();
        payouts.insert(
            "R1".to_string(),
            RacePayout {
                win_umaban: Some("7".to_string()),
                win_payout: 8000,
                place: vec![],
            },
        );

        let ev = simulate_ev_returns(&rows, &win_probs, &odds, &payouts, 1.5);
        assert_eq!(ev.ev_bet_count, 1);
        assert_eq!(ev.ev_total_bet, 100);
        assert_eq!(ev.ev_total_won, 8000);
        assert_eq!(ev.ev_race_count, 1);
        assert!((ev.ev_return - 80.0).abs() < 1e-9);
    }

    #[test]
    fn test_composite_score_promotion_decision() {
        // Old model scores 0.620, new model 0.612: keep the old one.
        let old = ModelEvaluation {
            win_auc: 0.80,
            quinella_auc: 0.75,
            place_auc: 0.75,
            top3_coverage: 0.60,
            win_return: 0.80,
            place_return: 0.80,
            ev_return: 0.90,
            ..Default::default()
        };
        let mut new = old.clone();
        new.top3_coverage = 0.56;

        let s_old = composite_score(&old);
        let s_new = composite_score(&new);
        assert!(s_new < s_old);
        assert!((s_old - s_new - 0.008).abs() < 1e-9);
    }

    #[test]
    fn test_simulate_returns_top_pick() {
        let rows = vec![row("R1", 1, 1.0), row("R1", 2, 2.0)];
        let scores = vec![2.0, 1.0];
        let mut payouts = HashMap::new();
        payouts.insert(
            "R1".to_string(),
            RacePayout {
                win_umaban: Some("1".to_string()),
                win_payout: 350,
                place: vec![("1".to_string(), 150), ("2".to_string(), 110)],
            },
        );
        let stats = simulate_returns(&rows, &scores, &payouts, true);
        assert_eq!(stats.win_won, 350);
        assert_eq!(stats.place_won, 150);
        assert!((stats.win_return - 3.5).abs() < 1e-9);
    }
}
