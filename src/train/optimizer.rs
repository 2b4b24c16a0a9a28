//! Ensemble-weight optimization and hyperparameter search.
//!
//! Weights: Nelder-Mead on the 3-simplex minimizing Brier loss of the win
//! head, clipped to [0.1, 0.6] and renormalized. Hyperparameters: an
//! adaptive Parzen-style sampler (random startup trials, then draws around
//! the good half) with median pruning and a wall-clock budget.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::model::ensemble::EnsembleWeights;

/// Standard Nelder-Mead simplex minimization.
pub fn nelder_mead<F>(f: F, x0: &[f64], max_iter: usize) -> Vec<f64>
where
    F: Fn(&[f64]) -> f64,
{
    let n = x0.len();
    let (alpha, gamma, rho, sigma) = (1.0, 2.0, 0.5, 0.5);

    let mut simplex: Vec<Vec<f64>> = vec![x0.to_vec()];
    for i in 0..n {
        let mut p = x0.to_vec();
        p[i] += if p[i].abs() > 1e-9 { 0.05 * p[i] } else { 0.00025 };
        simplex.push(p);
    }
    let mut values: Vec<f64> = simplex.iter().map(|p| f(p)).collect();

    for _ in 0..max_iter {
        // Order vertices best to worst
        let mut order: Vec<usize> = (0..simplex.len()).collect();
        order.sort_by(|&a, &b| values[a].partial_cmp(&values[b]).unwrap_or(std::cmp::Ordering::Equal));
        simplex = order.iter().map(|&i| simplex[i].clone()).collect();
        values = order.iter().map(|&i| values[i]).collect();

        if (values[n] - values[0]).abs() < 1e-10 {
            break;
        }

        // Centroid of all but the worst
        let centroid: Vec<f64> = (0..n)
            .map(|j| simplex[..n].iter().map(|p| p[j]).sum::<f64>() / n as f64)
            .collect();

        let reflect: Vec<f64> = (0..n)
            .map(|j| centroid[j] + alpha * (centroid[j] - simplex[n][j]))
            .collect();
        let fr = f(&reflect);

        if fr < values[0] {
            let expand: Vec<f64> = (0..n)
                .map(|j| centroid[j] + gamma * (reflect[j] - centroid[j]))
                .collect();
            let fe = f(&expand);
            if fe < fr {
                simplex[n] = expand;
                values[n] = fe;
            } else {
                simplex[n] = reflect;
                values[n] = fr;
            }
        } else if fr < values[n - 1] {
            simplex[n] = reflect;
            values[n] = fr;
        } else {
            let contract: Vec<f64> = (0..n)
                .map(|j| centroid[j] + rho * (simplex[n][j] - centroid[j]))
                .collect();
            let fc = f(&contract);
            if fc < values[n] {
                simplex[n] = contract;
                values[n] = fc;
            } else {
                // Shrink toward the best vertex
                for i in 1..=n {
                    for j in 0..n {
                        simplex[i][j] = simplex[0][j] + sigma * (simplex[i][j] - simplex[0][j]);
                    }
                    values[i] = f(&simplex[i]);
                }
            }
        }
    }

    let best = values
        .iter()
        .enumerate()
        .min_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(i, _)| i)
        .unwrap_or(0);
    simplex[best].clone()
}

/// Optimize blend weights by minimizing Brier loss of the blended win
/// probabilities over the calibration split.
pub fn optimize_ensemble_weights(
    hist_probs: &[f64],
    leafwise_probs: &[f64],
    ordered_probs: &[f64],
    y_true: &[f64],
) -> EnsembleWeights {
    let brier = |w: &[f64]| -> f64 {
        let sum: f64 = w.iter().map(|v| v.abs()).sum();
        if sum <= 0.0 {
            return 1.0;
        }
        let wn: Vec<f64> = w.iter().map(|v| v.abs() / sum).collect();
        hist_probs
            .iter()
            .zip(leafwise_probs)
            .zip(ordered_probs)
            .zip(y_true)
            .map(|(((&h, &l), &o), &t)| {
                let p = h * wn[0] + l * wn[1] + o * wn[2];
                (p - t) * (p - t)
            })
            .sum::<f64>()
            / y_true.len().max(1) as f64
    };

    let solution = nelder_mead(brier, &[0.33, 0.34, 0.33], 200);

    let clipped: Vec<f64> = solution.iter().map(|v| v.abs().clamp(0.1, 0.6)).collect();
    let sum: f64 = clipped.iter().sum();
    let weights = EnsembleWeights {
        hist: clipped[0] / sum,
        leafwise: clipped[1] / sum,
        ordered: clipped[2] / sum,
    };
    info!(
        "Optimized ensemble weights: hist={:.3}, leafwise={:.3}, ordered={:.3}",
        weights.hist, weights.leafwise, weights.ordered
    );
    weights
}

/// One hyperparameter sample.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrialParams {
    pub n_estimators: usize,
    pub max_depth: usize,
    pub learning_rate: f64,
    pub subsample: f64,
    pub colsample_bytree: f64,
    pub min_child_weight: f64,
}

impl Default for TrialParams {
    fn default() -> Self {
        Self {
            n_estimators: 400,
            max_depth: 6,
            learning_rate: 0.05,
            subsample: 0.9,
            colsample_bytree: 0.9,
            min_child_weight: 3.0,
        }
    }
}

struct CompletedTrial {
    params: TrialParams,
    score: f64,
    stage1: f64,
}

/// Search driver. `stage1` scores the cheap ranking stage (used for median
/// pruning); `full` finishes the trial and returns the composite objective.
pub struct HyperSearch {
    pub n_trials: usize,
    pub time_budget: Duration,
    pub seed: u64,
    pub startup_trials: usize,
}

impl Default for HyperSearch {
    fn default() -> Self {
        Self {
            n_trials: 30,
            time_budget: Duration::from_secs(90 * 60),
            seed: 42,
            startup_trials: 8,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SearchOutcome {
    pub best: TrialParams,
    pub best_score: f64,
    pub completed: usize,
    pub pruned: usize,
}

impl HyperSearch {
    fn sample_random(rng: &mut ChaCha8Rng) -> TrialParams {
        TrialParams {
            n_estimators: 200 + rng.gen_range(0..7) * 100,
            max_depth: rng.gen_range(4..=10),
            // log-uniform over [0.01, 0.2]
            learning_rate: (0.01f64.ln() + rng.gen::<f64>() * (0.2f64 / 0.01).ln()).exp(),
            subsample: rng.gen_range(0.6..=1.0),
            colsample_bytree: rng.gen_range(0.6..=1.0),
            min_child_weight: rng.gen_range(1..=7) as f64,
        }
    }

    fn sample_near(rng: &mut ChaCha8Rng, good: &TrialParams) -> TrialParams {
        let jitter = |rng: &mut ChaCha8Rng, v: f64, scale: f64, lo: f64, hi: f64| {
            // Two uniform draws approximate a narrow kernel around v
            let noise = (rng.gen::<f64>() + rng.gen::<f64>() - 1.0) * scale;
            (v + noise).clamp(lo, hi)
        };
        TrialParams {
            n_estimators: ((jitter(rng, good.n_estimators as f64, 150.0, 200.0, 800.0) / 100.0)
                .round() as usize)
                * 100,
            max_depth: jitter(rng, good.max_depth as f64, 1.5, 4.0, 10.0).round() as usize,
            learning_rate: jitter(rng, good.learning_rate, 0.02, 0.01, 0.2),
            subsample: jitter(rng, good.subsample, 0.1, 0.6, 1.0),
            colsample_bytree: jitter(rng, good.colsample_bytree, 0.1, 0.6, 1.0),
            min_child_weight: jitter(rng, good.min_child_weight, 1.0, 1.0, 7.0).round(),
        }
    }

    /// Run the search. Returns the best parameters seen; falls back to
    /// defaults when every trial failed or was pruned.
    pub fn run<S, F>(&self, stage1: S, full: F) -> SearchOutcome
    where
        S: Fn(&TrialParams) -> Option<f64>,
        F: Fn(&TrialParams, f64) -> Option<f64>,
    {
        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
        let start = Instant::now();
        let mut completed: Vec<CompletedTrial> = Vec::new();
        let mut pruned = 0usize;

        for trial in 0..self.n_trials {
            if start.elapsed() >= self.time_budget {
                info!("Hyperparameter search stopped at trial {} (time budget)", trial);
                break;
            }

            let params = if completed.len() < self.startup_trials {
                Self::sample_random(&mut rng)
            } else {
                // Sample around a random member of the good half
                let mut sorted: Vec<&CompletedTrial> = completed.iter().collect();
                sorted.sort_by(|a, b| {
                    b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal)
                });
                let good = &sorted[rng.gen_range(0..(sorted.len() / 2).max(1))];
                Self::sample_near(&mut rng, &good.params)
            };

            let stage1_score = match stage1(&params) {
                Some(s) => s,
                None => {
                    debug!("  trial {} failed in ranking stage", trial);
                    continue;
                }
            };

            // Median pruning after the startup phase
            if completed.len() >= 5 {
                let mut stage1_values: Vec<f64> = completed.iter().map(|t| t.stage1).collect();
                stage1_values
                    .sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
                let median = stage1_values[stage1_values.len() / 2];
                if stage1_score < median {
                    pruned += 1;
                    debug!(
                        "  trial {} pruned: stage1 {:.4} < median {:.4}",
                        trial, stage1_score, median
                    );
                    continue;
                }
            }

            if let Some(score) = full(&params, stage1_score) {
                info!("  trial {}: score={:.4} {:?}", trial, score, params);
                completed.push(CompletedTrial {
                    params,
                    score,
                    stage1: stage1_score,
                });
            }
        }

        let best = completed
            .iter()
            .max_by(|a, b| a.score.partial_cmp(&b.score).unwrap_or(std::cmp::Ordering::Equal));
        match best {
            Some(t) => SearchOutcome {
                best: t.params.clone(),
                best_score: t.score,
                completed: completed.len(),
                pruned,
            },
            None => SearchOutcome {
                best: TrialParams::default(),
                best_score: 0.0,
                completed: 0,
                pruned,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nelder_mead_minimizes_quadratic() {
        let f = |x: &[f64]| (x[0] - 2.0).powi(2) + (x[1] + 1.0).powi(2);
        let solution = nelder_mead(f, &[0.0, 0.0], 300);
        assert!((solution[0] - 2.0).abs() < 1e-3);
        assert!((solution[1] + 1.0).abs() < 1e-3);
    }

    #[test]
    fn test_weight_optimization_prefers_better_model() {
        // hist predicts the labels perfectly, the others are noise
        let y: Vec<f64> = (0..200).map(|i| if i % 4 == 0 { 1.0 } else { 0.0 }).collect();
        let hist: Vec<f64> = y.iter().map(|&t| if t > 0.5 { 0.9 } else { 0.1 }).collect();
        let leafwise = vec![0.5; 200];
        let ordered = vec![0.5; 200];
        let w = optimize_ensemble_weights(&hist, &leafwise, &ordered, &y);
        assert!(w.hist > w.leafwise);
        assert!(w.hist > w.ordered);
        // clip keeps every family in play: max weight is 0.6/(0.6+0.1+0.1)
        assert!(w.hist <= 0.75 + 1e-9);
        assert!((w.hist + w.leafwise + w.ordered - 1.0).abs() < 1e-9);
        assert!(w.leafwise >= 0.05);
    }

    #[test]
    fn test_search_converges_toward_optimum() {
        // Objective peaks at max_depth 7; everything else is neutral.
        let search = HyperSearch {
            n_trials: 25,
            time_budget: Duration::from_secs(60),
            seed: 7,
            startup_trials: 6,
        };
        let outcome = search.run(
            |p| Some(1.0 - (p.max_depth as f64 - 7.0).abs() * 0.1),
            |_, s1| Some(s1),
        );
        assert!(outcome.completed > 0);
        assert!(outcome.best_score > 0.7);
    }

    #[test]
    fn test_search_survives_total_failure() {
        let search = HyperSearch {
            n_trials: 5,
            ..Default::default()
        };
        let outcome = search.run(|_| None, |_, _| None);
        assert_eq!(outcome.completed, 0);
        assert_eq!(outcome.best.max_depth, TrialParams::default().max_depth);
    }
}
