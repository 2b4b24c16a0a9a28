//! Gradient boosting over the shared binned tree.
//!
//! Three family variants: histogram depth-wise growth, leaf-wise growth, and
//! ordered boosting (leaf statistics from a held-out permutation prefix).
//! The ranker head trains pointwise on the inverted finishing position;
//! classifier heads use logistic loss with positive-class reweighting.

use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::model::tree::{BinnedMatrix, FeatureMatrix, Tree, TreeBuilder};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Objective {
    SquaredError,
    Logistic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Growth {
    DepthWise,
    LeafWise,
    Ordered,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GbdtParams {
    pub n_estimators: usize,
    pub max_depth: usize,
    pub learning_rate: f64,
    pub subsample: f64,
    pub colsample_bytree: f64,
    pub min_child_weight: f64,
    pub reg_lambda: f64,
    pub max_bins: usize,
    pub early_stopping_rounds: usize,
    /// Weight applied to positive samples (neg/pos) for logistic heads.
    pub scale_pos_weight: f64,
    pub seed: u64,
}

impl Default for GbdtParams {
    fn default() -> Self {
        Self {
            n_estimators: 300,
            max_depth: 6,
            learning_rate: 0.05,
            subsample: 0.9,
            colsample_bytree: 0.9,
            min_child_weight: 1.0,
            reg_lambda: 1.0,
            max_bins: 63,
            early_stopping_rounds: 50,
            scale_pos_weight: 1.0,
            seed: 42,
        }
    }
}

/// A trained boosted-tree model. Immutable once built; fully serializable
/// into the artifact blob.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Gbdt {
    pub objective: Objective,
    pub growth: Growth,
    pub base_score: f64,
    pub trees: Vec<Tree>,
    pub best_iteration: usize,
}

#[inline]
fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}

impl Gbdt {
    /// Train with optional early stopping on a validation set.
    pub fn train(
        params: &GbdtParams,
        objective: Objective,
        growth: Growth,
        x: &FeatureMatrix,
        y: &[f64],
        valid: Option<(&FeatureMatrix, &[f64])>,
    ) -> Gbdt {
        assert_eq!(x.n_rows, y.len(), "feature/target length mismatch");
        let n = x.n_rows;
        let n_features = x.n_features();
        let mut rng = ChaCha8Rng::seed_from_u64(params.seed);

        let binned = BinnedMatrix::build(x, params.max_bins);

        // Sample weights for class imbalance
        let weights: Vec<f64> = match objective {
            Objective::Logistic => y
                .iter()
                .map(|&t| if t > 0.5 { params.scale_pos_weight } else { 1.0 })
                .collect(),
            Objective::SquaredError => vec![1.0; n],
        };

        let base_score = match objective {
            Objective::SquaredError => {
                if n > 0 {
                    y.iter().sum::<f64>() / n as f64
                } else {
                    0.0
                }
            }
            Objective::Logistic => {
                let pos: f64 = y.iter().filter(|&&t| t > 0.5).count() as f64;
                let p = (pos / n.max(1) as f64).clamp(1e-6, 1.0 - 1e-6);
                (p / (1.0 - p)).ln()
            }
        };

        // Ordered boosting: leaf statistics come only from the first half of
        // a fixed permutation, which keeps leaf values unbiased by the rows
        // they will later score.
        let estimation_mask: Option<Vec<bool>> = match growth {
            Growth::Ordered => {
                let mut perm: Vec<usize> = (0..n).collect();
                perm.shuffle(&mut rng);
                let mut mask = vec![false; n];
                for &i in perm.iter().take(n / 2 + 1) {
                    mask[i] = true;
                }
                Some(mask)
            }
            _ => None,
        };

        let mut preds = vec![base_score; n];
        let mut valid_preds: Vec<f64> = valid
            .map(|(vx, _)| vec![base_score; vx.n_rows])
            .unwrap_or_default();

        let builder = TreeBuilder {
            max_depth: params.max_depth,
            max_leaves: 1usize << params.max_depth.min(10),
            min_child_weight: params.min_child_weight,
            reg_lambda: params.reg_lambda,
            learning_rate: params.learning_rate,
        };

        let mut trees: Vec<Tree> = Vec::with_capacity(params.n_estimators);
        let mut best_loss = f64::INFINITY;
        let mut best_iteration = 0usize;
        let mut rounds_without_improvement = 0usize;

        let mut grad = vec![0.0; n];
        let mut hess = vec![0.0; n];

        for iteration in 0..params.n_estimators {
            for i in 0..n {
                match objective {
                    Objective::SquaredError => {
                        grad[i] = preds[i] - y[i];
                        hess[i] = 1.0;
                    }
                    Objective::Logistic => {
                        let p = sigmoid(preds[i]);
                        grad[i] = weights[i] * (p - y[i]);
                        hess[i] = (weights[i] * p * (1.0 - p)).max(1e-12);
                    }
                }
            }

            // Row subsample
            let indices: Vec<usize> = if params.subsample < 1.0 {
                (0..n)
                    .filter(|_| rng.gen::<f64>() < params.subsample)
                    .collect()
            } else {
                (0..n).collect()
            };
            if indices.is_empty() {
                continue;
            }

            // Column subsample
            let features: Vec<usize> = if params.colsample_bytree < 1.0 {
                let take =
                    ((n_features as f64 * params.colsample_bytree).ceil() as usize).max(1);
                let mut all: Vec<usize> = (0..n_features).collect();
                all.shuffle(&mut rng);
                all.truncate(take);
                all
            } else {
                (0..n_features).collect()
            };

            let tree = match growth {
                Growth::DepthWise => builder.grow_depth_wise(
                    &binned, &grad, &hess, indices, &features, None,
                ),
                Growth::Ordered => builder.grow_depth_wise(
                    &binned,
                    &grad,
                    &hess,
                    indices,
                    &features,
                    estimation_mask.as_deref(),
                ),
                Growth::LeafWise => {
                    builder.grow_leaf_wise(&binned, &grad, &hess, indices, &features)
                }
            };

            for i in 0..n {
                preds[i] += tree.predict_matrix_row(x, i);
            }
            if let Some((vx, _)) = valid {
                for i in 0..vx.n_rows {
                    valid_preds[i] += tree.predict_matrix_row(vx, i);
                }
            }
            trees.push(tree);

            // Early stopping on validation loss
            if let Some((_, vy)) = valid {
                let loss = match objective {
                    Objective::SquaredError => {
                        let mse: f64 = valid_preds
                            .iter()
                            .zip(vy)
                            .map(|(p, t)| (p - t) * (p - t))
                            .sum::<f64>()
                            / vy.len().max(1) as f64;
                        mse.sqrt()
                    }
                    Objective::Logistic => {
                        valid_preds
                            .iter()
                            .zip(vy)
                            .map(|(&z, &t)| {
                                let p = sigmoid(z).clamp(1e-12, 1.0 - 1e-12);
                                -(t * p.ln() + (1.0 - t) * (1.0 - p).ln())
                            })
                            .sum::<f64>()
                            / vy.len().max(1) as f64
                    }
                };
                if loss + 1e-9 < best_loss {
                    best_loss = loss;
                    best_iteration = iteration + 1;
                    rounds_without_improvement = 0;
                } else {
                    rounds_without_improvement += 1;
                    if rounds_without_improvement >= params.early_stopping_rounds {
                        break;
                    }
                }
            } else {
                best_iteration = iteration + 1;
            }
        }

        if valid.is_some() && best_iteration > 0 {
            trees.truncate(best_iteration);
        }
        let best_iteration = trees.len();

        Gbdt {
            objective,
            growth,
            base_score,
            trees,
            best_iteration,
        }
    }

    /// Raw additive score (margin for logistic heads).
    pub fn predict_raw(&self, x: &[f64]) -> f64 {
        self.base_score + self.trees.iter().map(|t| t.predict(x)).sum::<f64>()
    }

    /// Score for ranking/regression heads.
    pub fn predict(&self, x: &[f64]) -> f64 {
        self.predict_raw(x)
    }

    /// Positive-class probability for logistic heads.
    pub fn predict_proba(&self, x: &[f64]) -> f64 {
        match self.objective {
            Objective::Logistic => sigmoid(self.predict_raw(x)),
            Objective::SquaredError => self.predict_raw(x),
        }
    }

    pub fn predict_batch(&self, m: &FeatureMatrix) -> Vec<f64> {
        (0..m.n_rows)
            .map(|i| {
                let raw = self.base_score
                    + self
                        .trees
                        .iter()
                        .map(|t| t.predict_matrix_row(m, i))
                        .sum::<f64>();
                match self.objective {
                    Objective::Logistic => sigmoid(raw),
                    Objective::SquaredError => raw,
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_regression_data(n: usize) -> (FeatureMatrix, Vec<f64>) {
        // y = 2*x0 + noiseless step on x1
        let rows: Vec<Vec<f64>> = (0..n)
            .map(|i| vec![(i % 10) as f64, if i % 3 == 0 { 1.0 } else { 0.0 }])
            .collect();
        let y: Vec<f64> = rows.iter().map(|r| 2.0 * r[0] + 5.0 * r[1]).collect();
        (FeatureMatrix::from_rows(&rows), y)
    }

    #[test]
    fn test_regression_fits_signal() {
        let (x, y) = make_regression_data(300);
        let params = GbdtParams {
            n_estimators: 60,
            max_depth: 4,
            learning_rate: 0.2,
            subsample: 1.0,
            colsample_bytree: 1.0,
            ..Default::default()
        };
        let model = Gbdt::train(&params, Objective::SquaredError, Growth::DepthWise, &x, &y, None);
        let lo = model.predict(&[0.0, 0.0]);
        let hi = model.predict(&[9.0, 1.0]);
        assert!(hi > lo + 10.0, "expected clear separation, got {} vs {}", lo, hi);
    }

    #[test]
    fn test_logistic_probabilities_ordered() {
        // positive iff x0 > 5
        let rows: Vec<Vec<f64>> = (0..200).map(|i| vec![(i % 11) as f64]).collect();
        let y: Vec<f64> = rows.iter().map(|r| if r[0] > 5.0 { 1.0 } else { 0.0 }).collect();
        let x = FeatureMatrix::from_rows(&rows);
        let params = GbdtParams {
            n_estimators: 40,
            max_depth: 3,
            learning_rate: 0.3,
            subsample: 1.0,
            colsample_bytree: 1.0,
            ..Default::default()
        };
        for growth in [Growth::DepthWise, Growth::LeafWise, Growth::Ordered] {
            let model = Gbdt::train(&params, Objective::Logistic, growth, &x, &y, None);
            let p_low = model.predict_proba(&[1.0]);
            let p_high = model.predict_proba(&[9.0]);
            assert!(p_high > 0.7, "{:?}: p_high={}", growth, p_high);
            assert!(p_low < 0.3, "{:?}: p_low={}", growth, p_low);
        }
    }

    #[test]
    fn test_early_stopping_truncates() {
        let (x, y) = make_regression_data(200);
        let params = GbdtParams {
            n_estimators: 500,
            early_stopping_rounds: 5,
            subsample: 1.0,
            colsample_bytree: 1.0,
            ..Default::default()
        };
        let model = Gbdt::train(
            &params,
            Objective::SquaredError,
            Growth::DepthWise,
            &x,
            &y,
            Some((&x, &y)),
        );
        assert!(model.trees.len() <= 500);
        assert_eq!(model.best_iteration, model.trees.len());
    }

    #[test]
    fn test_training_is_deterministic() {
        let (x, y) = make_regression_data(120);
        let params = GbdtParams {
            n_estimators: 20,
            ..Default::default()
        };
        let a = Gbdt::train(&params, Objective::SquaredError, Growth::DepthWise, &x, &y, None);
        let b = Gbdt::train(&params, Objective::SquaredError, Growth::DepthWise, &x, &y, None);
        assert_eq!(a.predict(&[3.0, 1.0]), b.predict(&[3.0, 1.0]));
    }

    #[test]
    fn test_serde_round_trip_preserves_predictions() {
        let (x, y) = make_regression_data(100);
        let params = GbdtParams {
            n_estimators: 15,
            ..Default::default()
        };
        let model = Gbdt::train(&params, Objective::SquaredError, Growth::LeafWise, &x, &y, None);
        let json = serde_json::to_string(&model).unwrap();
        let restored: Gbdt = serde_json::from_str(&json).unwrap();
        assert_eq!(model.predict(&[4.0, 0.0]), restored.predict(&[4.0, 0.0]));
    }
}
