//! The ensemble artifact: three boosting families per task head, blended by
//! stored weights, with per-task calibrators.

use serde::{Deserialize, Serialize};

use crate::features::row::FeatureRow;
use crate::model::boosting::Gbdt;
use crate::model::calibration::EnsembleCalibrator;
use crate::model::tree::FeatureMatrix;
use crate::models::Surface;

/// Blend weights across the three families. Stored in the artifact; always
/// renormalized over the families actually present.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct EnsembleWeights {
    pub hist: f64,
    pub leafwise: f64,
    pub ordered: f64,
}

impl Default for EnsembleWeights {
    fn default() -> Self {
        Self {
            hist: 0.30,
            leafwise: 0.40,
            ordered: 0.30,
        }
    }
}

impl EnsembleWeights {
    pub fn normalized(&self) -> Self {
        let sum = self.hist + self.leafwise + self.ordered;
        if sum <= 0.0 {
            return Self::default();
        }
        Self {
            hist: self.hist / sum,
            leafwise: self.leafwise / sum,
            ordered: self.ordered / sum,
        }
    }

    /// Weights when the third family is absent (legacy 2-model artifacts).
    pub fn two_model(&self) -> (f64, f64) {
        let sum = self.hist + self.leafwise;
        if sum <= 0.0 {
            return (0.5, 0.5);
        }
        (self.hist / sum, self.leafwise / sum)
    }
}

/// One task head: the histogram and leaf-wise models are always present;
/// the ordered-boosting model may be missing in older artifacts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelTriple {
    pub hist: Gbdt,
    pub leafwise: Gbdt,
    pub ordered: Option<Gbdt>,
}

impl ModelTriple {
    /// Weighted blend over the batch. Classifier heads blend probabilities,
    /// ranker heads blend raw scores.
    pub fn predict_blend(&self, m: &FeatureMatrix, weights: &EnsembleWeights) -> Vec<f64> {
        let hist = self.hist.predict_batch(m);
        let leafwise = self.leafwise.predict_batch(m);
        match &self.ordered {
            Some(ordered_model) => {
                let w = weights.normalized();
                let ordered = ordered_model.predict_batch(m);
                hist.iter()
                    .zip(&leafwise)
                    .zip(&ordered)
                    .map(|((&h, &l), &o)| h * w.hist + l * w.leafwise + o * w.ordered)
                    .collect()
            }
            None => {
                let (wh, wl) = weights.two_model();
                hist.iter()
                    .zip(&leafwise)
                    .map(|(&h, &l)| h * wh + l * wl)
                    .collect()
            }
        }
    }

    /// Weighted standard deviation across the family outputs, used as the
    /// uncertainty band around the blended probability.
    pub fn predict_spread(&self, m: &FeatureMatrix, weights: &EnsembleWeights) -> Vec<f64> {
        let hist = self.hist.predict_batch(m);
        let leafwise = self.leafwise.predict_batch(m);
        let ordered = self.ordered.as_ref().map(|model| model.predict_batch(m));

        let (w, preds): (Vec<f64>, Vec<&[f64]>) = match &ordered {
            Some(o) => {
                let wn = weights.normalized();
                (
                    vec![wn.hist, wn.leafwise, wn.ordered],
                    vec![&hist, &leafwise, o],
                )
            }
            None => {
                let (wh, wl) = weights.two_model();
                (vec![wh, wl], vec![&hist, &leafwise])
            }
        };

        (0..m.n_rows)
            .map(|i| {
                let mean: f64 = preds.iter().zip(&w).map(|(p, &wi)| p[i] * wi).sum();
                let var: f64 = preds
                    .iter()
                    .zip(&w)
                    .map(|(p, &wi)| wi * (p[i] - mean) * (p[i] - mean))
                    .sum();
                var.sqrt()
            })
            .collect()
    }
}

/// Training provenance and held-out metrics, stored alongside the models.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ArtifactMetadata {
    pub trained_at: String,
    pub training_samples: usize,
    pub train_size: usize,
    pub calib_size: usize,
    pub test_size: usize,
    pub years: u32,
    pub surface: Option<Surface>,
    pub win_auc: f64,
    pub quinella_auc: f64,
    pub place_auc: f64,
    pub win_brier: f64,
    pub quinella_brier: f64,
    pub place_brier: f64,
    pub top3_coverage: f64,
    pub best_trial_score: f64,
}

pub const ARTIFACT_VERSION: &str = "v2_ranking_ensemble";

/// The versioned model artifact: rankers, the three binary-classifier heads,
/// calibrators, blend weights, and the ordered feature-name list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnsembleModel {
    pub version: String,
    /// "ranker": higher rank score is better. Legacy regression artifacts
    /// carry "regressor" and sort ascending.
    pub model_type: String,
    pub feature_names: Vec<String>,
    pub weights: EnsembleWeights,
    pub rankers: ModelTriple,
    pub win: Option<ModelTriple>,
    pub quinella: Option<ModelTriple>,
    pub place: Option<ModelTriple>,
    pub win_calibrator: Option<EnsembleCalibrator>,
    pub quinella_calibrator: Option<EnsembleCalibrator>,
    pub place_calibrator: Option<EnsembleCalibrator>,
    pub metadata: ArtifactMetadata,
}

/// Calibrated (but not yet race-normalized) per-horse outputs.
#[derive(Debug, Clone, Default)]
pub struct ScoreBundle {
    pub rank_scores: Vec<f64>,
    pub win: Option<Vec<f64>>,
    /// Cross-family spread of the raw win probability.
    pub win_spread: Option<Vec<f64>>,
    pub quinella: Option<Vec<f64>>,
    pub place: Option<Vec<f64>>,
}

impl EnsembleModel {
    pub fn is_ranker(&self) -> bool {
        self.model_type == "ranker"
    }

    /// Assemble the input matrix in this artifact's feature order.
    pub fn matrix_from_rows(&self, rows: &[FeatureRow]) -> FeatureMatrix {
        let vectors: Vec<Vec<f64>> = rows
            .iter()
            .map(|r| r.vector_for(&self.feature_names))
            .collect();
        FeatureMatrix::from_rows(&vectors)
    }

    fn calibrate(probs: Vec<f64>, calibrator: Option<&EnsembleCalibrator>) -> Vec<f64> {
        match calibrator {
            Some(cal) => cal.predict_all(&probs),
            None => probs,
        }
    }

    /// Rank scores plus calibrated task probabilities for a batch of rows.
    pub fn predict_scores(&self, rows: &[FeatureRow]) -> ScoreBundle {
        let m = self.matrix_from_rows(rows);

        let rank_scores = self.rankers.predict_blend(&m, &self.weights);
        let win = self.win.as_ref().map(|triple| {
            Self::calibrate(
                triple.predict_blend(&m, &self.weights),
                self.win_calibrator.as_ref(),
            )
        });
        let win_spread = self
            .win
            .as_ref()
            .map(|triple| triple.predict_spread(&m, &self.weights));
        let quinella = self.quinella.as_ref().map(|triple| {
            Self::calibrate(
                triple.predict_blend(&m, &self.weights),
                self.quinella_calibrator.as_ref(),
            )
        });
        let place = self.place.as_ref().map(|triple| {
            Self::calibrate(
                triple.predict_blend(&m, &self.weights),
                self.place_calibrator.as_ref(),
            )
        });

        ScoreBundle {
            rank_scores,
            win,
            win_spread,
            quinella,
            place,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::boosting::{GbdtParams, Growth, Objective};

    fn tiny_model(growth: Growth) -> Gbdt {
        let rows: Vec<Vec<f64>> = (0..40).map(|i| vec![(i % 8) as f64]).collect();
        let y: Vec<f64> = rows.iter().map(|r| r[0]).collect();
        let x = FeatureMatrix::from_rows(&rows);
        let params = GbdtParams {
            n_estimators: 10,
            ..Default::default()
        };
        Gbdt::train(&params, Objective::SquaredError, growth, &x, &y, None)
    }

    #[test]
    fn test_weights_normalize() {
        let w = EnsembleWeights {
            hist: 0.2,
            leafwise: 0.2,
            ordered: 0.6,
        };
        let n = w.normalized();
        assert!((n.hist + n.leafwise + n.ordered - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_two_model_blend_when_third_missing() {
        let triple = ModelTriple {
            hist: tiny_model(Growth::DepthWise),
            leafwise: tiny_model(Growth::LeafWise),
            ordered: None,
        };
        let w = EnsembleWeights {
            hist: 0.4,
            leafwise: 0.3,
            ordered: 0.3,
        };
        let m = FeatureMatrix::from_rows(&[vec![4.0]]);
        let blended = triple.predict_blend(&m, &w)[0];
        let hist = triple.hist.predict(&[4.0]);
        let leafwise = triple.leafwise.predict(&[4.0]);
        let expected = (hist * 0.4 + leafwise * 0.3) / 0.7;
        assert!((blended - expected).abs() < 1e-9);
    }
}
