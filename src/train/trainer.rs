//! Offline training pipeline: feature extraction, time-ordered split,
//! hyperparameter search, nine base learners, weight optimization,
//! calibrator fitting, test evaluation and the staged artifact.

use chrono::{Datelike, Utc};
use serde_json::json;
use sqlx::PgPool;
use std::collections::HashSet;
use std::path::PathBuf;
use tracing::info;

use crate::db::calibration_store::save_calibration_stats;
use crate::error::{EngineError, EngineResult};
use crate::features::FeatureExtractor;
use crate::model::artifact;
use crate::model::boosting::{Gbdt, GbdtParams, Growth, Objective};
use crate::model::calibration::EnsembleCalibrator;
use crate::model::ensemble::{
    ArtifactMetadata, EnsembleModel, ModelTriple, ARTIFACT_VERSION,
};
use crate::model::tree::FeatureMatrix;
use crate::models::Surface;
use crate::train::dataset::{slice_matrix, time_split, TrainingFrame};
use crate::train::evaluator::{auc, brier_score, top3_coverage};
use crate::train::optimizer::{optimize_ensemble_weights, HyperSearch, TrialParams};

/// Calibration bin statistics: 20 equal-width bins with pre/post means and
/// Brier scores, persisted as a diagnostic sidecar.
pub fn calc_bin_stats(
    predicted: &[f64],
    actual: &[f64],
    calibrated: &[f64],
    n_bins: usize,
) -> serde_json::Value {
    let mut bins = Vec::new();
    for b in 0..n_bins {
        let bin_start = b as f64 / n_bins as f64;
        let bin_end = (b + 1) as f64 / n_bins as f64;
        let idx: Vec<usize> = predicted
            .iter()
            .enumerate()
            .filter(|(_, &p)| p >= bin_start && p < bin_end)
            .map(|(i, _)| i)
            .collect();
        if idx.is_empty() {
            continue;
        }
        let mean = |v: &[f64]| idx.iter().map(|&i| v[i]).sum::<f64>() / idx.len() as f64;
        bins.push(json!({
            "bin_start": bin_start,
            "bin_end": bin_end,
            "count": idx.len(),
            "avg_predicted": mean(predicted),
            "avg_actual": mean(actual),
            "calibrated": mean(calibrated),
        }));
    }

    json!({
        "bins": bins,
        "brier_before": brier_score(actual, predicted),
        "brier_after": brier_score(actual, calibrated),
    })
}

fn gbdt_params(trial: &TrialParams, scale_pos_weight: f64, seed: u64) -> GbdtParams {
    GbdtParams {
        n_estimators: trial.n_estimators,
        max_depth: trial.max_depth,
        learning_rate: trial.learning_rate,
        subsample: trial.subsample,
        colsample_bytree: trial.colsample_bytree,
        min_child_weight: trial.min_child_weight,
        scale_pos_weight,
        seed,
        ..Default::default()
    }
}

/// Train one family triple (histogram, leaf-wise, ordered) for a task head.
fn train_triple(
    params: &GbdtParams,
    objective: Objective,
    x: &FeatureMatrix,
    y: &[f64],
    valid: Option<(&FeatureMatrix, &[f64])>,
) -> ModelTriple {
    let hist = Gbdt::train(params, objective, Growth::DepthWise, x, y, valid);
    let leafwise = Gbdt::train(params, objective, Growth::LeafWise, x, y, valid);
    let ordered = Gbdt::train(params, objective, Growth::Ordered, x, y, valid);
    ModelTriple {
        hist,
        leafwise,
        ordered: Some(ordered),
    }
}

fn pos_weight(y: &[f64]) -> f64 {
    let pos = y.iter().filter(|&&t| t > 0.5).count().max(1);
    let neg = y.len() - y.iter().filter(|&&t| t > 0.5).count();
    neg as f64 / pos as f64
}

#[derive(Debug)]
pub struct FitOutcome {
    pub model: EnsembleModel,
    pub calibration_stats: serde_json::Value,
}

/// Synchronous heart of the trainer. CPU-bound; callers on the async path
/// run it inside `spawn_blocking`.
pub fn fit_ensemble(
    frame: &TrainingFrame,
    surface: Surface,
    years: u32,
    search: &HyperSearch,
) -> EngineResult<FitOutcome> {
    let n = frame.len();
    if n < 100 {
        return Err(EngineError::Training(format!(
            "not enough training rows: {}",
            n
        )));
    }

    let split = time_split(n);
    info!(
        "Train: {}, Calib: {}, Test: {}",
        split.train.len(),
        split.calib.len(),
        split.test.len()
    );

    // Starter counts per race, run-length over the time-ordered rows
    let group_train = frame.group_sizes(split.train.clone());
    let group_calib = frame.group_sizes(split.calib.clone());
    info!(
        "Ranking groups: train={} races (avg {:.1} starters), calib={} races",
        group_train.len(),
        split.train.len() as f64 / group_train.len().max(1) as f64,
        group_calib.len()
    );

    let full = frame.matrix();
    let x_train = slice_matrix(&full, &split.train);
    let x_calib = slice_matrix(&full, &split.calib);
    let x_test = slice_matrix(&full, &split.test);

    let y_rank = frame.rank_targets();
    let y_win = frame.binary_targets(1.0);
    let y_quinella = frame.binary_targets(2.0);
    let y_place = frame.binary_targets(3.0);

    let take = |v: &[f64], r: &std::ops::Range<usize>| v[r.clone()].to_vec();
    let y_rank_train = take(&y_rank, &split.train);
    let y_rank_calib = take(&y_rank, &split.calib);
    let y_win_train = take(&y_win, &split.train);
    let y_win_calib = take(&y_win, &split.calib);
    let y_win_test = take(&y_win, &split.test);
    let y_quinella_train = take(&y_quinella, &split.train);
    let y_quinella_calib = take(&y_quinella, &split.calib);
    let y_quinella_test = take(&y_quinella, &split.test);
    let y_place_train = take(&y_place, &split.train);
    let y_place_calib = take(&y_place, &split.calib);
    let y_place_test = take(&y_place, &split.test);

    let calib_rows = &frame.rows[split.calib.clone()];
    let test_rows = &frame.rows[split.test.clone()];

    let win_weight = pos_weight(&y_win_train);
    let quinella_weight = pos_weight(&y_quinella_train);
    let place_weight = pos_weight(&y_place_train);

    // ===== hyperparameter search =====
    // Trials train reduced models; the ranking stage alone feeds the pruner.
    info!(
        "Hyperparameter search: up to {} trials, {:?} budget",
        search.n_trials, search.time_budget
    );
    let small = |t: &TrialParams| TrialParams {
        n_estimators: (t.n_estimators / 4).max(50),
        ..t.clone()
    };

    let stage1 = |t: &TrialParams| -> Option<f64> {
        let p = gbdt_params(&small(t), 1.0, 42);
        let triple = train_triple(
            &p,
            Objective::SquaredError,
            &x_train,
            &y_rank_train,
            Some((&x_calib, &y_rank_calib)),
        );
        let scores = triple.predict_blend(&x_calib, &Default::default());
        Some(top3_coverage(calib_rows, &scores, true))
    };
    let full_trial = |t: &TrialParams, top3: f64| -> Option<f64> {
        let pw = gbdt_params(&small(t), win_weight, 43);
        let win_triple = train_triple(
            &pw,
            Objective::Logistic,
            &x_train,
            &y_win_train,
            Some((&x_calib, &y_win_calib)),
        );
        let win_probs = win_triple.predict_blend(&x_calib, &Default::default());
        let win_auc = auc(&y_win_calib, &win_probs);

        let pp = gbdt_params(&small(t), place_weight, 44);
        let place_triple = train_triple(
            &pp,
            Objective::Logistic,
            &x_train,
            &y_place_train,
            Some((&x_calib, &y_place_calib)),
        );
        let place_probs = place_triple.predict_blend(&x_calib, &Default::default());
        let place_auc = auc(&y_place_calib, &place_probs);

        Some(win_auc * 0.4 + top3 * 0.3 + place_auc * 0.3)
    };

    let outcome = search.run(stage1, full_trial);
    info!(
        "Search done: best score {:.4} over {} trials ({} pruned): {:?}",
        outcome.best_score, outcome.completed, outcome.pruned, outcome.best
    );
    let best = outcome.best;

    // ===== full training: nine base learners =====
    info!("Training ranking models...");
    let rank_params = gbdt_params(&best, 1.0, 42);
    let rankers = train_triple(
        &rank_params,
        Objective::SquaredError,
        &x_train,
        &y_rank_train,
        Some((&x_calib, &y_rank_calib)),
    );

    info!("Training win classifiers (scale_pos_weight={:.1})...", win_weight);
    let win_params = gbdt_params(&best, win_weight, 43);
    let win = train_triple(
        &win_params,
        Objective::Logistic,
        &x_train,
        &y_win_train,
        Some((&x_calib, &y_win_calib)),
    );

    info!(
        "Training quinella classifiers (scale_pos_weight={:.1})...",
        quinella_weight
    );
    let quinella_params = gbdt_params(&best, quinella_weight, 44);
    let quinella = train_triple(
        &quinella_params,
        Objective::Logistic,
        &x_train,
        &y_quinella_train,
        Some((&x_calib, &y_quinella_calib)),
    );

    info!("Training place classifiers (scale_pos_weight={:.1})...", place_weight);
    let place_params = gbdt_params(&best, place_weight, 45);
    let place = train_triple(
        &place_params,
        Objective::Logistic,
        &x_train,
        &y_place_train,
        Some((&x_calib, &y_place_calib)),
    );

    // ===== ensemble weight optimization on the calibration split =====
    let hist_win = win.hist.predict_batch(&x_calib);
    let leafwise_win = win.leafwise.predict_batch(&x_calib);
    let ordered_win = win
        .ordered
        .as_ref()
        .map(|m| m.predict_batch(&x_calib))
        .unwrap_or_else(|| vec![0.5; x_calib.n_rows]);
    let weights = optimize_ensemble_weights(&hist_win, &leafwise_win, &ordered_win, &y_win_calib);

    // ===== calibrators =====
    let win_calib_probs = win.predict_blend(&x_calib, &weights);
    let quinella_calib_probs = quinella.predict_blend(&x_calib, &weights);
    let place_calib_probs = place.predict_blend(&x_calib, &weights);

    let win_calibrator = EnsembleCalibrator::fit(&win_calib_probs, &y_win_calib);
    let quinella_calibrator = EnsembleCalibrator::fit(&quinella_calib_probs, &y_quinella_calib);
    let place_calibrator = EnsembleCalibrator::fit(&place_calib_probs, &y_place_calib);

    // ===== test-split evaluation =====
    let rank_test = rankers.predict_blend(&x_test, &weights);
    let win_test_raw = win.predict_blend(&x_test, &weights);
    let quinella_test_raw = quinella.predict_blend(&x_test, &weights);
    let place_test_raw = place.predict_blend(&x_test, &weights);

    let win_test_cal = win_calibrator.predict_all(&win_test_raw);
    let quinella_test_cal = quinella_calibrator.predict_all(&quinella_test_raw);
    let place_test_cal = place_calibrator.predict_all(&place_test_raw);

    let win_auc_cal = auc(&y_win_test, &win_test_cal);
    let quinella_auc_cal = auc(&y_quinella_test, &quinella_test_cal);
    let place_auc_cal = auc(&y_place_test, &place_test_cal);
    let coverage = top3_coverage(test_rows, &rank_test, true);

    info!("Test win AUC:      {:.4} (raw {:.4})", win_auc_cal, auc(&y_win_test, &win_test_raw));
    info!(
        "Test quinella AUC: {:.4} (raw {:.4})",
        quinella_auc_cal,
        auc(&y_quinella_test, &quinella_test_raw)
    );
    info!(
        "Test place AUC:    {:.4} (raw {:.4})",
        place_auc_cal,
        auc(&y_place_test, &place_test_raw)
    );
    info!("Top-3 coverage:    {:.1}%", coverage * 100.0);

    let calibration_stats = json!({
        "created_at": Utc::now().to_rfc3339(),
        "win_stats": calc_bin_stats(&win_test_raw, &y_win_test, &win_test_cal, 20),
        "quinella_stats": calc_bin_stats(&quinella_test_raw, &y_quinella_test, &quinella_test_cal, 20),
        "place_stats": calc_bin_stats(&place_test_raw, &y_place_test, &place_test_cal, 20),
    });

    let metadata = ArtifactMetadata {
        trained_at: Utc::now().to_rfc3339(),
        training_samples: n,
        train_size: split.train.len(),
        calib_size: split.calib.len(),
        test_size: split.test.len(),
        years,
        surface: match surface {
            Surface::Mixed => None,
            s => Some(s),
        },
        win_auc: win_auc_cal,
        quinella_auc: quinella_auc_cal,
        place_auc: place_auc_cal,
        win_brier: brier_score(&y_win_test, &win_test_cal),
        quinella_brier: brier_score(&y_quinella_test, &quinella_test_cal),
        place_brier: brier_score(&y_place_test, &place_test_cal),
        top3_coverage: coverage,
        best_trial_score: outcome.best_score,
    };

    let model = EnsembleModel {
        version: ARTIFACT_VERSION.to_string(),
        model_type: "ranker".to_string(),
        feature_names: frame.feature_names.clone(),
        weights,
        rankers,
        win: Some(win),
        quinella: Some(quinella),
        place: Some(place),
        win_calibrator: Some(win_calibrator),
        quinella_calibrator: Some(quinella_calibrator),
        place_calibrator: Some(place_calibrator),
        metadata,
    };

    Ok(FitOutcome {
        model,
        calibration_stats,
    })
}

#[derive(Debug, Clone)]
pub struct TrainOutcome {
    pub staged_path: PathBuf,
    pub model_version: String,
    pub samples: usize,
    pub win_auc: f64,
    pub quinella_auc: f64,
    pub place_auc: f64,
    pub top3_coverage: f64,
}

/// End-to-end training run: extract the window, fit, stage the artifact and
/// persist calibration statistics. Never touches the active artifact.
pub async fn train_new_model(
    pool: &PgPool,
    model_dir: &std::path::Path,
    years: u32,
    surface: Surface,
    exclude_years: &HashSet<i32>,
    search: HyperSearch,
) -> EngineResult<TrainOutcome> {
    info!(
        "Starting ensemble training: past {} years [{}]",
        years,
        surface.as_str()
    );

    let extractor = FeatureExtractor::new(pool);
    let current_year = Utc::now().year();
    let mut rows = Vec::new();
    for year in (current_year - years as i32)..=current_year {
        if exclude_years.contains(&year) {
            info!("  skipping {} (excluded)", year);
            continue;
        }
        let year_rows = extractor.extract_year(year, surface, 10000).await?;
        info!("  {}: {} rows", year, year_rows.len());
        rows.extend(year_rows);
    }
    if rows.is_empty() {
        return Err(EngineError::Training("no training data".to_string()));
    }

    let frame = TrainingFrame::new(rows);
    let samples = frame.len();

    // CPU-bound fit runs off the async runtime
    let fit = tokio::task::spawn_blocking(move || fit_ensemble(&frame, surface, years, &search))
        .await
        .map_err(|e| EngineError::Training(format!("training task failed: {}", e)))??;

    let staged_path = model_dir.join(artifact::staging_file_name(surface));
    artifact::save(&fit.model, &staged_path)?;
    info!("Staged artifact written: {}", staged_path.display());

    let model_version = format!(
        "{}_{}",
        ARTIFACT_VERSION,
        Utc::now().format("%Y%m%d_%H%M%S")
    );
    save_calibration_stats(pool, &model_version, &fit.calibration_stats).await?;

    Ok(TrainOutcome {
        staged_path,
        model_version,
        samples,
        win_auc: fit.model.metadata.win_auc,
        quinella_auc: fit.model.metadata.quinella_auc,
        place_auc: fit.model.metadata.place_auc,
        top3_coverage: fit.model.metadata.top3_coverage,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::row::FeatureRow;

    fn synthetic_frame(n_races: usize) -> TrainingFrame {
        // Fabricated field where lower win_rate index finishes worse
        let mut rows = Vec::new();
        for r in 0..n_races {
            for pos in 1..=8u32 {
                let mut row = FeatureRow {
                    race_code: format!("2023{:08}0501", r),
                    umaban: pos,
                    target: Some(pos as f64),
                    ..Default::default()
                };
                // Tie several informative features to the outcome
                row.features.win_rate = 0.4 - pos as f64 * 0.04;
                row.features.place_rate = 0.8 - pos as f64 * 0.07;
                row.features.speed_index_avg = 100.0 - pos as f64 * 2.0;
                row.features.jockey_win_rate = 0.2 - pos as f64 * 0.01;
                rows.push(row);
            }
        }
        TrainingFrame::new(rows)
    }

    #[test]
    fn test_calc_bin_stats_shape() {
        let predicted = vec![0.05, 0.12, 0.13, 0.55, 0.95];
        let actual = vec![0.0, 0.0, 1.0, 1.0, 1.0];
        let calibrated = vec![0.04, 0.2, 0.2, 0.6, 0.9];
        let stats = calc_bin_stats(&predicted, &actual, &calibrated, 20);
        assert!(stats["bins"].as_array().unwrap().len() >= 3);
        assert!(stats["brier_before"].as_f64().unwrap() >= 0.0);
    }

    #[test]
    fn test_fit_ensemble_rejects_tiny_frames() {
        let frame = synthetic_frame(2);
        let err = fit_ensemble(&frame, Surface::Mixed, 3, &HyperSearch::default()).unwrap_err();
        assert!(matches!(err, EngineError::Training(_)));
    }

    #[test]
    fn test_fit_ensemble_produces_complete_artifact() {
        let frame = synthetic_frame(60);
        let search = HyperSearch {
            n_trials: 2,
            startup_trials: 2,
            time_budget: std::time::Duration::from_secs(120),
            seed: 1,
        };
        let fit = fit_ensemble(&frame, Surface::Mixed, 3, &search).unwrap();
        let model = fit.model;
        assert_eq!(model.model_type, "ranker");
        assert!(model.win.is_some());
        assert!(model.quinella.is_some());
        assert!(model.place.is_some());
        assert!(model.win_calibrator.is_some());
        assert_eq!(model.feature_names.len(), crate::features::row::Features::NAMES.len());
        let w = model.weights;
        assert!((w.hist + w.leafwise + w.ordered - 1.0).abs() < 1e-9);
        // the informative features should give a better-than-random win AUC
        assert!(model.metadata.win_auc > 0.5);
    }
}
