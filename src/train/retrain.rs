//! Weekly retrain orchestration: train, compare on the holdout year,
//! promote or discard, and record the outcome sidecar.

use chrono::{Datelike, Utc};
use serde_json::json;
use sqlx::PgPool;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{error, info};

use crate::error::EngineResult;
use crate::model::ModelManager;
use crate::models::Surface;
use crate::train::evaluator::compare_models;
use crate::train::optimizer::HyperSearch;
use crate::train::trainer::train_new_model;

#[derive(Debug, Clone)]
pub struct RetrainReport {
    pub surface: Surface,
    pub promoted: bool,
    pub old_score: f64,
    pub new_score: f64,
    pub samples: usize,
}

/// One full retrain cycle. The holdout year defaults to two years back,
/// which keeps it strictly outside the training window.
pub async fn run_retrain(
    pool: &PgPool,
    manager: &Arc<ModelManager>,
    years: u32,
    surface: Surface,
    test_year: Option<i32>,
    deploy: bool,
) -> EngineResult<RetrainReport> {
    let test_year = test_year.unwrap_or_else(|| Utc::now().year() - 2);
    let mut exclude = HashSet::new();
    exclude.insert(test_year);

    let outcome = train_new_model(
        pool,
        manager.model_dir(),
        years,
        surface,
        &exclude,
        HyperSearch::default(),
    )
    .await?;

    let current_path = manager.resolve_path(surface);
    let comparison = match compare_models(
        pool,
        &current_path,
        &outcome.staged_path,
        test_year,
        surface,
    )
    .await
    {
        Ok(c) => c,
        Err(e) => {
            // A failed comparison never promotes; the staged file stays as a
            // sidecar for inspection.
            error!("Model comparison failed: {}", e);
            return Err(e);
        }
    };

    let promoted = deploy && comparison.promote;
    if promoted {
        manager.promote(surface, &outcome.staged_path)?;
    } else if comparison.promote {
        info!("New model wins but deploy is disabled; staged artifact retained");
    } else {
        info!("Keeping current model (old {:.4} >= new {:.4})", comparison.old_score, comparison.new_score);
    }

    let report = RetrainReport {
        surface,
        promoted,
        old_score: comparison.old_score,
        new_score: comparison.new_score,
        samples: outcome.samples,
    };

    write_result_sidecar(manager, surface, &outcome.model_version, &report, test_year, years)?;
    Ok(report)
}

/// `surface_train_result_{surface}_{YYYYMMDD}.json` next to the artifacts.
fn write_result_sidecar(
    manager: &ModelManager,
    surface: Surface,
    model_version: &str,
    report: &RetrainReport,
    test_year: i32,
    years: u32,
) -> EngineResult<()> {
    let path = manager.model_dir().join(format!(
        "surface_train_result_{}_{}.json",
        surface.as_str(),
        Utc::now().format("%Y%m%d")
    ));
    let payload = json!({
        "surface": surface.as_str(),
        "years": years,
        "test_year": test_year,
        "trained_at": Utc::now().to_rfc3339(),
        "model_version": model_version,
        "samples": report.samples,
        "old_score": report.old_score,
        "new_score": report.new_score,
        "promoted": report.promoted,
    });
    std::fs::write(&path, serde_json::to_vec_pretty(&payload)?)?;
    info!("Retrain result saved: {}", path.display());
    Ok(())
}

/// Long-lived weekly retrain task for the server process. Failures are
/// logged and never crash the process; the active artifact stays live.
pub async fn weekly_retrain_loop(pool: PgPool, manager: Arc<ModelManager>) {
    let mut interval = tokio::time::interval(std::time::Duration::from_secs(7 * 24 * 3600));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick fires immediately; skip it so startup stays fast.
    interval.tick().await;

    loop {
        interval.tick().await;
        info!("Weekly retrain starting");
        match run_retrain(&pool, &manager, 3, Surface::Mixed, None, true).await {
            Ok(report) => info!(
                "Weekly retrain finished: promoted={}, old={:.4}, new={:.4}",
                report.promoted, report.old_score, report.new_score
            ),
            Err(e) => error!("Weekly retrain failed: {}", e),
        }
    }
}
