//! Inference path for one race: features, ensemble scores, adjusters, and
//! race-level normalization.

use sqlx::PgPool;
use tracing::{info, warn};

use crate::db::condition_queries::{current_track_condition, horse_condition_records};
use crate::error::{EngineError, EngineResult};
use crate::features::FeatureExtractor;
use crate::model::ensemble::EnsembleModel;
use crate::models::RaceBundle;
use crate::predict::bias::{apply_bias, resolve_bias_date, BiasCache};
use crate::predict::probability::{normalize_race, scores_from_bundle, HorseScore};
use crate::predict::track::apply_track_adjustment;

/// Compute normalized per-horse scores for a race.
///
/// Sequence per request: feature build, ensemble inference with calibration,
/// daily-bias adjustment, track-condition adjustment (final predictions
/// only), then the race-level normalization that restores the sum
/// invariants.
#[allow(clippy::too_many_arguments)]
pub async fn compute_race_scores(
    pool: &PgPool,
    model: &EnsembleModel,
    bundle: &RaceBundle,
    bias_cache: &BiasCache,
    bias_date_param: Option<&str>,
    configured_bias_date: Option<&str>,
    is_final: bool,
) -> EngineResult<Vec<HorseScore>> {
    let race_code = bundle.race.race_code.as_str();

    let extractor = FeatureExtractor::new(pool);
    let rows = extractor.extract_race(bundle).await?;
    if rows.is_empty() {
        return Err(EngineError::Prediction(format!(
            "no feature rows for race {}",
            race_code
        )));
    }
    info!("Computing predictions: race={}, horses={}", race_code, rows.len());

    let score_bundle = model.predict_scores(&rows);
    let horse_numbers: Vec<u32> = rows.iter().map(|r| r.umaban).collect();
    let mut scores = scores_from_bundle(&horse_numbers, &score_bundle);

    // Daily bias
    match resolve_bias_date(bias_date_param, configured_bias_date, race_code) {
        Some(date) => match bias_cache.get_or_load(pool, date).await? {
            Some(snapshot) => apply_bias(&mut scores, race_code, &bundle.horses, &snapshot),
            None => warn!("No bias snapshot for {}; prediction proceeds unadjusted", date),
        },
        None => {}
    }

    // Track condition, final predictions only
    if is_final {
        match current_track_condition(pool, race_code).await? {
            Some(condition) if condition.condition > 0 => {
                let kettonums: Vec<String> = bundle
                    .horses
                    .iter()
                    .filter(|e| e.horse_number() >= 1 && !e.ketto_toroku_bango.is_empty())
                    .map(|e| e.ketto_toroku_bango.clone())
                    .collect();
                let records = horse_condition_records(pool, &kettonums, &condition).await?;
                apply_track_adjustment(&mut scores, &bundle.horses, &condition, &records);
            }
            _ => info!("No track condition data, skipping adjustment"),
        }
    }

    normalize_race(&mut scores);
    Ok(scores)
}
