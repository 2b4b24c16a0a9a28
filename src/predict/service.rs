//! Prediction service facade.
//!
//! Orchestrates the request path (store reads, inference, adjusters,
//! derivation, persistence) and owns mock-mode short-circuiting.

use chrono::{NaiveDate, Utc};
use serde::Serialize;
use sqlx::PgPool;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::db::code_master::CodeMasterCache;
use crate::db::{prediction_store, race_queries};
use crate::error::{EngineError, EngineResult};
use crate::model::ModelManager;
use crate::models::{is_valid_race_code, venue_name, Config, DbMode, Surface};
use crate::predict::bias::BiasCache;
use crate::predict::engine::compute_race_scores;
use crate::predict::output::{
    build_response, generate_ranking, mock_prediction, resolve_race_name, PredictionResponse,
};

/// Summary row for the prediction history endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct PredictionHistoryItem {
    pub prediction_id: String,
    pub predicted_at: chrono::DateTime<Utc>,
    pub is_final: bool,
    pub prediction_confidence: f64,
}

pub struct PredictionService {
    pool: Option<PgPool>,
    config: Config,
    models: Arc<ModelManager>,
    bias_cache: BiasCache,
    code_master: CodeMasterCache,
}

impl PredictionService {
    pub fn new(pool: Option<PgPool>, config: Config, models: Arc<ModelManager>) -> Self {
        Self {
            pool,
            config,
            models,
            bias_cache: BiasCache::new(),
            code_master: CodeMasterCache::new(),
        }
    }

    fn is_mock(&self) -> bool {
        self.config.db_mode == DbMode::Mock
    }

    fn db(&self) -> EngineResult<&PgPool> {
        self.pool
            .as_ref()
            .ok_or_else(|| EngineError::Database("no database pool configured".to_string()))
    }

    /// Generate (and persist) the prediction for `(race_id, is_final)`.
    pub async fn generate_prediction(
        &self,
        race_id: &str,
        is_final: bool,
        bias_date: Option<&str>,
    ) -> EngineResult<PredictionResponse> {
        info!(
            "Starting prediction: race_id={}, is_final={}",
            race_id, is_final
        );

        if self.is_mock() {
            return Ok(mock_prediction(race_id, is_final));
        }

        if !is_valid_race_code(race_id) {
            return Err(EngineError::InvalidInput(format!(
                "race id must be 16 digits: {}",
                race_id
            )));
        }

        let pool = self.db()?;

        if !race_queries::check_race_exists(pool, race_id).await? {
            return Err(EngineError::MissingData(format!(
                "race not found: {}",
                race_id
            )));
        }

        let mut bundle = race_queries::get_race_bundle(pool, race_id).await?;
        if bundle.horses.iter().all(|h| h.horse_number() == 0) {
            return Err(EngineError::MissingData(format!(
                "no starters for race: {}",
                race_id
            )));
        }

        // Fill display names the entry join could not resolve
        let code_master = self.code_master.get_or_load(pool).await?;
        for horse in &mut bundle.horses {
            if horse.kishumei.trim().is_empty() {
                if let Some(name) = code_master.jockey_name(&horse.kishu_code) {
                    horse.kishumei = name.to_string();
                }
            }
        }

        // Surface-specific artifact with mixed fallback
        let surface =
            Surface::from_track_code(&bundle.race.track_code).unwrap_or(Surface::Mixed);
        let model = self.models.load(surface)?;

        let scores = compute_race_scores(
            pool,
            &model,
            &bundle,
            &self.bias_cache,
            bias_date,
            self.config.bias_date.as_deref(),
            is_final,
        )
        .await?;

        let result = generate_ranking(&bundle, scores, &model.version);
        let mut response = build_response(&bundle, result, is_final);

        let race_date = NaiveDate::parse_from_str(&response.race_date, "%Y-%m-%d")
            .unwrap_or_else(|_| Utc::now().date_naive());
        let prediction_id = Uuid::new_v4().to_string();
        let saved_id = prediction_store::upsert_prediction(
            pool,
            &prediction_id,
            race_id,
            race_date,
            is_final,
            &response.prediction_result,
            response.predicted_at,
        )
        .await?;
        response.prediction_id = saved_id;

        info!(
            "Prediction completed: prediction_id={}",
            response.prediction_id
        );
        Ok(response)
    }

    /// Look a stored prediction up by id and rebuild the full response.
    pub async fn get_prediction(
        &self,
        prediction_id: &str,
    ) -> EngineResult<Option<PredictionResponse>> {
        if self.is_mock() {
            return Ok(None);
        }
        let pool = self.db()?;

        let stored = match prediction_store::get_prediction_by_id(pool, prediction_id).await? {
            Some(s) => s,
            None => return Ok(None),
        };

        let race = race_queries::get_race_info(pool, &stored.race_id)
            .await?
            .unwrap_or_default();

        Ok(Some(PredictionResponse {
            prediction_id: stored.prediction_id,
            race_id: stored.race_id.clone(),
            race_name: resolve_race_name(&race),
            race_date: stored.race_date.format("%Y-%m-%d").to_string(),
            venue: venue_name(crate::models::race_code_venue(&stored.race_id)).to_string(),
            race_number: race.race_bango.trim_start_matches('0').to_string(),
            race_time: if race.hasso_jikoku.trim().is_empty() {
                "00:00".to_string()
            } else {
                race.hasso_jikoku.clone()
            },
            prediction_result: stored.result,
            predicted_at: stored.predicted_at,
            is_final: stored.is_final,
        }))
    }

    /// Prediction history for a race, newest first.
    pub async fn list_predictions(
        &self,
        race_id: &str,
        is_final: Option<bool>,
    ) -> EngineResult<Vec<PredictionHistoryItem>> {
        if self.is_mock() {
            return Ok(Vec::new());
        }
        let pool = self.db()?;
        let stored = prediction_store::get_predictions_by_race(pool, race_id, is_final).await?;
        Ok(stored
            .into_iter()
            .map(|s| PredictionHistoryItem {
                prediction_id: s.prediction_id,
                predicted_at: s.predicted_at,
                is_final: s.is_final,
                prediction_confidence: s.result.prediction_confidence,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mock_service() -> PredictionService {
        let config = Config {
            db_host: String::new(),
            db_port: 5432,
            db_name: String::new(),
            db_user: String::new(),
            db_password: String::new(),
            db_pool_min_size: 1,
            db_pool_max_size: 1,
            db_mode: DbMode::Mock,
            port: 0,
            model_dir: "models".into(),
            bias_date: None,
            retrain_enabled: false,
        };
        PredictionService::new(None, config, Arc::new(ModelManager::new("models")))
    }

    #[tokio::test]
    async fn test_mock_mode_prediction() {
        let service = mock_service();
        let response = service
            .generate_prediction("2025012506010911", false, None)
            .await
            .unwrap();

        let horses = &response.prediction_result.ranked_horses;
        assert!(horses.len() >= 5);
        for (i, h) in horses.iter().enumerate() {
            assert_eq!(h.rank, (i + 1) as u32);
            assert!((0.0..=1.0).contains(&h.win_probability));
        }
        let win_sum: f64 = horses.iter().map(|h| h.win_probability).sum();
        assert!((win_sum - 1.0).abs() <= 0.1);
        assert_eq!(response.race_id, "2025012506010911");
    }

    #[tokio::test]
    async fn test_mock_mode_lookups_are_empty() {
        let service = mock_service();
        assert!(service.get_prediction("any").await.unwrap().is_none());
        assert!(service
            .list_predictions("2025012506010911", None)
            .await
            .unwrap()
            .is_empty());
    }
}
