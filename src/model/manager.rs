//! Model manager: owns the live artifact per surface variant.
//!
//! Loaded artifacts are immutable; the live pointer is swapped atomically so
//! in-flight predictions keep the reference they started with. Promotion
//! backs the current file up with a timestamp before the staged artifact is
//! moved into place; promotions are serialized by a mutex.

use arc_swap::ArcSwapOption;
use chrono::Utc;
use parking_lot::Mutex;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use crate::error::{EngineError, EngineResult};
use crate::model::artifact;
use crate::model::ensemble::EnsembleModel;
use crate::models::Surface;

pub struct ModelManager {
    model_dir: PathBuf,
    mixed: ArcSwapOption<EnsembleModel>,
    turf: ArcSwapOption<EnsembleModel>,
    dirt: ArcSwapOption<EnsembleModel>,
    promote_lock: Mutex<()>,
}

impl ModelManager {
    pub fn new(model_dir: impl Into<PathBuf>) -> Self {
        Self {
            model_dir: model_dir.into(),
            mixed: ArcSwapOption::empty(),
            turf: ArcSwapOption::empty(),
            dirt: ArcSwapOption::empty(),
            promote_lock: Mutex::new(()),
        }
    }

    pub fn model_dir(&self) -> &Path {
        &self.model_dir
    }

    pub fn active_path(&self, surface: Surface) -> PathBuf {
        self.model_dir.join(artifact::active_file_name(surface))
    }

    pub fn staging_path(&self, surface: Surface) -> PathBuf {
        self.model_dir.join(artifact::staging_file_name(surface))
    }

    fn slot(&self, surface: Surface) -> &ArcSwapOption<EnsembleModel> {
        match surface {
            Surface::Mixed => &self.mixed,
            Surface::Turf => &self.turf,
            Surface::Dirt => &self.dirt,
        }
    }

    /// Artifact file a surface resolves to: the surface-specific file when
    /// present, otherwise the mixed artifact.
    pub fn resolve_path(&self, surface: Surface) -> PathBuf {
        let specific = self.active_path(surface);
        if surface != Surface::Mixed && !specific.exists() {
            return self.active_path(Surface::Mixed);
        }
        specific
    }

    /// Live artifact for a surface, loading it on first use. Falls back to
    /// the mixed artifact when the surface-specific one is absent.
    pub fn load(&self, surface: Surface) -> EngineResult<Arc<EnsembleModel>> {
        if let Some(model) = self.slot(surface).load_full() {
            return Ok(model);
        }
        let path = self.resolve_path(surface);
        let model = Arc::new(artifact::load(&path)?);
        info!(
            "Model loaded: {} (version {}, {} features)",
            path.display(),
            model.version,
            model.feature_names.len()
        );
        self.slot(surface).store(Some(Arc::clone(&model)));
        Ok(model)
    }

    /// Reload every surface variant from disk. Idempotent; surfaces without
    /// any artifact simply stay empty.
    pub fn reload(&self) -> EngineResult<()> {
        for surface in [Surface::Mixed, Surface::Turf, Surface::Dirt] {
            let path = self.resolve_path(surface);
            if !path.exists() {
                self.slot(surface).store(None);
                continue;
            }
            match artifact::load(&path) {
                Ok(model) => self.slot(surface).store(Some(Arc::new(model))),
                Err(e) => {
                    warn!("Reload failed for {}: {}", path.display(), e);
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    /// Copy the active artifact into the timestamped backup directory.
    /// Returns the backup path, or None when there is nothing to back up.
    pub fn backup_current(&self, surface: Surface) -> EngineResult<Option<PathBuf>> {
        let current = self.active_path(surface);
        if !current.exists() {
            warn!("No current model to back up: {}", current.display());
            return Ok(None);
        }
        let backup_dir = self.model_dir.join("backups");
        fs::create_dir_all(&backup_dir)?;
        let timestamp = Utc::now().format("%Y%m%d_%H%M%S");
        let backup_path = backup_dir.join(format!("ensemble_model_{}.json", timestamp));
        fs::copy(&current, &backup_path)?;
        info!("Model backed up: {}", backup_path.display());
        Ok(Some(backup_path))
    }

    /// Promote a staged artifact: back up the current one, move the staged
    /// file to the active path, and swap the live pointer.
    pub fn promote(&self, surface: Surface, staged: &Path) -> EngineResult<()> {
        let _guard = self.promote_lock.lock();

        if !staged.exists() {
            return Err(EngineError::Model(format!(
                "staged artifact missing: {}",
                staged.display()
            )));
        }
        self.backup_current(surface)?;

        let active = self.active_path(surface);
        if let Some(parent) = active.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::rename(staged, &active)?;
        info!("New model deployed: {}", active.display());

        let model = Arc::new(artifact::load(&active)?);
        self.slot(surface).store(Some(model));
        Ok(())
    }

    /// Discard a staged artifact (training aborted or comparison lost).
    pub fn discard_staged(&self, staged: &Path) {
        if staged.exists() {
            if let Err(e) = fs::remove_file(staged) {
                warn!("Failed to remove staged artifact {}: {}", staged.display(), e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::boosting::{Gbdt, GbdtParams, Growth, Objective};
    use crate::model::ensemble::{ArtifactMetadata, EnsembleWeights, ModelTriple};
    use crate::model::tree::FeatureMatrix;

    fn dummy_model(tag: f64) -> EnsembleModel {
        let rows: Vec<Vec<f64>> = (0..20).map(|i| vec![i as f64]).collect();
        let y: Vec<f64> = rows.iter().map(|r| r[0] + tag).collect();
        let x = FeatureMatrix::from_rows(&rows);
        let params = GbdtParams {
            n_estimators: 3,
            ..Default::default()
        };
        let gbdt = Gbdt::train(&params, Objective::SquaredError, Growth::DepthWise, &x, &y, None);
        EnsembleModel {
            version: "v2_ranking_ensemble".to_string(),
            model_type: "ranker".to_string(),
            feature_names: vec!["win_rate".to_string()],
            weights: EnsembleWeights::default(),
            rankers: ModelTriple {
                hist: gbdt.clone(),
                leafwise: gbdt.clone(),
                ordered: Some(gbdt),
            },
            win: None,
            quinella: None,
            place: None,
            win_calibrator: None,
            quinella_calibrator: None,
            place_calibrator: None,
            metadata: ArtifactMetadata::default(),
        }
    }

    #[test]
    fn test_load_reload_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let manager = ModelManager::new(dir.path());

        let model = dummy_model(0.0);
        artifact::save(&model, &manager.active_path(Surface::Mixed)).unwrap();

        let loaded = manager.load(Surface::Mixed).unwrap();
        assert_eq!(loaded.version, "v2_ranking_ensemble");

        // Turf falls back to mixed when no turf artifact exists
        let turf = manager.load(Surface::Turf).unwrap();
        assert_eq!(turf.version, loaded.version);

        manager.reload().unwrap();
        assert!(manager.load(Surface::Mixed).is_ok());
    }

    #[test]
    fn test_promote_backs_up_and_swaps() {
        let dir = tempfile::tempdir().unwrap();
        let manager = ModelManager::new(dir.path());

        artifact::save(&dummy_model(0.0), &manager.active_path(Surface::Mixed)).unwrap();
        let old = manager.load(Surface::Mixed).unwrap();

        let staged = manager.staging_path(Surface::Mixed);
        artifact::save(&dummy_model(100.0), &staged).unwrap();
        manager.promote(Surface::Mixed, &staged).unwrap();

        assert!(!staged.exists());
        let new = manager.load(Surface::Mixed).unwrap();
        // The live pointer changed but the old Arc is still usable
        assert!(!Arc::ptr_eq(&old, &new));

        let backups: Vec<_> = std::fs::read_dir(dir.path().join("backups"))
            .unwrap()
            .collect();
        assert_eq!(backups.len(), 1);
    }

    #[test]
    fn test_promote_missing_staged_fails() {
        let dir = tempfile::tempdir().unwrap();
        let manager = ModelManager::new(dir.path());
        let err = manager
            .promote(Surface::Mixed, Path::new("/no/such/file.json"))
            .unwrap_err();
        assert!(matches!(err, EngineError::Model(_)));
    }
}
