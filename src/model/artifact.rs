//! Artifact file I/O.
//!
//! Artifacts are single JSON blobs written to a temp file and renamed into
//! place, so a reader never observes a torn file.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{EngineError, EngineResult};
use crate::model::ensemble::EnsembleModel;
use crate::models::Surface;

/// Active artifact file name for a surface variant.
pub fn active_file_name(surface: Surface) -> String {
    match surface {
        Surface::Mixed => "ensemble_model_latest.json".to_string(),
        _ => format!("ensemble_model_{}_latest.json", surface.as_str()),
    }
}

/// Staging file name a fresh training run writes before promotion.
pub fn staging_file_name(surface: Surface) -> String {
    match surface {
        Surface::Mixed => "ensemble_model_new.json".to_string(),
        _ => format!("ensemble_model_{}_new.json", surface.as_str()),
    }
}

pub fn save(model: &EnsembleModel, path: &Path) -> EngineResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp: PathBuf = path.with_extension("json.tmp");
    let payload = serde_json::to_vec(model)?;
    fs::write(&tmp, payload)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

pub fn load(path: &Path) -> EngineResult<EnsembleModel> {
    let raw = fs::read(path)
        .map_err(|e| EngineError::Model(format!("artifact {}: {}", path.display(), e)))?;
    let model: EnsembleModel = serde_json::from_slice(&raw)
        .map_err(|e| EngineError::Model(format!("artifact {}: {}", path.display(), e)))?;
    Ok(model)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_names() {
        assert_eq!(active_file_name(Surface::Mixed), "ensemble_model_latest.json");
        assert_eq!(
            active_file_name(Surface::Turf),
            "ensemble_model_turf_latest.json"
        );
        assert_eq!(staging_file_name(Surface::Dirt), "ensemble_model_dirt_new.json");
    }

    #[test]
    fn test_load_missing_is_model_error() {
        let err = load(Path::new("/nonexistent/model.json")).unwrap_err();
        assert!(matches!(err, EngineError::Model(_)));
    }
}
