//! Ensemble model: shared tree core, three boosting families, calibration,
//! artifact serialization and the live-model manager.

pub mod artifact;
pub mod boosting;
pub mod calibration;
pub mod ensemble;
pub mod manager;
pub mod tree;

pub use boosting::{Gbdt, GbdtParams, Growth, Objective};
pub use calibration::EnsembleCalibrator;
pub use ensemble::{EnsembleModel, EnsembleWeights, ModelTriple, ScoreBundle};
pub use manager::ModelManager;
pub use tree::FeatureMatrix;
