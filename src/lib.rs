//! Keiba Engine Library
//!
//! Probabilistic horse-race prediction: feature extraction, the boosted-tree
//! ensemble with calibration, probability derivation, bias and
//! track-condition adjustment, and the weekly retrain pipeline. Exposed for
//! the server and task binaries plus the test suite.

pub mod api;
pub mod db;
pub mod error;
pub mod features;
pub mod middleware;
pub mod model;
pub mod models;
pub mod predict;
pub mod train;

// Re-export the facade types most callers need
pub use error::{EngineError, EngineResult};
pub use model::ModelManager;
pub use models::{Config, Surface};
pub use predict::{PredictionResponse, PredictionService};
