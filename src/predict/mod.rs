//! Prediction path: inference engine, adjusters, probability derivation,
//! response assembly and the service facade.

pub mod bias;
pub mod engine;
pub mod output;
pub mod probability;
pub mod service;
pub mod track;

pub use output::{PredictionResponse, PredictionResult};
pub use service::{PredictionHistoryItem, PredictionService};
