//! Training, evaluation and the weekly retrain pipeline.

pub mod dataset;
pub mod evaluator;
pub mod optimizer;
pub mod retrain;
pub mod trainer;

pub use dataset::{time_split, TrainingFrame};
pub use evaluator::{compare_models, composite_score, ModelEvaluation};
pub use optimizer::HyperSearch;
pub use retrain::run_retrain;
pub use trainer::{fit_ensemble, train_new_model};
