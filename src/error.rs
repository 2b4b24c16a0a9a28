//! Engine error taxonomy.
//!
//! Lower layers return these typed errors with enough context for the service
//! facade to decide how to surface them; only the API layer turns them into
//! HTTP-shaped responses.

/// Errors produced by the prediction engine and its collaborators.
#[derive(Debug)]
pub enum EngineError {
    /// The race (or required data for it) does not exist in the store.
    MissingData(String),
    /// Request was syntactically or semantically invalid.
    InvalidInput(String),
    /// Feature extraction or model inference failed.
    Prediction(String),
    /// Model artifact missing, unreadable, or incompatible.
    Model(String),
    /// Training pipeline failure. Never promotes; the old artifact stays live.
    Training(String),
    /// Store-level failure (connection, timeout, malformed row).
    Database(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingData(msg) => write!(f, "missing data: {}", msg),
            Self::InvalidInput(msg) => write!(f, "invalid input: {}", msg),
            Self::Prediction(msg) => write!(f, "prediction failed: {}", msg),
            Self::Model(msg) => write!(f, "model error: {}", msg),
            Self::Training(msg) => write!(f, "training error: {}", msg),
            Self::Database(msg) => write!(f, "database error: {}", msg),
        }
    }
}

impl std::error::Error for EngineError {}

impl From<sqlx::Error> for EngineError {
    fn from(e: sqlx::Error) -> Self {
        Self::Database(e.to_string())
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(e: serde_json::Error) -> Self {
        Self::Model(format!("serialization: {}", e))
    }
}

impl From<std::io::Error> for EngineError {
    fn from(e: std::io::Error) -> Self {
        Self::Model(format!("io: {}", e))
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
