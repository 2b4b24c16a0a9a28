//! HTTP error envelope.
//!
//! Only this layer produces HTTP-shaped errors; everything below returns
//! `EngineError`. Envelope: `{"error": {"code", "message", "details"}}`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use crate::error::EngineError;

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
    pub details: serde_json::Value,
}

impl ApiError {
    pub fn race_not_found(race_id: &str) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            code: "RACE_NOT_FOUND",
            message: "The requested race does not exist".to_string(),
            details: json!({ "race_id": race_id }),
        }
    }

    pub fn horse_not_found(kettonum: &str) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            code: "HORSE_NOT_FOUND",
            message: "The requested horse does not exist".to_string(),
            details: json!({ "kettonum": kettonum }),
        }
    }

    pub fn prediction_not_found(prediction_id: &str) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            code: "PREDICTION_NOT_FOUND",
            message: "The requested prediction does not exist".to_string(),
            details: json!({ "prediction_id": prediction_id }),
        }
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            code: "INVALID_REQUEST",
            message: message.into(),
            details: json!({}),
        }
    }

    pub fn prediction_timeout() -> Self {
        Self {
            status: StatusCode::GATEWAY_TIMEOUT,
            code: "PREDICTION_TIMEOUT",
            message: "Prediction generation timed out".to_string(),
            details: json!({}),
        }
    }

    pub fn database(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            code: "DATABASE_ERROR",
            message: message.into(),
            details: json!({}),
        }
    }
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::MissingData(msg) => Self {
                status: StatusCode::NOT_FOUND,
                code: "RACE_NOT_FOUND",
                message: msg,
                details: json!({}),
            },
            EngineError::InvalidInput(msg) => Self::invalid_request(msg),
            EngineError::Database(msg) => {
                tracing::error!("Database error: {}", msg);
                Self::database("A database error occurred")
            }
            EngineError::Prediction(msg) | EngineError::Model(msg) | EngineError::Training(msg) => {
                tracing::error!("Prediction pipeline error: {}", msg);
                Self {
                    status: StatusCode::INTERNAL_SERVER_ERROR,
                    code: "PREDICTION_ERROR",
                    message: msg,
                    details: json!({}),
                }
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = json!({
            "error": {
                "code": self.code,
                "message": self.message,
                "details": self.details,
            }
        });
        (self.status, axum::Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_error_mapping() {
        let api: ApiError = EngineError::MissingData("race not found: x".to_string()).into();
        assert_eq!(api.code, "RACE_NOT_FOUND");
        assert_eq!(api.status, StatusCode::NOT_FOUND);

        let api: ApiError = EngineError::InvalidInput("bad".to_string()).into();
        assert_eq!(api.code, "INVALID_REQUEST");

        let api: ApiError = EngineError::Database("down".to_string()).into();
        assert_eq!(api.code, "DATABASE_ERROR");
        assert_eq!(api.status, StatusCode::INTERNAL_SERVER_ERROR);
    }
}
