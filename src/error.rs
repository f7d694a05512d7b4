use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Giveaway not found: {0}")]
    NotFound(Uuid),

    #[error("Giveaway already ended: {0}")]
    AlreadyEnded(Uuid),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Participant {participant_id} does not satisfy the entry requirement")]
    NotEligible { participant_id: String },

    #[error("Invalid duration: {0}")]
    InvalidDuration(String),

    #[error("Invalid winner count: {0}")]
    InvalidWinnerCount(String),

    #[error("Persistence failure: {0}")]
    PersistenceFailure(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("External API error: {0}")]
    ExternalApiError(String),

    #[error("Config error: {0}")]
    ConfigError(String),

    #[error("Internal server error: {0}")]
    InternalError(String),

    #[error("HTTP request error: {0}")]
    ReqwestError(#[from] reqwest::Error),

    #[error("JSON serialization/deserialization error: {0}")]
    SerdeJsonError(#[from] serde_json::Error),
}

impl AppError {
    /// 状态冲突（已结束 / 状态不对）在公开接口上只作为 no-op 返回
    pub fn is_state_conflict(&self) -> bool {
        matches!(self, AppError::AlreadyEnded(_) | AppError::InvalidState(_))
    }
}

impl ResponseError for AppError {
    fn error_response(&self) -> HttpResponse {
        let (status_code, error_code, message) = match self {
            AppError::NotFound(_) => (
                actix_web::http::StatusCode::NOT_FOUND,
                "NOT_FOUND",
                self.to_string(),
            ),
            AppError::AlreadyEnded(_) => (
                actix_web::http::StatusCode::CONFLICT,
                "ALREADY_ENDED",
                self.to_string(),
            ),
            AppError::InvalidState(msg) => (
                actix_web::http::StatusCode::CONFLICT,
                "INVALID_STATE",
                msg.clone(),
            ),
            AppError::NotEligible { .. } => {
                log::warn!("Entry rejected: {self}");
                (
                    actix_web::http::StatusCode::FORBIDDEN,
                    "NOT_ELIGIBLE",
                    self.to_string(),
                )
            }
            AppError::InvalidDuration(msg)
            | AppError::InvalidWinnerCount(msg)
            | AppError::ValidationError(msg) => {
                log::warn!("Validation error: {msg}");
                (
                    actix_web::http::StatusCode::BAD_REQUEST,
                    "VALIDATION_ERROR",
                    msg.clone(),
                )
            }
            AppError::ExternalApiError(msg) => {
                log::error!("External API error: {msg}");
                (
                    actix_web::http::StatusCode::BAD_GATEWAY,
                    "EXTERNAL_API_ERROR",
                    msg.clone(),
                )
            }
            AppError::PersistenceFailure(msg) => {
                log::error!("Persistence failure: {msg}");
                (
                    actix_web::http::StatusCode::INTERNAL_SERVER_ERROR,
                    "PERSISTENCE_ERROR",
                    "Failed to persist giveaway".to_string(),
                )
            }
            _ => {
                log::error!("Internal error: {self}");
                (
                    actix_web::http::StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "Internal server error".to_string(),
                )
            }
        };

        HttpResponse::build(status_code).json(json!({
            "success": false,
            "error": {
                "code": error_code,
                "message": message
            }
        }))
    }
}
