use std::fmt;

use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::{error, warn};

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecommenderErrorCode {
    Timeout,
    Unavailable,
    InvalidResponse,
    HttpStatus,
}

impl RecommenderErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            RecommenderErrorCode::Timeout => "RECOMMENDER_TIMEOUT",
            RecommenderErrorCode::Unavailable => "RECOMMENDER_UNAVAILABLE",
            RecommenderErrorCode::InvalidResponse => "RECOMMENDER_INVALID_RESPONSE",
            RecommenderErrorCode::HttpStatus => "RECOMMENDER_HTTP_STATUS",
        }
    }
}

impl fmt::Display for RecommenderErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("validation failed: {message}")]
    Validation {
        message: String,
        details: Option<JsonValue>,
    },

    #[error("{message}")]
    Recommender {
        code: RecommenderErrorCode,
        message: String,
    },

    #[error("scoring failed for client {client_id}: {message}")]
    Scoring { client_id: String, message: String },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl AppError {
    pub fn validation(message: impl Into<String>) -> Self {
        let message = message.into();
        warn!(target: "engine::validation", %message, "validation error");
        AppError::Validation {
            message,
            details: None,
        }
    }

    pub fn validation_with_details(message: impl Into<String>, details: JsonValue) -> Self {
        let message = message.into();
        warn!(target: "engine::validation", %message, details = %details, "validation error with details");
        AppError::Validation {
            message,
            details: Some(details),
        }
    }

    pub fn recommender(code: RecommenderErrorCode, message: impl Into<String>) -> Self {
        let message = message.into();
        warn!(target: "engine::suggest", code = %code, %message, "recommender failure");
        AppError::Recommender { code, message }
    }

    pub fn recommender_code(&self) -> Option<RecommenderErrorCode> {
        match self {
            AppError::Recommender { code, .. } => Some(*code),
            _ => None,
        }
    }

    pub fn scoring(client_id: impl Into<String>, message: impl Into<String>) -> Self {
        let client_id = client_id.into();
        let message = message.into();
        error!(target: "engine::scoring", %client_id, %message, "scoring error");
        AppError::Scoring { client_id, message }
    }

    pub fn other(message: impl Into<String>) -> Self {
        let message = message.into();
        error!(target: "engine::other", %message, "other error");
        AppError::Other(message)
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, AppError::Validation { .. })
    }
}

impl From<reqwest::Error> for AppError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            AppError::recommender(RecommenderErrorCode::Timeout, error.to_string())
        } else if error.is_decode() {
            AppError::recommender(RecommenderErrorCode::InvalidResponse, error.to_string())
        } else if let Some(status) = error.status() {
            AppError::recommender(
                RecommenderErrorCode::HttpStatus,
                format!("recommender responded with {status}"),
            )
        } else {
            AppError::recommender(RecommenderErrorCode::Unavailable, error.to_string())
        }
    }
}
