use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug, Clone, Serialize)]
#[serde(tag = "type", content = "message")]
pub enum AppError {
    #[error("Engine error: {0}")]
    EngineError(String),

    #[error("Engine unavailable: {0}")]
    EngineUnavailable(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid transition: {0}")]
    InvalidTransition(String),

    #[error("Cancelled: {0}")]
    Cancelled(String),

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("IO error: {0}")]
    IoError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => AppError::NotFound(err.to_string()),
            _ => AppError::IoError(err.to_string()),
        }
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            AppError::EngineError("Request timed out".to_string())
        } else if err.is_connect() {
            AppError::EngineError(format!("Failed to connect: {}", err))
        } else if let Some(status) = err.status() {
            match status.as_u16() {
                404 | 410 => AppError::NotFound(format!("HTTP {}", status)),
                401 | 403 => AppError::EngineError(format!("Access denied (HTTP {})", status)),
                _ => AppError::EngineError(format!("HTTP error: {}", status)),
            }
        } else {
            AppError::EngineError(err.to_string())
        }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::SerializationError(err.to_string())
    }
}

impl From<uuid::Error> for AppError {
    fn from(err: uuid::Error) -> Self {
        AppError::InvalidInput(format!("Invalid UUID: {}", err))
    }
}

impl From<std::num::ParseIntError> for AppError {
    fn from(err: std::num::ParseIntError) -> Self {
        AppError::InvalidInput(format!("Invalid number: {}", err))
    }
}

impl From<tokio::task::JoinError> for AppError {
    fn from(err: tokio::task::JoinError) -> Self {
        AppError::InternalError(format!("Task failed: {}", err))
    }
}

impl AppError {
    /// Message without the category prefix, for display next to a job
    pub fn user_message(&self) -> String {
        match self {
            AppError::EngineError(m)
            | AppError::EngineUnavailable(m)
            | AppError::NotFound(m)
            | AppError::InvalidInput(m)
            | AppError::InvalidTransition(m)
            | AppError::Cancelled(m)
            | AppError::StorageError(m)
            | AppError::SerializationError(m)
            | AppError::IoError(m)
            | AppError::ConfigError(m)
            | AppError::InternalError(m) => m.clone(),
        }
    }

    /// Whether a metadata lookup failing with this error is worth another attempt
    pub fn is_retryable(&self) -> bool {
        match self {
            AppError::EngineError(_) | AppError::IoError(_) | AppError::InternalError(_) => true,

            AppError::EngineUnavailable(_)
            | AppError::NotFound(_)
            | AppError::InvalidInput(_)
            | AppError::InvalidTransition(_)
            | AppError::Cancelled(_)
            | AppError::StorageError(_)
            | AppError::SerializationError(_)
            | AppError::ConfigError(_) => false,
        }
    }
}

// Result type alias for convenience
pub type AppResult<T> = Result<T, AppError>;
