use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde_json::json;
use thiserror::Error;

/// Storage layer error
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Invalid table name: {0}")]
    InvalidTableName(String),

    #[error("Table not found: {0}")]
    TableNotFound(String),

    #[error("Table already exists: {0}")]
    TableExists(String),

    #[error("Corrupt metadata row: {0}")]
    CorruptMetadata(String),

    #[error("Write rejected: {0}")]
    Rejected(String),
}

/// Credential hashing and validation error
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HashError {
    #[error("Password cannot be empty")]
    EmptyInput,

    #[error("Generated hash is not 32 lowercase hex characters")]
    Format,

    #[error("Invalid input: {0}")]
    Validation(String),
}

/// Vendor synchronization error
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("No valid vendor session token")]
    NoValidToken,

    #[error("Vendor returned status {status}: {cause}")]
    Vendor { status: i64, cause: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Vendor request failed after {attempts} attempts: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },

    #[error("Vendor returned no devices")]
    EmptyDeviceList,

    #[error("Too many login attempts, retry after {reset_time}")]
    RateLimited { reset_time: DateTime<Utc> },

    #[error("Credential error: {0}")]
    Credential(#[from] HashError),

    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),
}

/// Backup/rollback error
#[derive(Error, Debug)]
pub enum BackupError {
    #[error("Backup not found: {0}")]
    NotFound(String),

    #[error("Backup {0} is not eligible for rollback")]
    NotRollbackEligible(String),

    #[error("No eligible backup found at or before {0}")]
    NoEligibleBackup(DateTime<Utc>),

    #[error("Backup table set is empty")]
    EmptyTableSet,

    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),
}

/// Application error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    #[error("Backup error: {0}")]
    Backup(#[from] BackupError),

    #[error("Sync error: {0}")]
    Sync(#[from] SyncError),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Unauthorized")]
    Unauthorized,
}

/// Implement IntoResponse to convert AppError into HTTP responses
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            AppError::Store(ref e) => {
                tracing::error!("Storage error: {:?}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
            AppError::Backup(BackupError::NotFound(ref id)) => {
                (StatusCode::NOT_FOUND, format!("Backup not found: {}", id))
            }
            AppError::Backup(BackupError::Storage(ref e)) => {
                tracing::error!("Backup storage error: {:?}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
            AppError::Backup(ref e) => (StatusCode::UNPROCESSABLE_ENTITY, e.to_string()),
            AppError::Sync(SyncError::RateLimited { .. }) => (
                StatusCode::TOO_MANY_REQUESTS,
                "Rate limit exceeded - too many requests".to_string(),
            ),
            AppError::Sync(SyncError::Credential(ref e)) => (StatusCode::BAD_REQUEST, e.to_string()),
            AppError::Sync(ref e) => {
                tracing::error!("Sync error: {:?}", e);
                (StatusCode::BAD_GATEWAY, e.to_string())
            }
            AppError::NotFound(ref what) => (StatusCode::NOT_FOUND, what.clone()),
            AppError::InvalidInput(ref msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::Unauthorized => (StatusCode::UNAUTHORIZED, "Unauthorized".to_string()),
        };

        let body = Json(json!({
            "error": error_message
        }));

        (status, body).into_response()
    }
}

/// Result type alias for application results
pub type Result<T> = std::result::Result<T, AppError>;
