use serde::Deserialize;

use crate::constants::ERR_INVALID_ADMIN_KEY;
use crate::db::tables::validate_table_name;
use crate::error::{AppError, Result};
use crate::AppState;

/// Query parameters carried by every admin endpoint
#[derive(Debug, Deserialize)]
pub struct AdminQuery {
    /// Admin secret key for authentication
    pub key: Option<String>,
}

/// Reject the request unless `?key=` matches the configured admin secret
pub fn require_admin(state: &AppState, query: &AdminQuery) -> Result<()> {
    match query.key.as_deref() {
        Some(key) if key == state.config.admin_secret_key => Ok(()),
        Some(_) => {
            tracing::warn!("{}", ERR_INVALID_ADMIN_KEY);
            Err(AppError::Unauthorized)
        }
        None => Err(AppError::Unauthorized),
    }
}

/// Check caller-supplied table names before they reach the store
pub fn validate_tables(tables: Option<&[String]>) -> Result<()> {
    let Some(tables) = tables else {
        return Ok(());
    };
    if tables.is_empty() {
        return Err(AppError::InvalidInput("Table list cannot be empty".to_string()));
    }
    for table in tables {
        validate_table_name(table).map_err(|e| AppError::InvalidInput(e.to_string()))?;
    }
    Ok(())
}
