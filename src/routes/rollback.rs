use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;

use super::validation::{require_admin, validate_tables, AdminQuery};
use crate::error::Result;
use crate::models::{RollbackOptions, RollbackResult};
use crate::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryRequest {
    pub target_time: DateTime<Utc>,
    #[serde(default)]
    pub tables: Option<Vec<String>>,
}

fn respond(result: RollbackResult) -> (StatusCode, Json<RollbackResult>) {
    let status = if result.success {
        StatusCode::OK
    } else {
        StatusCode::UNPROCESSABLE_ENTITY
    };
    (status, Json(result))
}

/// Restore tables from a backup
///
/// POST /api/rollback?key=<admin_secret_key>
pub async fn rollback(
    State(state): State<AppState>,
    Query(query): Query<AdminQuery>,
    Json(options): Json<RollbackOptions>,
) -> Result<(StatusCode, Json<RollbackResult>)> {
    require_admin(&state, &query)?;
    validate_tables(options.tables.as_deref())?;

    tracing::info!(
        "Rollback to {} requested (dry run: {}, preserve new data: {})",
        options.backup_id,
        options.dry_run,
        options.preserve_new_data
    );
    Ok(respond(state.backups.rollback_to_backup(options).await))
}

/// Restore the newest backup taken at or before `targetTime`
///
/// POST /api/recovery?key=<admin_secret_key>
pub async fn recovery(
    State(state): State<AppState>,
    Query(query): Query<AdminQuery>,
    Json(request): Json<RecoveryRequest>,
) -> Result<(StatusCode, Json<RollbackResult>)> {
    require_admin(&state, &query)?;
    validate_tables(request.tables.as_deref())?;

    let result = state
        .backups
        .perform_point_in_time_recovery(request.target_time, request.tables)
        .await;
    Ok(respond(result))
}
