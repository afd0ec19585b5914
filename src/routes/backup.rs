use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde_json::{json, Value};

use super::validation::{require_admin, validate_tables, AdminQuery};
use crate::error::{AppError, Result};
use crate::models::{BackupJob, BackupMetadata, BackupOptions, RetentionPolicy, RetentionReport, VerificationReport};
use crate::AppState;

/// Start a backup job
///
/// POST /api/backups?key=<admin_secret_key>
///
/// Responds 202 with the pending job; poll `/api/backups/jobs/:job_id`.
pub async fn create_backup(
    State(state): State<AppState>,
    Query(query): Query<AdminQuery>,
    Json(options): Json<BackupOptions>,
) -> Result<(StatusCode, Json<BackupJob>)> {
    require_admin(&state, &query)?;
    validate_tables(options.tables.as_deref())?;

    let job = state.backups.create_backup(options);
    tracing::info!("Backup job {} started", job.id);
    Ok((StatusCode::ACCEPTED, Json(job)))
}

pub async fn list_backups(
    State(state): State<AppState>,
    Query(query): Query<AdminQuery>,
) -> Result<Json<Vec<BackupMetadata>>> {
    require_admin(&state, &query)?;
    Ok(Json(state.backups.list_backups().await?))
}

pub async fn list_jobs(
    State(state): State<AppState>,
    Query(query): Query<AdminQuery>,
) -> Result<Json<Vec<BackupJob>>> {
    require_admin(&state, &query)?;
    Ok(Json(state.backups.list_jobs()))
}

pub async fn job_status(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
    Query(query): Query<AdminQuery>,
) -> Result<Json<BackupJob>> {
    require_admin(&state, &query)?;
    state
        .backups
        .get_job_status(&job_id)
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("Job not found: {}", job_id)))
}

pub async fn verify_backup(
    State(state): State<AppState>,
    Path(backup_id): Path<String>,
    Query(query): Query<AdminQuery>,
) -> Result<Json<VerificationReport>> {
    require_admin(&state, &query)?;
    Ok(Json(state.backups.verify_backup(&backup_id).await?))
}

pub async fn delete_backup(
    State(state): State<AppState>,
    Path(backup_id): Path<String>,
    Query(query): Query<AdminQuery>,
) -> Result<Json<Value>> {
    require_admin(&state, &query)?;
    state.backups.delete_backup(&backup_id).await?;
    Ok(Json(json!({ "success": true, "deleted": backup_id })))
}

pub async fn enforce_retention(
    State(state): State<AppState>,
    Query(query): Query<AdminQuery>,
    Json(policy): Json<RetentionPolicy>,
) -> Result<Json<RetentionReport>> {
    require_admin(&state, &query)?;
    Ok(Json(state.backups.enforce_retention(policy).await?))
}
