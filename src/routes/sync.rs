use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;

use super::validation::{require_admin, AdminQuery};
use crate::error::Result;
use crate::gp51::{FullSyncReport, LoginResult};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

/// Run a full vendor sync now
///
/// POST /api/sync?key=<admin_secret_key>
///
/// 409 when another sync holds a lock, 502 when the device list could not be fetched.
pub async fn full_sync(
    State(state): State<AppState>,
    Query(query): Query<AdminQuery>,
) -> Result<(StatusCode, Json<FullSyncReport>)> {
    require_admin(&state, &query)?;

    let report = state.sync.perform_full_sync().await;
    let status = if report.success {
        StatusCode::OK
    } else if report.is_skipped() {
        StatusCode::CONFLICT
    } else {
        StatusCode::BAD_GATEWAY
    };
    Ok((status, Json(report)))
}

/// Log in to the vendor and store the session
///
/// POST /api/gp51/login?key=<admin_secret_key>
pub async fn login(
    State(state): State<AppState>,
    Query(query): Query<AdminQuery>,
    Json(request): Json<LoginRequest>,
) -> Result<(StatusCode, Json<LoginResult>)> {
    require_admin(&state, &query)?;

    let result = state
        .auth
        .authenticate(&request.username, &request.password)
        .await;
    let status = if result.success {
        StatusCode::OK
    } else if result.is_rate_limited() {
        StatusCode::TOO_MANY_REQUESTS
    } else {
        StatusCode::UNAUTHORIZED
    };
    Ok((status, Json(result)))
}
