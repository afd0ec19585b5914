use axum::{
    extract::{Query, State},
    Json,
};

use super::validation::{require_admin, AdminQuery};
use crate::error::Result;
use crate::rate_limiter::SecurityStats;
use crate::AppState;

/// Login security stats
///
/// Returns event counts from the rate limiter's security log.
/// Requires admin secret key passed as query parameter.
///
/// GET /api/security/stats?key=<admin_secret_key>
pub async fn security_stats(
    State(state): State<AppState>,
    Query(query): Query<AdminQuery>,
) -> Result<Json<SecurityStats>> {
    require_admin(&state, &query)?;

    let stats = state.rate_limiter.stats();
    tracing::info!(
        "Security stats requested: {} events, {} recent failures, {} locked",
        stats.total_events,
        stats.recent_failures,
        stats.locked_identifiers
    );

    Ok(Json(stats))
}
