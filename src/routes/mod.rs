pub mod admin;
pub mod backup;
pub mod health;
pub mod rollback;
pub mod sync;
pub mod validation;

use axum::{
    routing::{delete, get, post},
    Router,
};

pub use admin::security_stats;
pub use backup::{
    create_backup, delete_backup, enforce_retention, job_status, list_backups, list_jobs,
    verify_backup,
};
pub use health::health_check;
pub use rollback::{recovery, rollback};
pub use sync::{full_sync, login};
pub use validation::{require_admin, AdminQuery};

use crate::AppState;

/// Every admin route, with state attached
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/backups", post(create_backup).get(list_backups))
        .route("/api/backups/jobs", get(list_jobs))
        .route("/api/backups/jobs/:job_id", get(job_status))
        .route("/api/backups/retention", post(enforce_retention))
        .route("/api/backups/:id", delete(delete_backup))
        .route("/api/backups/:id/verify", post(verify_backup))
        .route("/api/rollback", post(rollback))
        .route("/api/recovery", post(recovery))
        .route("/api/sync", post(full_sync))
        .route("/api/gp51/login", post(login))
        .route("/api/security/stats", get(security_stats))
        .with_state(state)
}
