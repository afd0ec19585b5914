//! Fleet Backup Server Library
//!
//! Table snapshots and rollback, GP51 vendor sync with named locks, and
//! credential hashing with login rate limiting. Exported for testing and reuse.

pub mod backup;
pub mod config;
pub mod constants;
pub mod db;
pub mod error;
pub mod gp51;
pub mod lock;
pub mod models;
pub mod rate_limiter;
pub mod routes;
pub mod security;

pub use config::Config;
pub use error::{AppError, Result};

use std::sync::Arc;

use backup::{BackupManager, BackupSettings};
use db::{BackupStore, FleetStore};
use error::SyncError;
use gp51::{Authenticator, RetryPolicy, SyncService, VendorClient};
use lock::LockRegistry;
use rate_limiter::RateLimiter;

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub store: Arc<dyn BackupStore>,
    pub backups: BackupManager,
    pub sync: SyncService,
    pub auth: Authenticator,
    pub rate_limiter: Arc<RateLimiter>,
    pub locks: Arc<LockRegistry>,
}

impl AppState {
    /// Wire every service to one store, one lock registry and one rate limiter
    pub fn new<S>(store: Arc<S>, config: Config) -> std::result::Result<Self, SyncError>
    where
        S: BackupStore + FleetStore + 'static,
    {
        let locks = Arc::new(LockRegistry::with_timeout(config.lock_timeout()));
        let rate_limiter = Arc::new(RateLimiter::new(
            config.rate_limit_max_attempts,
            config.rate_limit_window_ms(),
        ));

        let client = VendorClient::new(
            config.gp51_base_url.clone(),
            RetryPolicy {
                attempts: config.gp51_retry_attempts,
                base_delay: config.retry_base_delay(),
            },
        )?;

        let backups = BackupManager::new(
            store.clone(),
            BackupSettings {
                core_tables: config.backup_core_tables.clone(),
                system_tables: config.backup_system_tables.clone(),
            },
        );
        let sync = SyncService::new(client.clone(), store.clone(), locks.clone());
        let auth = Authenticator::new(client, store.clone(), rate_limiter.clone(), config.session_ttl());

        Ok(Self {
            config,
            store,
            backups,
            sync,
            auth,
            rate_limiter,
            locks,
        })
    }
}
