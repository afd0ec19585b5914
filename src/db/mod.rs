//! Storage seams consumed by the backup manager and the sync service.
//!
//! Bulk table operations are expressed as whole-table calls so that a
//! relational backend can implement them as single SQL statements.

pub mod memory;
pub mod pool;
pub mod postgres;
pub mod tables;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StoreError;
use crate::models::{BackupMetadata, VehicleRecord, VendorSession};

pub use memory::MemoryStore;
pub use pool::{create_pool, run_migrations};
pub use postgres::PgStore;

/// Table snapshot and metadata operations
#[async_trait]
pub trait BackupStore: Send + Sync {
    /// Cheap connectivity probe
    async fn ping(&self) -> Result<(), StoreError>;

    async fn table_exists(&self, table: &str) -> Result<bool, StoreError>;

    async fn count_rows(&self, table: &str) -> Result<i64, StoreError>;

    /// Create `target` holding every row of `source`; returns rows copied
    async fn copy_table_full(&self, source: &str, target: &str) -> Result<i64, StoreError>;

    /// Create `target` holding rows of `source` updated after `since`
    async fn copy_table_since(
        &self,
        source: &str,
        target: &str,
        since: DateTime<Utc>,
    ) -> Result<i64, StoreError>;

    /// Empty `target` and refill it from `backup_table`
    async fn restore_replace(&self, backup_table: &str, target: &str) -> Result<i64, StoreError>;

    /// Replace rows of `target` last updated at or before `cutoff` with the
    /// backup's rows, keeping anything written after `cutoff`
    async fn restore_merge(
        &self,
        backup_table: &str,
        target: &str,
        cutoff: DateTime<Utc>,
    ) -> Result<i64, StoreError>;

    async fn drop_table(&self, table: &str) -> Result<(), StoreError>;

    async fn insert_metadata(&self, metadata: &BackupMetadata) -> Result<(), StoreError>;

    async fn set_verified(&self, id: &str, verified: bool) -> Result<(), StoreError>;

    async fn get_metadata(&self, id: &str) -> Result<Option<BackupMetadata>, StoreError>;

    /// All metadata rows, newest first
    async fn list_metadata(&self) -> Result<Vec<BackupMetadata>, StoreError>;

    async fn delete_metadata(&self, id: &str) -> Result<(), StoreError>;
}

/// Vendor session and vehicle persistence
#[async_trait]
pub trait FleetStore: Send + Sync {
    /// Most recently created session that has not expired at `now`
    async fn latest_valid_session(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Option<VendorSession>, StoreError>;

    async fn save_session(&self, session: &VendorSession) -> Result<(), StoreError>;

    /// Insert or update by `device_id`
    async fn upsert_vehicle(&self, record: &VehicleRecord) -> Result<(), StoreError>;
}
