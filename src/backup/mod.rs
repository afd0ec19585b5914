//! Table-level snapshots with verification, retention and rollback.
//!
//! A backup copies each selected table into `{table}_backup_{suffix}` and
//! records a [`BackupMetadata`] row describing the set. Creation runs as a
//! detached job whose progress is kept in memory and polled through
//! [`BackupManager::get_job_status`]; jobs are lost on restart.

pub mod checksum;
mod retention;
mod rollback;

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use uuid::Uuid;

use crate::constants::{DEFAULT_CORE_TABLES, DEFAULT_SYSTEM_TABLES, ESTIMATED_BYTES_PER_RECORD};
use crate::db::tables::{backup_table_name, source_table_of};
use crate::db::BackupStore;
use crate::error::BackupError;
use crate::models::{
    BackupJob, BackupMetadata, BackupOptions, BackupType, JobStatus, VerificationReport,
};

pub use checksum::{compute_checksum, derive_checksum};

/// Which tables a backup covers when the caller does not say
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupSettings {
    pub core_tables: Vec<String>,
    pub system_tables: Vec<String>,
}

impl Default for BackupSettings {
    fn default() -> Self {
        Self {
            core_tables: DEFAULT_CORE_TABLES.iter().map(|t| t.to_string()).collect(),
            system_tables: DEFAULT_SYSTEM_TABLES.iter().map(|t| t.to_string()).collect(),
        }
    }
}

/// Backup/rollback service. Cheap to clone; clones share jobs and storage.
#[derive(Clone)]
pub struct BackupManager {
    store: Arc<dyn BackupStore>,
    jobs: Arc<DashMap<String, BackupJob>>,
    settings: Arc<BackupSettings>,
    last_suffix: Arc<AtomicI64>,
}

impl std::fmt::Debug for BackupManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackupManager")
            .field("jobs", &self.jobs.len())
            .field("settings", &self.settings)
            .finish()
    }
}

impl BackupManager {
    pub fn new(store: Arc<dyn BackupStore>, settings: BackupSettings) -> Self {
        Self {
            store,
            jobs: Arc::new(DashMap::new()),
            settings: Arc::new(settings),
            last_suffix: Arc::new(AtomicI64::new(0)),
        }
    }

    pub fn store(&self) -> &Arc<dyn BackupStore> {
        &self.store
    }

    // =========================================================================
    // Jobs
    // =========================================================================

    /// Start a backup and return its job immediately.
    ///
    /// The work continues on a spawned task; poll [`Self::get_job_status`].
    pub fn create_backup(&self, options: BackupOptions) -> BackupJob {
        let job = self.register_job();
        let manager = self.clone();
        let job_id = job.id.clone();

        tokio::spawn(async move {
            let worker = manager.clone();
            let worker_job_id = job_id.clone();
            let outcome =
                tokio::spawn(async move { worker.execute_job(&worker_job_id, options).await })
                    .await;

            match outcome {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => tracing::error!("Backup job {} failed: {}", job_id, e),
                Err(e) => {
                    tracing::error!("Backup job {} aborted: {}", job_id, e);
                    manager.fail_job(&job_id, format!("Backup task aborted: {}", e));
                }
            }
        });

        job
    }

    /// Run a backup to completion on the current task
    pub async fn create_backup_and_wait(
        &self,
        options: BackupOptions,
    ) -> Result<BackupMetadata, BackupError> {
        let job = self.register_job();
        self.execute_job(&job.id, options).await
    }

    pub fn get_job_status(&self, job_id: &str) -> Option<BackupJob> {
        self.jobs.get(job_id).map(|job| job.clone())
    }

    /// All known jobs, most recently started first
    pub fn list_jobs(&self) -> Vec<BackupJob> {
        let mut jobs: Vec<BackupJob> = self.jobs.iter().map(|job| job.clone()).collect();
        jobs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        jobs
    }

    fn register_job(&self) -> BackupJob {
        let job = BackupJob::new(Uuid::new_v4().to_string(), Utc::now());
        self.jobs.insert(job.id.clone(), job.clone());
        job
    }

    fn update_job(&self, job_id: &str, update: impl FnOnce(&mut BackupJob)) {
        if let Some(mut job) = self.jobs.get_mut(job_id) {
            update(job.value_mut());
        }
    }

    /// Move a non-terminal job to `Failed`
    fn fail_job(&self, job_id: &str, error: String) {
        self.update_job(job_id, |job| {
            if !job.status.is_terminal() {
                job.error = Some(error);
                job.transition(JobStatus::Failed);
            }
        });
    }

    async fn execute_job(
        &self,
        job_id: &str,
        options: BackupOptions,
    ) -> Result<BackupMetadata, BackupError> {
        self.update_job(job_id, |job| {
            job.transition(JobStatus::Running);
        });

        match self.run_backup(job_id, &options).await {
            Ok(metadata) => {
                tracing::info!(
                    "Backup {} completed: {} tables, {} records",
                    metadata.id,
                    metadata.tables.len(),
                    metadata.record_count
                );
                self.update_job(job_id, |job| {
                    job.advance(100, None);
                    job.metadata = Some(metadata.clone());
                    job.transition(JobStatus::Completed);
                });

                if let Some(policy) = options.retention {
                    if let Err(e) = self.enforce_retention(policy).await {
                        tracing::warn!("Retention enforcement after backup {} failed: {}", metadata.id, e);
                    }
                }

                Ok(metadata)
            }
            Err(e) => {
                self.fail_job(job_id, e.to_string());
                Err(e)
            }
        }
    }

    // =========================================================================
    // Creation
    // =========================================================================

    /// Explicit tables, else core tables plus (optionally) system tables
    fn resolve_tables(&self, options: &BackupOptions) -> Vec<String> {
        let mut tables = match &options.tables {
            Some(tables) => tables.clone(),
            None => self.settings.core_tables.clone(),
        };
        if options.include_system_tables {
            for table in &self.settings.system_tables {
                if !tables.contains(table) {
                    tables.push(table.clone());
                }
            }
        }
        tables
    }

    /// Millisecond suffix for backup table names, strictly increasing per manager
    fn next_suffix(&self, now: DateTime<Utc>) -> i64 {
        let candidate = now.timestamp_millis();
        let previous = self
            .last_suffix
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
                Some(candidate.max(last + 1))
            })
            .unwrap_or(candidate);
        candidate.max(previous + 1)
    }

    /// Creation time of the newest backup containing a copy of `table`
    async fn last_backup_time_for(&self, table: &str) -> Result<Option<DateTime<Utc>>, BackupError> {
        let backups = self.store.list_metadata().await?;
        Ok(backups
            .iter()
            .find(|m| m.tables.iter().any(|t| source_table_of(t) == Some(table)))
            .map(|m| m.created_at))
    }

    async fn run_backup(
        &self,
        job_id: &str,
        options: &BackupOptions,
    ) -> Result<BackupMetadata, BackupError> {
        let tables = self.resolve_tables(options);
        if tables.is_empty() {
            return Err(BackupError::EmptyTableSet);
        }

        let created_at = Utc::now();
        let suffix = self.next_suffix(created_at);
        let mut pairs: Vec<(String, i64)> = Vec::with_capacity(tables.len());

        for (index, table) in tables.iter().enumerate() {
            let progress = (index * 90 / tables.len()) as u8;
            self.update_job(job_id, |job| job.advance(progress, Some(table.clone())));

            let target = backup_table_name(table, suffix);
            match self.copy_table(table, &target, options.backup_type).await {
                Ok(count) => {
                    tracing::debug!("Backed up {} -> {} ({} rows)", table, target, count);
                    pairs.push((target, count));
                }
                Err(e) => {
                    tracing::error!("Backup of table {} failed: {}", table, e);
                    self.discard_tables(pairs.iter().map(|(t, _)| t.as_str())).await;
                    return Err(e);
                }
            }
        }

        let backup_tables: Vec<String> = pairs.iter().map(|(t, _)| t.clone()).collect();
        match self.record_backup(job_id, options, created_at, pairs).await {
            Ok(metadata) => Ok(metadata),
            Err(e) => {
                tracing::error!("Recording backup failed: {}", e);
                self.discard_tables(backup_tables.iter().map(String::as_str))
                    .await;
                Err(e)
            }
        }
    }

    /// Verify (if asked) and persist metadata for freshly copied tables
    async fn record_backup(
        &self,
        job_id: &str,
        options: &BackupOptions,
        created_at: DateTime<Utc>,
        pairs: Vec<(String, i64)>,
    ) -> Result<BackupMetadata, BackupError> {
        let checksum = compute_checksum(&pairs);
        let record_count: i64 = pairs.iter().map(|(_, count)| count).sum();
        let backup_tables: Vec<String> = pairs.into_iter().map(|(t, _)| t).collect();

        let is_verified = if options.verify {
            self.update_job(job_id, |job| job.advance(95, None));
            let derived = derive_checksum(self.store.as_ref(), &backup_tables).await?;
            let valid = derived.missing_tables.is_empty() && derived.checksum == checksum;
            if !valid {
                tracing::warn!(
                    "Verification of new backup failed (missing: {:?})",
                    derived.missing_tables
                );
            }
            valid
        } else {
            false
        };

        let metadata = BackupMetadata {
            id: Uuid::new_v4().to_string(),
            name: options
                .name
                .clone()
                .unwrap_or_else(|| format!("{} backup {}", options.backup_type, created_at.format("%Y-%m-%d %H:%M:%S"))),
            description: options.description.clone(),
            backup_type: options.backup_type,
            created_at,
            size_bytes: record_count * ESTIMATED_BYTES_PER_RECORD,
            tables: backup_tables,
            record_count,
            checksum,
            is_verified,
            can_rollback: true,
            expires_at: options
                .retention
                .and_then(|policy| policy.expiry(created_at)),
            tags: options.tags.clone(),
        };

        self.store.insert_metadata(&metadata).await?;
        Ok(metadata)
    }

    async fn copy_table(
        &self,
        table: &str,
        target: &str,
        backup_type: BackupType,
    ) -> Result<i64, BackupError> {
        if backup_type == BackupType::Incremental {
            if let Some(since) = self.last_backup_time_for(table).await? {
                return Ok(self.store.copy_table_since(table, target, since).await?);
            }
            tracing::info!("No previous backup of {}, taking a full copy", table);
        }
        Ok(self.store.copy_table_full(table, target).await?)
    }

    /// Best-effort drop of physical backup tables
    async fn discard_tables<'a>(&self, tables: impl Iterator<Item = &'a str>) {
        for table in tables {
            if let Err(e) = self.store.drop_table(table).await {
                tracing::warn!("Failed to drop backup table {}: {}", table, e);
            }
        }
    }

    // =========================================================================
    // Queries, verification, deletion
    // =========================================================================

    /// All backups, newest first
    pub async fn list_backups(&self) -> Result<Vec<BackupMetadata>, BackupError> {
        Ok(self.store.list_metadata().await?)
    }

    pub async fn get_backup(&self, backup_id: &str) -> Result<BackupMetadata, BackupError> {
        self.store
            .get_metadata(backup_id)
            .await?
            .ok_or_else(|| BackupError::NotFound(backup_id.to_string()))
    }

    /// Recount a backup's tables, compare with the stored checksum and persist the verdict
    pub async fn verify_backup(&self, backup_id: &str) -> Result<VerificationReport, BackupError> {
        let metadata = self.get_backup(backup_id).await?;
        let derived = derive_checksum(self.store.as_ref(), &metadata.tables).await?;
        let valid = derived.missing_tables.is_empty() && derived.checksum == metadata.checksum;

        self.store.set_verified(backup_id, valid).await?;
        if !valid {
            tracing::warn!(
                "Backup {} failed verification (missing tables: {:?})",
                backup_id,
                derived.missing_tables
            );
        }

        Ok(VerificationReport {
            backup_id: backup_id.to_string(),
            valid,
            missing_tables: derived.missing_tables,
            expected_checksum: metadata.checksum,
            actual_checksum: derived.checksum,
        })
    }

    /// Drop a backup's tables (continuing past failures), then its metadata
    pub async fn delete_backup(&self, backup_id: &str) -> Result<(), BackupError> {
        let metadata = self.get_backup(backup_id).await?;
        self.discard_tables(metadata.tables.iter().map(String::as_str))
            .await;
        self.store.delete_metadata(backup_id).await?;
        tracing::info!("Deleted backup {} ({} tables)", backup_id, metadata.tables.len());
        Ok(())
    }

    /// Row-count fingerprint of arbitrary tables, comparable across calls
    pub async fn table_fingerprint(&self, tables: &[String]) -> Result<String, BackupError> {
        Ok(derive_checksum(self.store.as_ref(), tables).await?.checksum)
    }
}
