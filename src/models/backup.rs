use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Snapshot strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackupType {
    /// Complete copy of every table
    Full,
    /// Only rows changed since the last backup covering each table
    Incremental,
    /// Complete copy of a caller-chosen table subset
    Selective,
}

impl BackupType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackupType::Full => "full",
            BackupType::Incremental => "incremental",
            BackupType::Selective => "selective",
        }
    }
}

impl fmt::Display for BackupType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackupType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "full" => Ok(BackupType::Full),
            "incremental" => Ok(BackupType::Incremental),
            "selective" => Ok(BackupType::Selective),
            other => Err(format!("Unknown backup type: {}", other)),
        }
    }
}

/// Persisted description of one completed snapshot
///
/// Immutable after creation except for `is_verified`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupMetadata {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub backup_type: BackupType,
    pub created_at: DateTime<Utc>,
    /// Estimate, see `ESTIMATED_BYTES_PER_RECORD`
    pub size_bytes: i64,
    /// Physical backup table names (`{table}_backup_{suffix}`), never empty
    pub tables: Vec<String>,
    pub record_count: i64,
    /// Row-count fingerprint over `tables`
    pub checksum: String,
    pub is_verified: bool,
    pub can_rollback: bool,
    pub expires_at: Option<DateTime<Utc>>,
    pub tags: Vec<String>,
}

/// Backup job state machine: pending -> running -> completed | failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Whether moving to `target` is a legal transition
    pub fn can_transition_to(&self, target: JobStatus) -> bool {
        if *self == target {
            return true;
        }
        match self {
            JobStatus::Pending => matches!(target, JobStatus::Running | JobStatus::Failed),
            JobStatus::Running => matches!(target, JobStatus::Completed | JobStatus::Failed),
            JobStatus::Completed | JobStatus::Failed => false,
        }
    }
}

/// In-memory progress record for one backup creation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupJob {
    pub id: String,
    pub status: JobStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    /// 0-100, never decreases
    pub progress: u8,
    pub current_table: Option<String>,
    pub metadata: Option<BackupMetadata>,
    pub error: Option<String>,
}

impl BackupJob {
    pub fn new(id: String, now: DateTime<Utc>) -> Self {
        Self {
            id,
            status: JobStatus::Pending,
            started_at: now,
            completed_at: None,
            progress: 0,
            current_table: None,
            metadata: None,
            error: None,
        }
    }

    /// Apply a status change if the state machine allows it
    pub fn transition(&mut self, target: JobStatus) -> bool {
        if !self.status.can_transition_to(target) {
            tracing::warn!(
                "Rejected job {} transition {:?} -> {:?}",
                self.id,
                self.status,
                target
            );
            return false;
        }
        self.status = target;
        if target.is_terminal() {
            self.completed_at = Some(Utc::now());
        }
        true
    }

    /// Raise progress; lower values are ignored
    pub fn advance(&mut self, progress: u8, current_table: Option<String>) {
        self.progress = self.progress.max(progress.min(100));
        self.current_table = current_table;
    }
}

/// Age and count limits applied after a successful backup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetentionPolicy {
    /// Backups older than this many days are deleted
    pub days: u32,
    /// Newest backups kept once the age limit is applied
    pub max_backups: usize,
}

impl RetentionPolicy {
    fn max_age(&self) -> Option<Duration> {
        Duration::try_days(i64::from(self.days))
    }

    /// Backups created before this are expired at `now`.
    ///
    /// `None` when the age limit reaches past the representable calendar, in
    /// which case nothing is old enough to expire.
    pub fn cutoff(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.max_age().and_then(|age| now.checked_sub_signed(age))
    }

    /// Expiry of a backup created at `created_at`, if representable
    pub fn expiry(&self, created_at: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.max_age().and_then(|age| created_at.checked_add_signed(age))
    }
}

fn default_true() -> bool {
    true
}

/// Request for [`crate::backup::BackupManager::create_backup`]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupOptions {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "default_backup_type")]
    pub backup_type: BackupType,
    /// Explicit table set; falls back to the configured core tables
    #[serde(default)]
    pub tables: Option<Vec<String>>,
    #[serde(default)]
    pub include_system_tables: bool,
    #[serde(default = "default_true")]
    pub verify: bool,
    #[serde(default)]
    pub retention: Option<RetentionPolicy>,
    #[serde(default)]
    pub tags: Vec<String>,
}

fn default_backup_type() -> BackupType {
    BackupType::Full
}

impl Default for BackupOptions {
    fn default() -> Self {
        Self {
            name: None,
            description: None,
            backup_type: BackupType::Full,
            tables: None,
            include_system_tables: false,
            verify: true,
            retention: None,
            tags: Vec::new(),
        }
    }
}

/// Request for [`crate::backup::BackupManager::rollback_to_backup`]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RollbackOptions {
    pub backup_id: String,
    /// Source table names to restore; all tables of the backup when absent
    #[serde(default)]
    pub tables: Option<Vec<String>>,
    #[serde(default)]
    pub dry_run: bool,
    /// Merge instead of replace, keeping rows written after the backup
    #[serde(default)]
    pub preserve_new_data: bool,
    /// Snapshot the current state first so the rollback can be undone
    #[serde(default)]
    pub create_rollback_point: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RollbackResult {
    pub success: bool,
    pub dry_run: bool,
    /// Source tables restored (or that would be, for a dry run)
    pub restored_tables: Vec<String>,
    pub records_restored: i64,
    pub duration_ms: u64,
    pub warnings: Vec<String>,
    pub rollback_point_id: Option<String>,
    pub error: Option<String>,
}

impl RollbackResult {
    pub fn failed(error: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            success: false,
            duration_ms,
            error: Some(error.into()),
            ..Default::default()
        }
    }
}

/// Result of re-deriving a backup's checksum
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationReport {
    pub backup_id: String,
    pub valid: bool,
    pub missing_tables: Vec<String>,
    pub expected_checksum: String,
    pub actual_checksum: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RetentionReport {
    pub expired_deleted: Vec<String>,
    pub excess_deleted: Vec<String>,
}

impl RetentionReport {
    pub fn total_deleted(&self) -> usize {
        self.expired_deleted.len() + self.excess_deleted.len()
    }
}
