pub mod backup;
pub mod rate_limit;
pub mod vehicle;

pub use backup::{
    BackupJob, BackupMetadata, BackupOptions, BackupType, JobStatus, RetentionPolicy,
    RetentionReport, RollbackOptions, RollbackResult, VerificationReport,
};
pub use rate_limit::{RateLimitDecision, RateLimitTracking};
pub use vehicle::{RecordIssue, SyncStats, VehicleRecord, VendorRecord, VendorSession};
