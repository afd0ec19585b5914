// =============================================================================
// Named Locks
// =============================================================================

/// Named locks older than this are treated as abandoned (5 minutes)
pub const LOCK_TIMEOUT_MS: i64 = 300_000;

/// Lock key serializing device roster fetches
pub const LOCK_DEVICE_LIST_SYNC: &str = "device-list-sync";

/// Lock key serializing position fetches
pub const LOCK_POSITION_SYNC: &str = "position-sync";

/// Lock key serializing vehicle upserts
pub const LOCK_DATABASE_SYNC: &str = "database-sync";

// =============================================================================
// Vendor API
// =============================================================================

/// Attempts made by the vendor HTTP wrapper before giving up
pub const VENDOR_RETRY_ATTEMPTS: u32 = 3;

/// Linear backoff unit: attempt N waits N * this many milliseconds
pub const VENDOR_RETRY_BASE_DELAY_MS: u64 = 1_000;

/// Vendor status code for an application-level (retryable) error
pub const VENDOR_STATUS_ERROR: i64 = -1;

/// Default lifetime of a vendor session token (hours)
pub const VENDOR_SESSION_TTL_HOURS: i64 = 24;

// =============================================================================
// Credentials & Rate Limiting
// =============================================================================

/// Longest plaintext accepted by the input validator
pub const MAX_CREDENTIAL_LENGTH: usize = 1_000;

/// Default attempts allowed per identifier within one window
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Default rate-limit window (15 minutes)
pub const DEFAULT_RATE_WINDOW_MS: i64 = 900_000;

/// Number of security events kept in the ring buffer
pub const SECURITY_EVENT_CAPACITY: usize = 100;

/// Failures newer than this count towards `recent_failures` (1 hour)
pub const RECENT_FAILURE_WINDOW_MS: i64 = 3_600_000;

// =============================================================================
// Backups
// =============================================================================

/// Size estimate per backed-up record in bytes
/// This is a heuristic, not a measurement
pub const ESTIMATED_BYTES_PER_RECORD: i64 = 500;

/// Tables backed up when the caller does not name any
pub const DEFAULT_CORE_TABLES: &[&str] = &[
    "vehicles",
    "vehicle_positions",
    "gp51_sessions",
    "profiles",
    "workshops",
];

/// Tables added when `include_system_tables` is set
pub const DEFAULT_SYSTEM_TABLES: &[&str] = &[
    "smtp_configurations",
    "email_preferences",
    "audit_logs",
];

/// Tags attached to the safety backup taken before a rollback
pub const ROLLBACK_POINT_TAGS: &[&str] = &["pre-rollback", "automatic"];

// =============================================================================
// Error Messages
// =============================================================================

/// Error message for a missing or invalid admin key
pub const ERR_INVALID_ADMIN_KEY: &str = "Invalid admin key";
