use crate::error::StoreError;

/// Backup metadata: one row per completed snapshot
pub const BACKUP_METADATA: &str = "backup_metadata";

/// Vendor sessions: token + expiry per login
pub const VENDOR_SESSIONS: &str = "gp51_sessions";

/// Vehicles: one row per vendor device, upserted by sync
pub const VEHICLES: &str = "vehicles";

/// Separator between a source table name and the backup suffix
pub const BACKUP_TABLE_INFIX: &str = "_backup_";

/// Postgres truncates identifiers beyond this length
const MAX_IDENTIFIER_LEN: usize = 63;

/// Check a table name is a plain lowercase identifier
pub fn validate_table_name(name: &str) -> Result<(), StoreError> {
    let mut chars = name.chars();
    let valid_start = matches!(chars.next(), Some(c) if c == '_' || c.is_ascii_lowercase());
    let valid_rest = chars.all(|c| c == '_' || c.is_ascii_lowercase() || c.is_ascii_digit());

    if !valid_start || !valid_rest || name.len() > MAX_IDENTIFIER_LEN {
        return Err(StoreError::InvalidTableName(name.to_string()));
    }
    Ok(())
}

/// Validate and double-quote a table name for interpolation into SQL
pub fn quote_ident(name: &str) -> Result<String, StoreError> {
    validate_table_name(name)?;
    Ok(format!("\"{}\"", name))
}

/// Physical name of a snapshot of `table`
pub fn backup_table_name(table: &str, suffix: i64) -> String {
    format!("{}{}{}", table, BACKUP_TABLE_INFIX, suffix)
}

/// Recover the source table from a snapshot name
pub fn source_table_of(backup_table: &str) -> Option<&str> {
    let (source, suffix) = backup_table.rsplit_once(BACKUP_TABLE_INFIX)?;
    if source.is_empty() || suffix.is_empty() || !suffix.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    Some(source)
}
