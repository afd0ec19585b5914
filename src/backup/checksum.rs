use base64::{engine::general_purpose::STANDARD, Engine as _};

use crate::db::BackupStore;
use crate::error::StoreError;

/// Row-count fingerprint of a table set.
///
/// Encodes `table:count` pairs, in the given order, as base64. It detects rows
/// being added or removed from any table but not in-place value changes.
pub fn compute_checksum(pairs: &[(String, i64)]) -> String {
    let joined = pairs
        .iter()
        .map(|(table, count)| format!("{}:{}", table, count))
        .collect::<Vec<_>>()
        .join(",");
    STANDARD.encode(joined)
}

/// Result of re-reading a table set from storage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DerivedChecksum {
    pub checksum: String,
    pub missing_tables: Vec<String>,
    pub record_count: i64,
}

/// Recount every table in `tables` and fingerprint them.
///
/// Missing tables are reported and excluded from the fingerprint, so a
/// missing table always produces a mismatch against the original checksum.
pub async fn derive_checksum(
    store: &dyn BackupStore,
    tables: &[String],
) -> Result<DerivedChecksum, StoreError> {
    let mut pairs = Vec::with_capacity(tables.len());
    let mut missing_tables = Vec::new();

    for table in tables {
        if !store.table_exists(table).await? {
            missing_tables.push(table.clone());
            continue;
        }
        pairs.push((table.clone(), store.count_rows(table).await?));
    }

    Ok(DerivedChecksum {
        checksum: compute_checksum(&pairs),
        missing_tables,
        record_count: pairs.iter().map(|(_, count)| count).sum(),
    })
}
