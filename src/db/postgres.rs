use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};

use super::tables::{quote_ident, validate_table_name};
use super::{BackupStore, FleetStore};
use crate::error::StoreError;
use crate::models::{BackupMetadata, VehicleRecord, VendorSession};

/// Postgres-backed store
///
/// Every table name is validated before being interpolated; values always go
/// through bind parameters. Tables that take part in incremental backups or
/// merge restores must carry an `updated_at TIMESTAMPTZ` column and a primary key.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create `target` with the same shape as `source`
    /// Create `target` shaped like `source` and fill it, in one transaction.
    ///
    /// With `since`, only rows updated after it are copied. A failed insert
    /// rolls the `CREATE TABLE` back with it.
    async fn create_and_fill(
        &self,
        source: &str,
        target: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<i64, StoreError> {
        if self.table_exists(target).await? {
            return Err(StoreError::TableExists(target.to_string()));
        }
        let target_ident = quote_ident(target)?;
        let source_ident = quote_ident(source)?;

        let mut tx = self.pool.begin().await?;
        sqlx::query(&format!(
            "CREATE TABLE {} (LIKE {} INCLUDING ALL)",
            target_ident, source_ident
        ))
        .execute(&mut *tx)
        .await?;

        let result = match since {
            Some(since) => {
                let sql = format!(
                    "INSERT INTO {} SELECT * FROM {} WHERE updated_at > $1",
                    target_ident, source_ident
                );
                sqlx::query(&sql).bind(since).execute(&mut *tx).await?
            }
            None => {
                let sql = format!("INSERT INTO {} SELECT * FROM {}", target_ident, source_ident);
                sqlx::query(&sql).execute(&mut *tx).await?
            }
        };
        tx.commit().await?;

        Ok(result.rows_affected() as i64)
    }
}

#[derive(Debug, FromRow)]
struct BackupMetadataRow {
    id: String,
    name: String,
    description: Option<String>,
    backup_type: String,
    created_at: DateTime<Utc>,
    size_bytes: i64,
    tables: Vec<String>,
    record_count: i64,
    checksum: String,
    is_verified: bool,
    can_rollback: bool,
    expires_at: Option<DateTime<Utc>>,
    tags: Vec<String>,
}

impl TryFrom<BackupMetadataRow> for BackupMetadata {
    type Error = StoreError;

    fn try_from(row: BackupMetadataRow) -> Result<Self, Self::Error> {
        let backup_type = row
            .backup_type
            .parse()
            .map_err(|e: String| StoreError::CorruptMetadata(format!("{}: {}", row.id, e)))?;

        Ok(BackupMetadata {
            id: row.id,
            name: row.name,
            description: row.description,
            backup_type,
            created_at: row.created_at,
            size_bytes: row.size_bytes,
            tables: row.tables,
            record_count: row.record_count,
            checksum: row.checksum,
            is_verified: row.is_verified,
            can_rollback: row.can_rollback,
            expires_at: row.expires_at,
            tags: row.tags,
        })
    }
}

const METADATA_COLUMNS: &str = "id, name, description, backup_type, created_at, size_bytes, \
     tables, record_count, checksum, is_verified, can_rollback, expires_at, tags";

#[async_trait]
impl BackupStore for PgStore {
    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn table_exists(&self, table: &str) -> Result<bool, StoreError> {
        validate_table_name(table)?;
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM information_schema.tables \
             WHERE table_schema = current_schema() AND table_name = $1)",
        )
        .bind(table)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    async fn count_rows(&self, table: &str) -> Result<i64, StoreError> {
        let sql = format!("SELECT COUNT(*) FROM {}", quote_ident(table)?);
        let count: i64 = sqlx::query_scalar(&sql).fetch_one(&self.pool).await?;
        Ok(count)
    }

    async fn copy_table_full(&self, source: &str, target: &str) -> Result<i64, StoreError> {
        self.create_and_fill(source, target, None).await
    }

    async fn copy_table_since(
        &self,
        source: &str,
        target: &str,
        since: DateTime<Utc>,
    ) -> Result<i64, StoreError> {
        self.create_and_fill(source, target, Some(since)).await
    }

    async fn restore_replace(&self, backup_table: &str, target: &str) -> Result<i64, StoreError> {
        let target_ident = quote_ident(target)?;
        let backup_ident = quote_ident(backup_table)?;

        let mut tx = self.pool.begin().await?;
        sqlx::query(&format!("TRUNCATE {}", target_ident))
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query(&format!(
            "INSERT INTO {} SELECT * FROM {}",
            target_ident, backup_ident
        ))
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        Ok(result.rows_affected() as i64)
    }

    async fn restore_merge(
        &self,
        backup_table: &str,
        target: &str,
        cutoff: DateTime<Utc>,
    ) -> Result<i64, StoreError> {
        let target_ident = quote_ident(target)?;
        let backup_ident = quote_ident(backup_table)?;

        let mut tx = self.pool.begin().await?;
        sqlx::query(&format!(
            "DELETE FROM {} WHERE updated_at <= $1",
            target_ident
        ))
        .bind(cutoff)
        .execute(&mut *tx)
        .await?;
        let result = sqlx::query(&format!(
            "INSERT INTO {} SELECT * FROM {} ON CONFLICT DO NOTHING",
            target_ident, backup_ident
        ))
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        Ok(result.rows_affected() as i64)
    }

    async fn drop_table(&self, table: &str) -> Result<(), StoreError> {
        let sql = format!("DROP TABLE IF EXISTS {}", quote_ident(table)?);
        sqlx::query(&sql).execute(&self.pool).await?;
        Ok(())
    }

    async fn insert_metadata(&self, metadata: &BackupMetadata) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO backup_metadata (id, name, description, backup_type, created_at, \
             size_bytes, tables, record_count, checksum, is_verified, can_rollback, expires_at, tags) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)",
        )
        .bind(&metadata.id)
        .bind(&metadata.name)
        .bind(&metadata.description)
        .bind(metadata.backup_type.as_str())
        .bind(metadata.created_at)
        .bind(metadata.size_bytes)
        .bind(&metadata.tables)
        .bind(metadata.record_count)
        .bind(&metadata.checksum)
        .bind(metadata.is_verified)
        .bind(metadata.can_rollback)
        .bind(metadata.expires_at)
        .bind(&metadata.tags)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn set_verified(&self, id: &str, verified: bool) -> Result<(), StoreError> {
        sqlx::query("UPDATE backup_metadata SET is_verified = $2 WHERE id = $1")
            .bind(id)
            .bind(verified)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get_metadata(&self, id: &str) -> Result<Option<BackupMetadata>, StoreError> {
        let sql = format!("SELECT {} FROM backup_metadata WHERE id = $1", METADATA_COLUMNS);
        sqlx::query_as::<_, BackupMetadataRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(BackupMetadata::try_from)
            .transpose()
    }

    async fn list_metadata(&self) -> Result<Vec<BackupMetadata>, StoreError> {
        let sql = format!(
            "SELECT {} FROM backup_metadata ORDER BY created_at DESC",
            METADATA_COLUMNS
        );
        sqlx::query_as::<_, BackupMetadataRow>(&sql)
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(BackupMetadata::try_from)
            .collect()
    }

    async fn delete_metadata(&self, id: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM backup_metadata WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[derive(Debug, FromRow)]
struct SessionRow {
    username: String,
    token: String,
    expires_at: DateTime<Utc>,
    created_at: DateTime<Utc>,
}

#[async_trait]
impl FleetStore for PgStore {
    async fn latest_valid_session(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Option<VendorSession>, StoreError> {
        let row = sqlx::query_as::<_, SessionRow>(
            "SELECT username, token, expires_at, created_at FROM gp51_sessions \
             WHERE expires_at > $1 ORDER BY created_at DESC LIMIT 1",
        )
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| VendorSession {
            username: r.username,
            token: r.token,
            expires_at: r.expires_at,
            created_at: r.created_at,
        }))
    }

    async fn save_session(&self, session: &VendorSession) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO gp51_sessions (username, token, expires_at, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $4)",
        )
        .bind(&session.username)
        .bind(&session.token)
        .bind(session.expires_at)
        .bind(session.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn upsert_vehicle(&self, record: &VehicleRecord) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO vehicles (device_id, device_name, data, updated_at) \
             VALUES ($1, $2, $3, $4) \
             ON CONFLICT (device_id) DO UPDATE SET \
             device_name = EXCLUDED.device_name, data = EXCLUDED.data, updated_at = EXCLUDED.updated_at",
        )
        .bind(&record.device_id)
        .bind(&record.device_name)
        .bind(&record.data)
        .bind(record.synced_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
