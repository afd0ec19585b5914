use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use tokio::sync::RwLock;

use super::tables::{validate_table_name, VEHICLES};
use super::{BackupStore, FleetStore};
use crate::error::StoreError;
use crate::models::{BackupMetadata, VehicleRecord, VendorSession};

/// A row held by [`MemoryStore`]
#[derive(Debug, Clone, PartialEq)]
pub struct MemRow {
    pub id: String,
    pub updated_at: DateTime<Utc>,
    pub data: Value,
}

impl MemRow {
    pub fn new(id: impl Into<String>, updated_at: DateTime<Utc>, data: Value) -> Self {
        Self {
            id: id.into(),
            updated_at,
            data,
        }
    }
}

/// Process-local store used when no `DATABASE_URL` is configured, and by tests
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<HashMap<String, Vec<MemRow>>>,
    metadata: RwLock<Vec<BackupMetadata>>,
    sessions: RwLock<Vec<VendorSession>>,
    rejected_devices: RwLock<HashSet<String>>,
    failing_tables: RwLock<HashSet<String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store with the given (empty) tables
    pub async fn with_tables(names: &[&str]) -> Self {
        let store = Self::new();
        for name in names {
            store.create_table(name).await;
        }
        store
    }

    pub async fn create_table(&self, name: &str) {
        self.tables
            .write()
            .await
            .entry(name.to_string())
            .or_default();
    }

    /// Insert or replace a row by id
    pub async fn upsert_row(&self, table: &str, row: MemRow) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        let rows = tables
            .get_mut(table)
            .ok_or_else(|| StoreError::TableNotFound(table.to_string()))?;
        match rows.iter_mut().find(|r| r.id == row.id) {
            Some(existing) => *existing = row,
            None => rows.push(row),
        }
        Ok(())
    }

    pub async fn delete_row(&self, table: &str, id: &str) -> Result<bool, StoreError> {
        let mut tables = self.tables.write().await;
        let rows = tables
            .get_mut(table)
            .ok_or_else(|| StoreError::TableNotFound(table.to_string()))?;
        let before = rows.len();
        rows.retain(|r| r.id != id);
        Ok(rows.len() != before)
    }

    /// Rows of `table` ordered by id
    pub async fn rows(&self, table: &str) -> Result<Vec<MemRow>, StoreError> {
        let tables = self.tables.read().await;
        let mut rows = tables
            .get(table)
            .cloned()
            .ok_or_else(|| StoreError::TableNotFound(table.to_string()))?;
        rows.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(rows)
    }

    pub async fn table_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tables.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Make every upsert for `device_id` fail
    pub async fn reject_device(&self, device_id: &str) {
        self.rejected_devices
            .write()
            .await
            .insert(device_id.to_string());
    }

    /// Make copy and restore operations writing to `table` fail
    pub async fn fail_writes_to(&self, table: &str) {
        self.failing_tables.write().await.insert(table.to_string());
    }

    async fn check_writable(&self, table: &str) -> Result<(), StoreError> {
        if self.failing_tables.read().await.contains(table) {
            return Err(StoreError::Rejected(format!("writes to {} are failing", table)));
        }
        Ok(())
    }

    async fn copy_filtered<F>(&self, source: &str, target: &str, keep: F) -> Result<i64, StoreError>
    where
        F: Fn(&MemRow) -> bool + Send,
    {
        validate_table_name(target)?;
        self.check_writable(target).await?;

        let mut tables = self.tables.write().await;
        if tables.contains_key(target) {
            return Err(StoreError::TableExists(target.to_string()));
        }
        let copied: Vec<MemRow> = tables
            .get(source)
            .ok_or_else(|| StoreError::TableNotFound(source.to_string()))?
            .iter()
            .filter(|row| keep(*row))
            .cloned()
            .collect();
        let count = copied.len() as i64;
        tables.insert(target.to_string(), copied);
        Ok(count)
    }
}

#[async_trait]
impl BackupStore for MemoryStore {
    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn table_exists(&self, table: &str) -> Result<bool, StoreError> {
        Ok(self.tables.read().await.contains_key(table))
    }

    async fn count_rows(&self, table: &str) -> Result<i64, StoreError> {
        self.tables
            .read()
            .await
            .get(table)
            .map(|rows| rows.len() as i64)
            .ok_or_else(|| StoreError::TableNotFound(table.to_string()))
    }

    async fn copy_table_full(&self, source: &str, target: &str) -> Result<i64, StoreError> {
        self.copy_filtered(source, target, |_| true).await
    }

    async fn copy_table_since(
        &self,
        source: &str,
        target: &str,
        since: DateTime<Utc>,
    ) -> Result<i64, StoreError> {
        self.copy_filtered(source, target, move |row| row.updated_at > since)
            .await
    }

    async fn restore_replace(&self, backup_table: &str, target: &str) -> Result<i64, StoreError> {
        self.check_writable(target).await?;

        let mut tables = self.tables.write().await;
        let restored = tables
            .get(backup_table)
            .cloned()
            .ok_or_else(|| StoreError::TableNotFound(backup_table.to_string()))?;
        let rows = tables
            .get_mut(target)
            .ok_or_else(|| StoreError::TableNotFound(target.to_string()))?;

        let count = restored.len() as i64;
        *rows = restored;
        Ok(count)
    }

    async fn restore_merge(
        &self,
        backup_table: &str,
        target: &str,
        cutoff: DateTime<Utc>,
    ) -> Result<i64, StoreError> {
        self.check_writable(target).await?;

        let mut tables = self.tables.write().await;
        let backup_rows = tables
            .get(backup_table)
            .cloned()
            .ok_or_else(|| StoreError::TableNotFound(backup_table.to_string()))?;
        let rows = tables
            .get_mut(target)
            .ok_or_else(|| StoreError::TableNotFound(target.to_string()))?;

        rows.retain(|row| row.updated_at > cutoff);
        let mut inserted = 0;
        for row in backup_rows {
            if !rows.iter().any(|r| r.id == row.id) {
                rows.push(row);
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    async fn drop_table(&self, table: &str) -> Result<(), StoreError> {
        self.tables.write().await.remove(table);
        Ok(())
    }

    async fn insert_metadata(&self, metadata: &BackupMetadata) -> Result<(), StoreError> {
        let mut rows = self.metadata.write().await;
        if rows.iter().any(|m| m.id == metadata.id) {
            return Err(StoreError::Rejected(format!(
                "duplicate backup id {}",
                metadata.id
            )));
        }
        rows.push(metadata.clone());
        Ok(())
    }

    async fn set_verified(&self, id: &str, verified: bool) -> Result<(), StoreError> {
        if let Some(row) = self.metadata.write().await.iter_mut().find(|m| m.id == id) {
            row.is_verified = verified;
        }
        Ok(())
    }

    async fn get_metadata(&self, id: &str) -> Result<Option<BackupMetadata>, StoreError> {
        Ok(self
            .metadata
            .read()
            .await
            .iter()
            .find(|m| m.id == id)
            .cloned())
    }

    async fn list_metadata(&self) -> Result<Vec<BackupMetadata>, StoreError> {
        let mut rows = self.metadata.read().await.clone();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(rows)
    }

    async fn delete_metadata(&self, id: &str) -> Result<(), StoreError> {
        self.metadata.write().await.retain(|m| m.id != id);
        Ok(())
    }
}

#[async_trait]
impl FleetStore for MemoryStore {
    async fn latest_valid_session(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Option<VendorSession>, StoreError> {
        Ok(self
            .sessions
            .read()
            .await
            .iter()
            .filter(|s| s.expires_at > now)
            .max_by_key(|s| s.created_at)
            .cloned())
    }

    async fn save_session(&self, session: &VendorSession) -> Result<(), StoreError> {
        self.sessions.write().await.push(session.clone());
        Ok(())
    }

    async fn upsert_vehicle(&self, record: &VehicleRecord) -> Result<(), StoreError> {
        if self
            .rejected_devices
            .read()
            .await
            .contains(&record.device_id)
        {
            return Err(StoreError::Rejected(format!(
                "device {} rejected",
                record.device_id
            )));
        }

        self.create_table(VEHICLES).await;
        self.upsert_row(
            VEHICLES,
            MemRow::new(
                record.device_id.clone(),
                record.synced_at,
                json!({
                    "device_name": record.device_name,
                    "data": record.data,
                }),
            ),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn row(id: &str, at: DateTime<Utc>) -> MemRow {
        MemRow::new(id, at, json!({ "id": id }))
    }

    #[tokio::test]
    async fn test_copy_and_replace() {
        let store = MemoryStore::with_tables(&["vehicles"]).await;
        let now = Utc::now();
        store.upsert_row("vehicles", row("a", now)).await.unwrap();
        store.upsert_row("vehicles", row("b", now)).await.unwrap();

        assert_eq!(store.copy_table_full("vehicles", "vehicles_backup_1").await.unwrap(), 2);
        assert!(matches!(
            store.copy_table_full("vehicles", "vehicles_backup_1").await,
            Err(StoreError::TableExists(_))
        ));

        store.delete_row("vehicles", "a").await.unwrap();
        store.upsert_row("vehicles", row("c", now)).await.unwrap();

        assert_eq!(store.restore_replace("vehicles_backup_1", "vehicles").await.unwrap(), 2);
        let ids: Vec<String> = store.rows("vehicles").await.unwrap().into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_copy_since_filters_old_rows() {
        let store = MemoryStore::with_tables(&["profiles"]).await;
        let now = Utc::now();
        store.upsert_row("profiles", row("old", now - Duration::hours(2))).await.unwrap();
        store.upsert_row("profiles", row("new", now)).await.unwrap();

        let copied = store
            .copy_table_since("profiles", "profiles_backup_2", now - Duration::hours(1))
            .await
            .unwrap();
        assert_eq!(copied, 1);
    }

    #[tokio::test]
    async fn test_merge_keeps_newer_rows() {
        let store = MemoryStore::with_tables(&["workshops"]).await;
        let backup_time = Utc::now() - Duration::minutes(10);
        store.upsert_row("workshops", row("a", backup_time - Duration::minutes(1))).await.unwrap();
        store.copy_table_full("workshops", "workshops_backup_3").await.unwrap();

        store.delete_row("workshops", "a").await.unwrap();
        store.upsert_row("workshops", row("late", Utc::now())).await.unwrap();

        let inserted = store
            .restore_merge("workshops_backup_3", "workshops", backup_time)
            .await
            .unwrap();
        assert_eq!(inserted, 1);
        let ids: Vec<String> = store.rows("workshops").await.unwrap().into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec!["a", "late"]);
    }

    #[tokio::test]
    async fn test_latest_valid_session() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let session = |token: &str, created: i64, ttl: i64| VendorSession {
            username: "fleet".to_string(),
            token: token.to_string(),
            created_at: now + Duration::seconds(created),
            expires_at: now + Duration::seconds(ttl),
        };

        assert!(store.latest_valid_session(now).await.unwrap().is_none());
        store.save_session(&session("old", -100, 3600)).await.unwrap();
        store.save_session(&session("expired", -10, -1)).await.unwrap();
        store.save_session(&session("newest", -50, 3600)).await.unwrap();

        let latest = store.latest_valid_session(now).await.unwrap().unwrap();
        assert_eq!(latest.token, "newest");
    }
}
