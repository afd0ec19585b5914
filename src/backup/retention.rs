use chrono::{DateTime, Utc};

use super::BackupManager;
use crate::error::BackupError;
use crate::models::{RetentionPolicy, RetentionReport};

impl BackupManager {
    /// Delete backups older than `policy.days`, then everything beyond the
    /// newest `policy.max_backups`.
    pub async fn enforce_retention(
        &self,
        policy: RetentionPolicy,
    ) -> Result<RetentionReport, BackupError> {
        self.enforce_retention_at(policy, Utc::now()).await
    }

    pub async fn enforce_retention_at(
        &self,
        policy: RetentionPolicy,
        now: DateTime<Utc>,
    ) -> Result<RetentionReport, BackupError> {
        let mut report = RetentionReport::default();

        let expired: Vec<String> = match policy.cutoff(now) {
            Some(cutoff) => self
                .list_backups()
                .await?
                .into_iter()
                .filter(|m| m.created_at < cutoff)
                .map(|m| m.id)
                .collect(),
            None => Vec::new(),
        };
        for id in expired {
            if self.delete_quietly(&id).await {
                report.expired_deleted.push(id);
            }
        }

        // list_backups is newest first
        let excess: Vec<String> = self
            .list_backups()
            .await?
            .into_iter()
            .skip(policy.max_backups)
            .map(|m| m.id)
            .collect();
        for id in excess {
            if self.delete_quietly(&id).await {
                report.excess_deleted.push(id);
            }
        }

        if report.total_deleted() > 0 {
            tracing::info!(
                "Retention removed {} expired and {} excess backups",
                report.expired_deleted.len(),
                report.excess_deleted.len()
            );
        }
        Ok(report)
    }

    async fn delete_quietly(&self, backup_id: &str) -> bool {
        match self.delete_backup(backup_id).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!("Retention could not delete backup {}: {}", backup_id, e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{Duration, Utc};

    use crate::backup::{BackupManager, BackupSettings};
    use crate::db::memory::MemoryStore;
    use crate::db::BackupStore;
    use crate::models::{BackupMetadata, BackupOptions, BackupType, RetentionPolicy};

    fn metadata(id: &str, age_days: i64) -> BackupMetadata {
        BackupMetadata {
            id: id.to_string(),
            name: id.to_string(),
            description: None,
            backup_type: BackupType::Full,
            created_at: Utc::now() - Duration::days(age_days),
            size_bytes: 0,
            tables: vec![],
            record_count: 0,
            checksum: String::new(),
            is_verified: true,
            can_rollback: true,
            expires_at: None,
            tags: vec![],
        }
    }

    async fn manager_with_history(ages: &[(&str, i64)]) -> BackupManager {
        let store = Arc::new(MemoryStore::with_tables(&["vehicles"]).await);
        for (id, age) in ages {
            store.insert_metadata(&metadata(id, *age)).await.unwrap();
        }
        BackupManager::new(store, BackupSettings::default())
    }

    fn ids(manager_backups: Vec<BackupMetadata>) -> Vec<String> {
        manager_backups.into_iter().map(|m| m.id).collect()
    }

    #[tokio::test]
    async fn test_age_limit_then_count_limit() {
        let manager =
            manager_with_history(&[("d1", 1), ("d2", 2), ("d3", 3), ("d40", 40), ("d50", 50)]).await;

        let report = manager
            .enforce_retention(RetentionPolicy { days: 30, max_backups: 2 })
            .await
            .unwrap();

        assert_eq!(report.expired_deleted, vec!["d40", "d50"]);
        assert_eq!(report.excess_deleted, vec!["d3"]);
        assert_eq!(ids(manager.list_backups().await.unwrap()), vec!["d1", "d2"]);
    }

    #[tokio::test]
    async fn test_retention_is_idempotent() {
        let manager = manager_with_history(&[("a", 1), ("b", 2), ("c", 90)]).await;
        let policy = RetentionPolicy { days: 30, max_backups: 5 };

        let first = manager.enforce_retention(policy).await.unwrap();
        assert_eq!(first.total_deleted(), 1);
        let second = manager.enforce_retention(policy).await.unwrap();
        assert_eq!(second.total_deleted(), 0);
    }

    #[tokio::test]
    async fn test_retention_attached_to_backup_runs_after_completion() {
        let manager = manager_with_history(&[("old", 2), ("older", 3)]).await;

        let created = manager
            .create_backup_and_wait(BackupOptions {
                tables: Some(vec!["vehicles".to_string()]),
                retention: Some(RetentionPolicy { days: 30, max_backups: 1 }),
                ..Default::default()
            })
            .await
            .unwrap();

        assert!(created.expires_at.is_some());
        assert_eq!(ids(manager.list_backups().await.unwrap()), vec![created.id]);
    }

    #[tokio::test]
    async fn test_unbounded_age_limit_only_applies_count() {
        let manager = manager_with_history(&[("a", 1), ("b", 400), ("c", 4_000)]).await;
        let policy = RetentionPolicy { days: u32::MAX, max_backups: 2 };

        let report = manager.enforce_retention(policy).await.unwrap();

        assert!(report.expired_deleted.is_empty());
        assert_eq!(report.excess_deleted, vec!["c"]);
        assert_eq!(ids(manager.list_backups().await.unwrap()), vec!["a", "b"]);
    }
}
