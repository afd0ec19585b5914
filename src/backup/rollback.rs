use std::time::Instant;

use chrono::{DateTime, Utc};

use super::BackupManager;
use crate::constants::ROLLBACK_POINT_TAGS;
use crate::db::tables::source_table_of;
use crate::error::BackupError;
use crate::models::{BackupOptions, BackupType, RollbackOptions, RollbackResult};

/// One backup table paired with the live table it restores
struct RestoreTarget {
    backup_table: String,
    source: String,
}

impl BackupManager {
    /// Restore live tables from a backup.
    ///
    /// Never returns an error: failures are reported through
    /// `RollbackResult::success` and `error`, per-table problems through `warnings`.
    pub async fn rollback_to_backup(&self, options: RollbackOptions) -> RollbackResult {
        let started = Instant::now();
        match self.try_rollback(&options, started).await {
            Ok(result) => result,
            Err(e) => {
                tracing::error!("Rollback to backup {} failed: {}", options.backup_id, e);
                RollbackResult::failed(e.to_string(), elapsed_ms(started))
            }
        }
    }

    async fn try_rollback(
        &self,
        options: &RollbackOptions,
        started: Instant,
    ) -> Result<RollbackResult, BackupError> {
        let metadata = self.get_backup(&options.backup_id).await?;
        if !metadata.can_rollback {
            return Err(BackupError::NotRollbackEligible(metadata.id));
        }

        let mut result = RollbackResult {
            dry_run: options.dry_run,
            ..Default::default()
        };

        if !metadata.is_verified {
            match self.verify_backup(&metadata.id).await {
                Ok(report) if report.valid => {}
                Ok(_) => result.warnings.push(format!(
                    "Backup {} failed integrity verification; restoring anyway",
                    metadata.id
                )),
                Err(e) => result
                    .warnings
                    .push(format!("Could not verify backup {}: {}", metadata.id, e)),
            }
        }

        let mut targets: Vec<RestoreTarget> = Vec::new();
        for backup_table in &metadata.tables {
            match source_table_of(backup_table) {
                Some(source) => targets.push(RestoreTarget {
                    backup_table: backup_table.clone(),
                    source: source.to_string(),
                }),
                None => result
                    .warnings
                    .push(format!("Unrecognised backup table name {}", backup_table)),
            }
        }

        if let Some(scope) = &options.tables {
            for table in scope {
                if !targets.iter().any(|t| &t.source == table) {
                    result
                        .warnings
                        .push(format!("Table {} is not part of backup {}", table, metadata.id));
                }
            }
            targets.retain(|t| scope.contains(&t.source));
        }

        if targets.is_empty() {
            result.error = Some("No tables to restore".to_string());
            result.duration_ms = elapsed_ms(started);
            return Ok(result);
        }

        if options.dry_run {
            for target in &targets {
                match self.store.count_rows(&target.backup_table).await {
                    Ok(count) => result.records_restored += count,
                    Err(e) => result
                        .warnings
                        .push(format!("Cannot read {}: {}", target.backup_table, e)),
                }
                result.restored_tables.push(target.source.clone());
            }
            result.success = true;
            result.duration_ms = elapsed_ms(started);
            return Ok(result);
        }

        if options.create_rollback_point {
            let point = self
                .create_backup_and_wait(BackupOptions {
                    name: Some(format!("Pre-rollback snapshot before restoring {}", metadata.id)),
                    description: Some(format!("Automatic rollback point for backup {}", metadata.id)),
                    backup_type: BackupType::Full,
                    tables: Some(targets.iter().map(|t| t.source.clone()).collect()),
                    include_system_tables: false,
                    verify: true,
                    retention: None,
                    tags: ROLLBACK_POINT_TAGS.iter().map(|t| t.to_string()).collect(),
                })
                .await?;
            tracing::info!("Created rollback point {}", point.id);
            result.rollback_point_id = Some(point.id);
        }

        for target in &targets {
            let restored = if options.preserve_new_data {
                self.store
                    .restore_merge(&target.backup_table, &target.source, metadata.created_at)
                    .await
            } else {
                self.store
                    .restore_replace(&target.backup_table, &target.source)
                    .await
            };

            match restored {
                Ok(count) => {
                    tracing::info!("Restored {} from {} ({} rows)", target.source, target.backup_table, count);
                    result.records_restored += count;
                    result.restored_tables.push(target.source.clone());
                }
                Err(e) => {
                    tracing::warn!("Failed to restore {}: {}", target.source, e);
                    result
                        .warnings
                        .push(format!("Failed to restore {}: {}", target.source, e));
                }
            }
        }

        result.success = !result.restored_tables.is_empty();
        if !result.success {
            result.error = Some("No table could be restored".to_string());
        }
        result.duration_ms = elapsed_ms(started);
        Ok(result)
    }

    /// Roll back to the newest rollback-eligible backup taken at or before `target_time`.
    ///
    /// Always snapshots the current state first and replaces (never merges) table contents.
    pub async fn perform_point_in_time_recovery(
        &self,
        target_time: DateTime<Utc>,
        tables: Option<Vec<String>>,
    ) -> RollbackResult {
        let started = Instant::now();

        let candidate = match self.store.list_metadata().await {
            Ok(backups) => backups
                .into_iter()
                .find(|m| m.can_rollback && m.created_at <= target_time),
            Err(e) => {
                return RollbackResult::failed(BackupError::from(e).to_string(), elapsed_ms(started))
            }
        };

        let Some(backup) = candidate else {
            tracing::warn!("No backup available for point-in-time recovery to {}", target_time);
            return RollbackResult::failed(
                BackupError::NoEligibleBackup(target_time).to_string(),
                elapsed_ms(started),
            );
        };

        tracing::info!(
            "Point-in-time recovery to {} using backup {} from {}",
            target_time,
            backup.id,
            backup.created_at
        );

        self.rollback_to_backup(RollbackOptions {
            backup_id: backup.id,
            tables,
            dry_run: false,
            preserve_new_data: false,
            create_rollback_point: true,
        })
        .await
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Duration;
    use serde_json::json;

    use crate::backup::{BackupManager, BackupSettings};
    use crate::db::memory::{MemRow, MemoryStore};
    use crate::db::BackupStore;
    use crate::models::{BackupOptions, RollbackOptions};

    async fn setup() -> (BackupManager, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::with_tables(&["vehicles", "profiles"]).await);
        for id in ["v1", "v2"] {
            store
                .upsert_row("vehicles", MemRow::new(id, chrono::Utc::now() - Duration::hours(1), json!({})))
                .await
                .unwrap();
        }
        store
            .upsert_row("profiles", MemRow::new("p1", chrono::Utc::now() - Duration::hours(1), json!({})))
            .await
            .unwrap();
        let settings = BackupSettings {
            core_tables: vec!["vehicles".to_string(), "profiles".to_string()],
            system_tables: vec![],
        };
        (BackupManager::new(store.clone(), settings), store)
    }

    #[tokio::test]
    async fn test_rollback_unknown_backup_fails() {
        let (manager, _) = setup().await;
        let result = manager
            .rollback_to_backup(RollbackOptions {
                backup_id: "nope".to_string(),
                ..Default::default()
            })
            .await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("not found"));
    }

    #[tokio::test]
    async fn test_dry_run_does_not_mutate() {
        let (manager, store) = setup().await;
        let backup = manager.create_backup_and_wait(BackupOptions::default()).await.unwrap();
        store.delete_row("vehicles", "v1").await.unwrap();

        let result = manager
            .rollback_to_backup(RollbackOptions {
                backup_id: backup.id.clone(),
                dry_run: true,
                create_rollback_point: true,
                ..Default::default()
            })
            .await;

        assert!(result.success);
        assert!(result.dry_run);
        assert_eq!(result.records_restored, 3);
        assert_eq!(result.restored_tables, vec!["vehicles", "profiles"]);
        assert!(result.rollback_point_id.is_none());
        assert_eq!(store.count_rows("vehicles").await.unwrap(), 1);
        assert_eq!(manager.list_backups().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_scoped_rollback_and_unknown_scope_warning() {
        let (manager, store) = setup().await;
        let backup = manager.create_backup_and_wait(BackupOptions::default()).await.unwrap();
        store.delete_row("vehicles", "v1").await.unwrap();
        store.delete_row("profiles", "p1").await.unwrap();

        let result = manager
            .rollback_to_backup(RollbackOptions {
                backup_id: backup.id,
                tables: Some(vec!["vehicles".to_string(), "workshops".to_string()]),
                ..Default::default()
            })
            .await;

        assert!(result.success);
        assert_eq!(result.restored_tables, vec!["vehicles"]);
        assert_eq!(result.warnings.len(), 1);
        assert!(result.warnings[0].contains("workshops"));
        assert_eq!(store.count_rows("vehicles").await.unwrap(), 2);
        assert_eq!(store.count_rows("profiles").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_per_table_failure_is_a_warning() {
        let (manager, store) = setup().await;
        let backup = manager.create_backup_and_wait(BackupOptions::default()).await.unwrap();
        store.fail_writes_to("profiles").await;

        let result = manager
            .rollback_to_backup(RollbackOptions {
                backup_id: backup.id,
                ..Default::default()
            })
            .await;

        assert!(result.success);
        assert_eq!(result.restored_tables, vec!["vehicles"]);
        assert!(result.warnings.iter().any(|w| w.contains("profiles")));
    }

    #[tokio::test]
    async fn test_unverified_backup_warns_but_restores() {
        let (manager, store) = setup().await;
        let backup = manager
            .create_backup_and_wait(BackupOptions {
                verify: false,
                ..Default::default()
            })
            .await
            .unwrap();
        // Tamper with the snapshot so verification fails
        store
            .upsert_row(&backup.tables[0], MemRow::new("extra", chrono::Utc::now(), json!({})))
            .await
            .unwrap();

        let result = manager
            .rollback_to_backup(RollbackOptions {
                backup_id: backup.id,
                ..Default::default()
            })
            .await;

        assert!(result.success);
        assert!(result.warnings.iter().any(|w| w.contains("integrity")));
        assert_eq!(store.count_rows("vehicles").await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_rollback_point_is_tagged() {
        let (manager, _store) = setup().await;
        let backup = manager.create_backup_and_wait(BackupOptions::default()).await.unwrap();

        let result = manager
            .rollback_to_backup(RollbackOptions {
                backup_id: backup.id,
                create_rollback_point: true,
                ..Default::default()
            })
            .await;

        let point_id = result.rollback_point_id.expect("rollback point");
        let point = manager.get_backup(&point_id).await.unwrap();
        assert_eq!(point.tags, vec!["pre-rollback", "automatic"]);
    }
}
