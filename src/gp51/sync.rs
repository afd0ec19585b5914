use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Value};

use super::client::VendorClient;
use super::validation::{
    record_fields, validate_record, validate_records, DEVICE_NAME_FIELD, DEVICE_SCHEMA,
    POSITION_SCHEMA,
};
use super::{ACTION_DEVICE_LIST, ACTION_LAST_POSITION};
use crate::constants::{LOCK_DATABASE_SYNC, LOCK_DEVICE_LIST_SYNC, LOCK_POSITION_SYNC};
use crate::db::FleetStore;
use crate::error::SyncError;
use crate::lock::{Exclusive, LockRegistry};
use crate::models::{RecordIssue, SyncStats, VehicleRecord, VendorRecord, VendorSession};

/// Outcome of [`SyncService::perform_full_sync`]
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FullSyncReport {
    pub success: bool,
    /// Lock key that was already held, if the sync was skipped
    pub skipped_by: Option<String>,
    pub devices_fetched: usize,
    pub positions_fetched: usize,
    pub stats: Option<SyncStats>,
    pub warnings: Vec<String>,
    pub error: Option<String>,
}

impl FullSyncReport {
    fn skipped(key: String) -> Self {
        Self {
            skipped_by: Some(key),
            ..Default::default()
        }
    }

    fn failed(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Default::default()
        }
    }

    pub fn is_skipped(&self) -> bool {
        self.skipped_by.is_some()
    }
}

/// Pulls devices and positions from the vendor and upserts them locally.
///
/// Each stage runs under its own lock key, so a stage already running
/// elsewhere is skipped instead of queued.
#[derive(Clone)]
pub struct SyncService {
    client: VendorClient,
    store: Arc<dyn FleetStore>,
    locks: Arc<LockRegistry>,
}

impl std::fmt::Debug for SyncService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncService")
            .field("client", &self.client)
            .finish()
    }
}

impl SyncService {
    pub fn new(client: VendorClient, store: Arc<dyn FleetStore>, locks: Arc<LockRegistry>) -> Self {
        Self {
            client,
            store,
            locks,
        }
    }

    pub fn locks(&self) -> &Arc<LockRegistry> {
        &self.locks
    }

    async fn current_session(&self) -> Result<VendorSession, SyncError> {
        self.store
            .latest_valid_session(Utc::now())
            .await?
            .ok_or(SyncError::NoValidToken)
    }

    /// Fetch the device roster, flattened out of the vendor's groups
    pub async fn fetch_device_list(&self) -> Exclusive<Result<Vec<VendorRecord>, SyncError>> {
        self.locks
            .run_exclusive(LOCK_DEVICE_LIST_SYNC, || self.fetch_devices_unlocked())
            .await
    }

    async fn fetch_devices_unlocked(&self) -> Result<Vec<VendorRecord>, SyncError> {
        let session = self.current_session().await?;
        let response = self
            .client
            .call(
                ACTION_DEVICE_LIST,
                Some(&session.token),
                &json!({ "username": session.username }),
            )
            .await?;

        let raw: Vec<Value> = response
            .get("groups")
            .and_then(Value::as_array)
            .map(|groups| {
                groups
                    .iter()
                    .filter_map(|group| group.get("devices").and_then(Value::as_array))
                    .flatten()
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        let (devices, issues) = validate_records(&raw, &DEVICE_SCHEMA);
        if !issues.is_empty() {
            tracing::warn!("Dropped {} invalid device records", issues.len());
        }
        tracing::info!("Fetched {} devices from vendor", devices.len());
        Ok(devices)
    }

    /// Fetch the latest position of each device, dropping records that fail validation
    pub async fn fetch_positions(
        &self,
        device_ids: &[String],
    ) -> Exclusive<Result<Vec<VendorRecord>, SyncError>> {
        self.locks
            .run_exclusive(LOCK_POSITION_SYNC, || self.fetch_positions_unlocked(device_ids))
            .await
    }

    async fn fetch_positions_unlocked(
        &self,
        device_ids: &[String],
    ) -> Result<Vec<VendorRecord>, SyncError> {
        if device_ids.is_empty() {
            return Ok(Vec::new());
        }

        let session = self.current_session().await?;
        let response = self
            .client
            .call(
                ACTION_LAST_POSITION,
                Some(&session.token),
                &json!({ "deviceids": device_ids, "lastquerypositiontime": 0 }),
            )
            .await?;

        let raw = response
            .get("records")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let (positions, issues) = validate_records(&raw, &POSITION_SCHEMA);
        if !issues.is_empty() {
            tracing::warn!("Dropped {} invalid position records", issues.len());
        }
        Ok(positions)
    }

    /// Upsert every device merged with its latest position.
    ///
    /// A record that fails validation or storage is counted and reported in
    /// `errors`; the rest of the batch still goes through.
    pub async fn sync_to_database(
        &self,
        devices: &[VendorRecord],
        positions: &[VendorRecord],
    ) -> Exclusive<SyncStats> {
        self.locks
            .run_exclusive(LOCK_DATABASE_SYNC, || self.sync_unlocked(devices, positions))
            .await
    }

    async fn sync_unlocked(&self, devices: &[VendorRecord], positions: &[VendorRecord]) -> SyncStats {
        let by_device: HashMap<&str, &VendorRecord> = positions
            .iter()
            .map(|p| (p.device_id.as_str(), p))
            .collect();
        let synced_at = Utc::now();
        let mut stats = SyncStats::default();

        for (index, device) in devices.iter().enumerate() {
            stats.devices_processed += 1;

            let position = by_device.get(device.device_id.as_str()).copied();
            if position.is_some() {
                stats.positions_matched += 1;
            }

            let mut merged = device.fields.clone();
            merged.insert("position".to_string(), Value::Object(record_fields(position)));

            let record = match validate_record(&Value::Object(merged), index, &DEVICE_SCHEMA) {
                Ok(record) => record,
                Err(issue) => {
                    tracing::warn!("Skipping device: {}", issue);
                    stats.devices_failed += 1;
                    stats.errors.push(issue);
                    continue;
                }
            };

            let device_name = record
                .get(DEVICE_NAME_FIELD)
                .and_then(Value::as_str)
                .map(str::to_string);
            let vehicle = VehicleRecord {
                device_id: record.device_id.clone(),
                device_name,
                data: record.into_value(),
                synced_at,
            };

            match self.store.upsert_vehicle(&vehicle).await {
                Ok(()) => stats.devices_updated += 1,
                Err(e) => {
                    tracing::warn!("Failed to upsert device {}: {}", vehicle.device_id, e);
                    stats.devices_failed += 1;
                    stats.errors.push(RecordIssue::Upsert {
                        device_id: vehicle.device_id,
                        message: e.to_string(),
                    });
                }
            }
        }

        tracing::info!(
            "Database sync: {} processed, {} updated, {} failed",
            stats.devices_processed,
            stats.devices_updated,
            stats.devices_failed
        );
        stats
    }

    /// Devices, then positions, then the database.
    ///
    /// No devices means nothing to sync and the run fails. A failed position
    /// fetch is a warning and the devices are stored without positions.
    pub async fn perform_full_sync(&self) -> FullSyncReport {
        let devices = match self.fetch_device_list().await {
            Exclusive::Skipped { key } => return FullSyncReport::skipped(key),
            Exclusive::Ran(Err(e)) => {
                tracing::error!("Device list fetch failed: {}", e);
                return FullSyncReport::failed(e.to_string());
            }
            Exclusive::Ran(Ok(devices)) if devices.is_empty() => {
                return FullSyncReport::failed(SyncError::EmptyDeviceList.to_string());
            }
            Exclusive::Ran(Ok(devices)) => devices,
        };

        let mut report = FullSyncReport {
            devices_fetched: devices.len(),
            ..Default::default()
        };

        let device_ids: Vec<String> = devices.iter().map(|d| d.device_id.clone()).collect();
        let positions = match self.fetch_positions(&device_ids).await {
            Exclusive::Ran(Ok(positions)) => positions,
            Exclusive::Ran(Err(e)) => {
                tracing::warn!("Position fetch failed, syncing devices only: {}", e);
                report.warnings.push(format!("Position fetch failed: {}", e));
                Vec::new()
            }
            Exclusive::Skipped { key } => {
                report.warnings.push(format!("Position fetch skipped: {} is held", key));
                Vec::new()
            }
        };
        report.positions_fetched = positions.len();

        match self.sync_to_database(&devices, &positions).await {
            Exclusive::Ran(stats) => {
                report.success = true;
                report.stats = Some(stats);
                report
            }
            Exclusive::Skipped { key } => FullSyncReport {
                skipped_by: Some(key),
                ..report
            },
        }
    }
}
