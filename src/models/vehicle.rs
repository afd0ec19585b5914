use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A vendor record (device or position) that passed schema validation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VendorRecord {
    pub device_id: String,
    /// All fields as received, with numeric fields normalised
    pub fields: Map<String, Value>,
}

impl VendorRecord {
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.fields)
    }
}

/// Row written to the `vehicles` table, keyed by `device_id`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VehicleRecord {
    pub device_id: String,
    pub device_name: Option<String>,
    /// Device fields merged with its latest position (empty object if none)
    pub data: Value,
    pub synced_at: DateTime<Utc>,
}

/// Vendor session obtained from a login
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VendorSession {
    pub username: String,
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Why a single record was left out of a sync
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RecordIssue {
    MissingDeviceId { index: usize },
    InvalidField { device_id: String, field: String },
    Upsert { device_id: String, message: String },
}

impl fmt::Display for RecordIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordIssue::MissingDeviceId { index } => {
                write!(f, "record {} has no usable device id", index)
            }
            RecordIssue::InvalidField { device_id, field } => {
                write!(f, "device {}: field '{}' is not numeric", device_id, field)
            }
            RecordIssue::Upsert { device_id, message } => {
                write!(f, "device {}: upsert failed: {}", device_id, message)
            }
        }
    }
}

/// Counters accumulated by a database sync
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStats {
    pub devices_processed: usize,
    pub devices_updated: usize,
    pub devices_failed: usize,
    pub positions_matched: usize,
    pub errors: Vec<RecordIssue>,
}
