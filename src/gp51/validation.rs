//! Schema checks for vendor records.
//!
//! A record needs a device id that is a non-empty string or a number.
//! Listed numeric fields default to 0 when absent or null and are parsed
//! from strings when the vendor sends them quoted. Unknown fields pass through.

use serde_json::{Map, Number, Value};

use crate::models::{RecordIssue, VendorRecord};

pub const DEVICE_ID_FIELD: &str = "deviceid";
pub const DEVICE_NAME_FIELD: &str = "devicename";

/// Numeric fields a record kind is expected to carry
#[derive(Debug, Clone, Copy)]
pub struct RecordSchema {
    pub numeric_fields: &'static [&'static str],
}

pub const DEVICE_SCHEMA: RecordSchema = RecordSchema {
    numeric_fields: &["groupid", "devicetype", "overduetime"],
};

pub const POSITION_SCHEMA: RecordSchema = RecordSchema {
    numeric_fields: &[
        "callat",
        "callon",
        "altitude",
        "speed",
        "course",
        "updatetime",
        "arrivedtime",
        "gotsrc",
    ],
};

/// Validate one raw record at `index` of its batch
pub fn validate_record(
    raw: &Value,
    index: usize,
    schema: &RecordSchema,
) -> Result<VendorRecord, RecordIssue> {
    let mut fields = match raw {
        Value::Object(map) => map.clone(),
        _ => return Err(RecordIssue::MissingDeviceId { index }),
    };

    let device_id = match fields.get(DEVICE_ID_FIELD) {
        Some(Value::String(s)) if !s.trim().is_empty() => s.trim().to_string(),
        Some(Value::Number(n)) => n.to_string(),
        _ => return Err(RecordIssue::MissingDeviceId { index }),
    };
    fields.insert(DEVICE_ID_FIELD.to_string(), Value::String(device_id.clone()));

    for field in schema.numeric_fields {
        let normalised = match fields.get(*field) {
            None | Some(Value::Null) => Value::from(0),
            Some(Value::Number(n)) => Value::Number(n.clone()),
            Some(Value::String(s)) => match parse_number(s) {
                Some(n) => Value::Number(n),
                None => return Err(invalid(&device_id, field)),
            },
            Some(_) => return Err(invalid(&device_id, field)),
        };
        fields.insert(field.to_string(), normalised);
    }

    Ok(VendorRecord { device_id, fields })
}

/// Validate a batch, splitting it into accepted records and issues
pub fn validate_records(
    raw: &[Value],
    schema: &RecordSchema,
) -> (Vec<VendorRecord>, Vec<RecordIssue>) {
    let mut records = Vec::with_capacity(raw.len());
    let mut issues = Vec::new();

    for (index, value) in raw.iter().enumerate() {
        match validate_record(value, index, schema) {
            Ok(record) => records.push(record),
            Err(issue) => issues.push(issue),
        }
    }

    (records, issues)
}

fn parse_number(s: &str) -> Option<Number> {
    let s = s.trim();
    if let Ok(i) = s.parse::<i64>() {
        return Some(Number::from(i));
    }
    s.parse::<f64>().ok().and_then(Number::from_f64)
}

fn invalid(device_id: &str, field: &str) -> RecordIssue {
    RecordIssue::InvalidField {
        device_id: device_id.to_string(),
        field: field.to_string(),
    }
}

/// Shallow object from a record, used when merging device and position
pub fn record_fields(record: Option<&VendorRecord>) -> Map<String, Value> {
    record.map(|r| r.fields.clone()).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_numeric_device_id_is_coerced() {
        let record = validate_record(&json!({ "deviceid": 12345 }), 0, &POSITION_SCHEMA).unwrap();
        assert_eq!(record.device_id, "12345");
        assert_eq!(record.get("deviceid"), Some(&json!("12345")));
    }

    #[test]
    fn test_missing_numeric_fields_default_to_zero() {
        let record = validate_record(
            &json!({ "deviceid": "a1", "callat": "22.5", "speed": null, "extra": "kept" }),
            0,
            &POSITION_SCHEMA,
        )
        .unwrap();
        assert_eq!(record.get("callat"), Some(&json!(22.5)));
        assert_eq!(record.get("speed"), Some(&json!(0)));
        assert_eq!(record.get("course"), Some(&json!(0)));
        assert_eq!(record.get("extra"), Some(&json!("kept")));
    }

    #[test]
    fn test_rejects_unusable_records() {
        assert_eq!(
            validate_record(&json!({ "deviceid": "  " }), 3, &POSITION_SCHEMA),
            Err(RecordIssue::MissingDeviceId { index: 3 })
        );
        assert_eq!(
            validate_record(&json!("not an object"), 4, &POSITION_SCHEMA),
            Err(RecordIssue::MissingDeviceId { index: 4 })
        );
        assert_eq!(
            validate_record(&json!({ "deviceid": "x", "speed": "fast" }), 0, &POSITION_SCHEMA),
            Err(RecordIssue::InvalidField {
                device_id: "x".to_string(),
                field: "speed".to_string()
            })
        );
    }

    #[test]
    fn test_batch_drops_invalid_records() {
        let raw = vec![
            json!({ "deviceid": "1" }),
            json!({ "devicename": "no id" }),
            json!({ "deviceid": 2 }),
        ];
        let (records, issues) = validate_records(&raw, &DEVICE_SCHEMA);
        assert_eq!(records.len(), 2);
        assert_eq!(issues, vec![RecordIssue::MissingDeviceId { index: 1 }]);
    }
}
