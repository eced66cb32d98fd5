use chrono::NaiveDateTime;
use serde_json::{Map, Value};
use thiserror::Error;

/// Format of `records.timestamp`, e.g. `16-Jul-2024 15:30:00`.
pub const TIMESTAMP_FORMAT: &str = "%d-%b-%Y %H:%M:%S";

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("snapshot is missing field `{path}`")]
    MissingField { path: String },

    #[error("snapshot field `{path}` has unexpected value {value}")]
    InvalidField { path: String, value: String },

    #[error("snapshot timestamp `{raw}` is not in dd-Mon-YYYY HH:MM:SS form")]
    BadTimestamp { raw: String },
}

/// One raw option-chain response, kept as JSON so it can be archived verbatim.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot(Value);

impl Snapshot {
    pub fn new(value: Value) -> Self {
        Snapshot(value)
    }

    /// The "not yet published" sentinel.
    pub fn empty() -> Self {
        Snapshot(Value::Object(Map::new()))
    }

    pub fn is_empty(&self) -> bool {
        match &self.0 {
            Value::Object(map) => map.is_empty(),
            Value::Null => true,
            _ => false,
        }
    }

    pub fn to_json(&self) -> String {
        self.0.to_string()
    }

    pub fn raw_timestamp(&self) -> Result<&str, SnapshotError> {
        let value = lookup(&self.0, &["records", "timestamp"])?;
        value.as_str().ok_or_else(|| invalid("records.timestamp", value))
    }

    /// Capture instant declared by the upstream, in exchange-local time.
    pub fn declared_timestamp(&self) -> Result<NaiveDateTime, SnapshotError> {
        let raw = self.raw_timestamp()?;
        NaiveDateTime::parse_from_str(raw.trim(), TIMESTAMP_FORMAT).map_err(|_| {
            SnapshotError::BadTimestamp {
                raw: raw.to_string(),
            }
        })
    }

    pub fn underlying_value(&self) -> Result<f64, SnapshotError> {
        number_at(&self.0, &["records", "underlyingValue"])
    }

    /// Per-strike entries already narrowed by the server (`filtered.data`).
    pub fn filtered_entries(&self) -> Result<&[Value], SnapshotError> {
        let value = lookup(&self.0, &["filtered", "data"])?;
        value
            .as_array()
            .map(Vec::as_slice)
            .ok_or_else(|| invalid("filtered.data", value))
    }
}

pub(crate) fn lookup<'a>(root: &'a Value, path: &[&str]) -> Result<&'a Value, SnapshotError> {
    let mut current = root;
    for (depth, key) in path.iter().enumerate() {
        current = match current.get(key) {
            Some(Value::Null) | None => {
                return Err(SnapshotError::MissingField {
                    path: path[..=depth].join("."),
                });
            }
            Some(next) => next,
        };
    }
    Ok(current)
}

pub(crate) fn number_at(root: &Value, path: &[&str]) -> Result<f64, SnapshotError> {
    let value = lookup(root, path)?;
    match value {
        Value::Number(n) => n.as_f64().ok_or_else(|| invalid(&path.join("."), value)),
        // Some feeds quote numbers as strings
        Value::String(s) => s
            .trim()
            .replace(',', "")
            .parse::<f64>()
            .map_err(|_| invalid(&path.join("."), value)),
        _ => Err(invalid(&path.join("."), value)),
    }
}

pub(crate) fn invalid(path: &str, value: &Value) -> SnapshotError {
    SnapshotError::InvalidField {
        path: path.to_string(),
        value: value.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use serde_json::json;

    #[test]
    fn test_declared_timestamp() {
        let snap = Snapshot::new(json!({
            "records": { "timestamp": "16-Jul-2024 15:30:00", "underlyingValue": 24613.0 }
        }));
        let expected = NaiveDate::from_ymd_opt(2024, 7, 16)
            .unwrap()
            .and_hms_opt(15, 30, 0)
            .unwrap();
        assert_eq!(snap.declared_timestamp().unwrap(), expected);
        assert_eq!(snap.underlying_value().unwrap(), 24613.0);
    }

    #[test]
    fn test_missing_and_bad_fields() {
        let snap = Snapshot::new(json!({ "records": { "timestamp": "yesterday" } }));
        assert!(matches!(
            snap.declared_timestamp(),
            Err(SnapshotError::BadTimestamp { .. })
        ));
        match snap.underlying_value() {
            Err(SnapshotError::MissingField { path }) => assert_eq!(path, "records.underlyingValue"),
            other => panic!("expected missing field, got {other:?}"),
        }
        match snap.filtered_entries() {
            Err(SnapshotError::MissingField { path }) => assert_eq!(path, "filtered"),
            other => panic!("expected missing field, got {other:?}"),
        }
    }

    #[test]
    fn test_empty_sentinel() {
        assert!(Snapshot::empty().is_empty());
        assert!(Snapshot::new(Value::Null).is_empty());
        assert!(!Snapshot::new(json!({ "records": {} })).is_empty());
    }
}
