//! Sensor records and request parameters

use crate::StorageError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use uuid::Uuid;

/// One sensed observation.
///
/// The whole JSON object, `timestamp` included, is stored as the payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub timestamp: f64,
    pub payload: Map<String, Value>,
}

impl Record {
    /// Build a record from a JSON object carrying a numeric `timestamp`
    pub fn from_value(index: usize, value: Value) -> Result<Self, StorageError> {
        let payload = match value {
            Value::Object(map) => map,
            other => {
                return Err(StorageError::InvalidRecord {
                    index,
                    reason: format!("expected an object, got {}", type_name(&other)),
                })
            }
        };

        let timestamp = payload
            .get("timestamp")
            .and_then(Value::as_f64)
            .ok_or_else(|| StorageError::InvalidRecord {
                index,
                reason: "missing numeric timestamp".to_string(),
            })?;

        Ok(Self { timestamp, payload })
    }

    /// Payload as a JSON value
    pub fn document(&self) -> Value {
        Value::Object(self.payload.clone())
    }
}

/// Parse a batch given as a JSON array
pub fn parse_batch(values: Vec<Value>) -> Result<Vec<Record>, StorageError> {
    values
        .into_iter()
        .enumerate()
        .map(|(index, value)| Record::from_value(index, value))
        .collect()
}

/// Parse a batch given as string-encoded JSON array
pub fn parse_encoded_batch(encoded: &str) -> Result<Vec<Record>, StorageError> {
    let values: Vec<Value> = serde_json::from_str(encoded).map_err(|e| {
        StorageError::InvalidRequest(format!("data is not a JSON array: {}", e))
    })?;
    parse_batch(values)
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Device identifier, stored in a UUID column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceId(Uuid);

impl DeviceId {
    pub fn parse(value: &str) -> Result<Self, StorageError> {
        Uuid::parse_str(value.trim())
            .map(Self)
            .map_err(|_| StorageError::InvalidDeviceId(value.to_string()))
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl From<Uuid> for DeviceId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Inclusive timestamp range
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: f64,
    pub end: f64,
}

impl TimeRange {
    pub fn new(start: f64, end: f64) -> Result<Self, StorageError> {
        if !start.is_finite() || !end.is_finite() {
            return Err(StorageError::InvalidRequest(
                "range bounds must be finite numbers".to_string(),
            ));
        }
        if start > end {
            return Err(StorageError::InvalidRequest(format!(
                "range start {} is after end {}",
                start, end
            )));
        }
        Ok(Self { start, end })
    }

    pub fn contains(&self, timestamp: f64) -> bool {
        timestamp >= self.start && timestamp <= self.end
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_record_keeps_whole_object() {
        let record = Record::from_value(0, json!({"timestamp": 1000, "v": 1})).unwrap();
        assert_eq!(record.timestamp, 1000.0);
        assert_eq!(record.document(), json!({"timestamp": 1000, "v": 1}));
    }

    #[test]
    fn test_record_requires_numeric_timestamp() {
        let err = Record::from_value(3, json!({"timestamp": "soon"})).unwrap_err();
        assert!(matches!(err, StorageError::InvalidRecord { index: 3, .. }));
        assert!(Record::from_value(0, json!({"v": 1})).is_err());
    }

    #[test]
    fn test_record_must_be_object() {
        let err = Record::from_value(0, json!([1, 2])).unwrap_err();
        assert!(err.to_string().contains("array"));
    }

    #[test]
    fn test_encoded_batch() {
        let batch = parse_encoded_batch(r#"[{"timestamp":1659349990},{"timestamp":1.5,"x":2}]"#)
            .unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[1].timestamp, 1.5);
    }

    #[test]
    fn test_encoded_batch_empty() {
        assert!(parse_encoded_batch("[]").unwrap().is_empty());
    }

    #[test]
    fn test_encoded_batch_rejects_garbage() {
        assert!(matches!(
            parse_encoded_batch("{not json"),
            Err(StorageError::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_device_id() {
        let id = DeviceId::parse("550e8400-e29b-41d4-a716-446655449990").unwrap();
        assert_eq!(id.to_string(), "550e8400-e29b-41d4-a716-446655449990");
        assert!(matches!(
            DeviceId::parse("D1"),
            Err(StorageError::InvalidDeviceId(_))
        ));
    }

    #[test]
    fn test_time_range() {
        let range = TimeRange::new(0.0, 2000.0).unwrap();
        assert!(range.contains(0.0));
        assert!(range.contains(2000.0));
        assert!(!range.contains(2000.5));
        assert!(TimeRange::new(5.0, 1.0).is_err());
        assert!(TimeRange::new(f64::NAN, 1.0).is_err());
    }
}
