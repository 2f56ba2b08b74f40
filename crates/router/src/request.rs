//! Inbound message bodies and replies

use crate::operation::{Operation, WriteKind};
use crate::RouterError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use storage::{
    parse_batch, parse_encoded_batch, DeviceId, Record, StoredRecord, TableName, TimeRange,
    WriteOutcome,
};

/// `data` arrives string-encoded; an inline array is accepted as well
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum BatchData {
    Encoded(String),
    Inline(Vec<Value>),
}

#[derive(Debug, Deserialize)]
struct WriteBody {
    device_id: String,
    table: String,
    data: BatchData,
}

#[derive(Debug, Deserialize)]
struct QueryBody {
    device_id: String,
    table: String,
    start: f64,
    end: f64,
}

/// A parsed, validated operation message
#[derive(Debug, Clone, PartialEq)]
pub enum OperationRequest {
    Write {
        kind: WriteKind,
        table: TableName,
        device: DeviceId,
        records: Vec<Record>,
    },
    Query {
        table: TableName,
        device: DeviceId,
        range: TimeRange,
    },
}

impl OperationRequest {
    /// Interpret a message body for `operation`
    pub fn parse(operation: Operation, body: Value) -> Result<Self, RouterError> {
        let invalid = |e: serde_json::Error| {
            RouterError::InvalidRequest(format!("{} body: {}", operation, e))
        };

        match operation.write_kind() {
            Some(kind) => {
                let body: WriteBody = serde_json::from_value(body).map_err(invalid)?;
                let records = match body.data {
                    BatchData::Encoded(encoded) => parse_encoded_batch(&encoded)?,
                    BatchData::Inline(values) => parse_batch(values)?,
                };
                Ok(OperationRequest::Write {
                    kind,
                    table: TableName::parse(&body.table)?,
                    device: DeviceId::parse(&body.device_id)?,
                    records,
                })
            }
            None => {
                let body: QueryBody = serde_json::from_value(body).map_err(invalid)?;
                Ok(OperationRequest::Query {
                    table: TableName::parse(&body.table)?,
                    device: DeviceId::parse(&body.device_id)?,
                    range: TimeRange::new(body.start, body.end)?,
                })
            }
        }
    }
}

/// Result delivered through a completion
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Reply {
    Written(WriteOutcome),
    Rows(Vec<StoredRecord>),
}

impl Reply {
    /// Rows of a read reply; empty for writes
    pub fn into_rows(self) -> Vec<StoredRecord> {
        match self {
            Reply::Rows(rows) => rows,
            Reply::Written(_) => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use storage::StorageError;

    const DEVICE: &str = "550e8400-e29b-41d4-a716-446655449990";

    #[test]
    fn test_parse_encoded_write() {
        let body = json!({
            "device_id": DEVICE,
            "table": "battery",
            "data": "[{\"timestamp\":1659349990,\"level\":80}]",
        });
        match OperationRequest::parse(Operation::InsertData, body).unwrap() {
            OperationRequest::Write { kind, table, records, .. } => {
                assert_eq!(kind, WriteKind::Insert);
                assert_eq!(table.as_str(), "battery");
                assert_eq!(records.len(), 1);
                assert_eq!(records[0].payload["level"], 80);
            }
            other => panic!("unexpected request: {:?}", other),
        }
    }

    #[test]
    fn test_parse_inline_write() {
        let body = json!({
            "device_id": DEVICE,
            "table": "battery",
            "data": [{"timestamp": 1.0}, {"timestamp": 2.0}],
        });
        let request = OperationRequest::parse(Operation::DeleteData, body).unwrap();
        assert!(matches!(
            request,
            OperationRequest::Write { kind: WriteKind::Delete, ref records, .. } if records.len() == 2
        ));
    }

    #[test]
    fn test_parse_query() {
        let body = json!({"device_id": DEVICE, "table": "T", "start": 0, "end": 2000});
        let request = OperationRequest::parse(Operation::GetData, body).unwrap();
        match request {
            OperationRequest::Query { range, .. } => {
                assert_eq!(range.start, 0.0);
                assert_eq!(range.end, 2000.0);
            }
            other => panic!("unexpected request: {:?}", other),
        }
    }

    #[test]
    fn test_missing_fields() {
        let err = OperationRequest::parse(Operation::GetData, json!({"table": "T"})).unwrap_err();
        assert!(matches!(err, RouterError::InvalidRequest(_)));
    }

    #[test]
    fn test_bad_table_name_is_storage_error() {
        let body = json!({"device_id": DEVICE, "table": "x;drop", "data": "[]"});
        let err = OperationRequest::parse(Operation::InsertData, body).unwrap_err();
        assert!(matches!(
            err,
            RouterError::Storage(StorageError::InvalidTableName { .. })
        ));
    }

    #[test]
    fn test_bad_device_id() {
        let body = json!({"device_id": "D1", "table": "T", "data": "[]"});
        let err = OperationRequest::parse(Operation::UpdateData, body).unwrap_err();
        assert!(matches!(err, RouterError::Storage(StorageError::InvalidDeviceId(_))));
    }

    #[test]
    fn test_reply_serializes_as_row_array() {
        let reply = Reply::Rows(Vec::new());
        assert_eq!(serde_json::to_value(&reply).unwrap(), json!([]));
    }
}
