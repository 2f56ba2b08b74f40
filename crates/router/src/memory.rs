//! In-memory record store
//!
//! Mirrors the PostgreSQL repository's observable behavior (tables created
//! on insert, statements against unknown tables rejected) without a
//! database. Used by tests and local tooling.

use crate::store::RecordStore;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use storage::{
    DeviceId, Record, StorageError, StoredRecord, TableName, TimeRange, WriteOutcome,
};
use tracing::info;

#[derive(Default)]
struct Tables {
    rows: HashMap<String, Vec<StoredRecord>>,
    next_id: i32,
}

/// Record store held in process memory
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

fn missing(table: &TableName) -> StorageError {
    StorageError::Statement(format!("relation \"{}\" does not exist", table))
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of rows held for `table`, if it exists
    pub fn row_count(&self, table: &str) -> Option<usize> {
        self.tables
            .lock()
            .ok()
            .and_then(|t| t.rows.get(table).map(Vec::len))
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Tables>, StorageError> {
        self.tables
            .lock()
            .map_err(|e| StorageError::Connection(format!("Lock error: {}", e)))
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn insert(
        &self,
        table: &TableName,
        device: &DeviceId,
        records: &[Record],
    ) -> Result<WriteOutcome, StorageError> {
        if records.is_empty() {
            return Ok(WriteOutcome::default());
        }

        let mut tables = self.lock()?;
        let mut next_id = tables.next_id;
        let rows = tables.rows.entry(table.to_string()).or_default();
        for record in records {
            next_id += 1;
            rows.push(StoredRecord {
                id: next_id,
                timestamp: record.timestamp,
                device_id: device.as_uuid(),
                data: record.document(),
            });
        }
        tables.next_id = next_id;

        info!("{} inserted to {}: {} records", device, table, records.len());
        Ok(WriteOutcome {
            rows_affected: records.len() as u64,
            failed: 0,
        })
    }

    async fn update(
        &self,
        table: &TableName,
        device: &DeviceId,
        records: &[Record],
    ) -> Result<WriteOutcome, StorageError> {
        let mut tables = self.lock()?;
        let mut outcome = WriteOutcome::default();

        for record in records {
            let Some(rows) = tables.rows.get_mut(table.as_str()) else {
                outcome.failed += 1;
                continue;
            };
            for row in rows
                .iter_mut()
                .filter(|r| r.device_id == device.as_uuid() && r.timestamp == record.timestamp)
            {
                row.data = record.document();
                outcome.rows_affected += 1;
            }
        }

        Ok(outcome)
    }

    async fn delete(
        &self,
        table: &TableName,
        device: &DeviceId,
        records: &[Record],
    ) -> Result<WriteOutcome, StorageError> {
        if records.is_empty() {
            return Ok(WriteOutcome::default());
        }

        let mut tables = self.lock()?;
        let rows = tables
            .rows
            .get_mut(table.as_str())
            .ok_or_else(|| missing(table))?;

        let before = rows.len();
        rows.retain(|r| {
            r.device_id != device.as_uuid()
                || !records.iter().any(|record| record.timestamp == r.timestamp)
        });

        Ok(WriteOutcome {
            rows_affected: (before - rows.len()) as u64,
            failed: 0,
        })
    }

    async fn query(
        &self,
        table: &TableName,
        device: &DeviceId,
        range: TimeRange,
    ) -> Result<Vec<StoredRecord>, StorageError> {
        let tables = self.lock()?;
        let rows = tables.rows.get(table.as_str()).ok_or_else(|| missing(table))?;

        let mut selected: Vec<StoredRecord> = rows
            .iter()
            .filter(|r| r.device_id == device.as_uuid() && range.contains(r.timestamp))
            .cloned()
            .collect();
        selected.sort_by(|a, b| a.timestamp.total_cmp(&b.timestamp));

        Ok(selected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn device() -> DeviceId {
        DeviceId::parse("550e8400-e29b-41d4-a716-446655449990").unwrap()
    }

    #[tokio::test]
    async fn test_query_unknown_table_fails() {
        let store = MemoryStore::new();
        let table = TableName::parse("nothing").unwrap();
        let err = store
            .query(&table, &device(), TimeRange::new(0.0, 1.0).unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Statement(_)));
    }

    #[tokio::test]
    async fn test_insert_creates_table() {
        let store = MemoryStore::new();
        let table = TableName::parse("light").unwrap();
        let records = storage::parse_batch(vec![json!({"timestamp": 1.0})]).unwrap();

        store.insert(&table, &device(), &records).await.unwrap();
        assert_eq!(store.row_count("light"), Some(1));
    }
}
