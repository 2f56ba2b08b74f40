//! The persistence seam driven by the router

use async_trait::async_trait;
use storage::{
    DeviceId, Record, Repository, StorageError, StoredRecord, TableName, TimeRange, WriteOutcome,
};

/// Write and read paths the router dispatches to
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn insert(
        &self,
        table: &TableName,
        device: &DeviceId,
        records: &[Record],
    ) -> Result<WriteOutcome, StorageError>;

    async fn update(
        &self,
        table: &TableName,
        device: &DeviceId,
        records: &[Record],
    ) -> Result<WriteOutcome, StorageError>;

    async fn delete(
        &self,
        table: &TableName,
        device: &DeviceId,
        records: &[Record],
    ) -> Result<WriteOutcome, StorageError>;

    async fn query(
        &self,
        table: &TableName,
        device: &DeviceId,
        range: TimeRange,
    ) -> Result<Vec<StoredRecord>, StorageError>;
}

#[async_trait]
impl RecordStore for Repository {
    async fn insert(
        &self,
        table: &TableName,
        device: &DeviceId,
        records: &[Record],
    ) -> Result<WriteOutcome, StorageError> {
        Repository::insert(self, table, device, records).await
    }

    async fn update(
        &self,
        table: &TableName,
        device: &DeviceId,
        records: &[Record],
    ) -> Result<WriteOutcome, StorageError> {
        Repository::update(self, table, device, records).await
    }

    async fn delete(
        &self,
        table: &TableName,
        device: &DeviceId,
        records: &[Record],
    ) -> Result<WriteOutcome, StorageError> {
        Repository::delete(self, table, device, records).await
    }

    async fn query(
        &self,
        table: &TableName,
        device: &DeviceId,
        range: TimeRange,
    ) -> Result<Vec<StoredRecord>, StorageError> {
        Repository::query(self, table, device, range).await
    }
}
