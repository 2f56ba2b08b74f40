//! Repository Implementation
//!
//! Write and read paths for per-table sensor records. Every statement is
//! parameterized; only the validated, quoted table name is spliced into
//! statement text.

use crate::pool::ConnectionPool;
use crate::record::{DeviceId, Record, TimeRange};
use crate::schema::{SchemaProvisioner, TableName};
use crate::StorageError;
use metrics::counter;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::postgres::{PgConnection, PgQueryResult, PgRow};
use sqlx::types::Json;
use sqlx::{Postgres, QueryBuilder, Row};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Rows per INSERT statement; three bind parameters per row stays well
/// under the protocol limit of 65535.
pub const MAX_ROWS_PER_INSERT: usize = 10_000;

/// SQLSTATE `undefined_table`
const UNDEFINED_TABLE: &str = "42P01";

fn is_undefined_table(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.code().as_deref() == Some(UNDEFINED_TABLE))
}

async fn insert_chunk(
    conn: &mut PgConnection,
    table: &TableName,
    device: &DeviceId,
    chunk: &[Record],
) -> Result<PgQueryResult, sqlx::Error> {
    let mut builder = QueryBuilder::<Postgres>::new(format!(
        "INSERT INTO {} (\"device_id\", \"timestamp\", \"data\") ",
        table.quoted()
    ));
    builder.push_values(chunk, |mut row, record| {
        row.push_bind(device.as_uuid())
            .push_bind(record.timestamp)
            .push_bind(Json(record.document()));
    });
    builder.build().execute(conn).await
}

/// Result of a write operation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteOutcome {
    /// Rows touched by successful statements
    pub rows_affected: u64,
    /// Statements rejected by the store (update path only)
    pub failed: usize,
}

/// A row read back from a record table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRecord {
    #[serde(rename = "_id")]
    pub id: i32,
    pub timestamp: f64,
    pub device_id: Uuid,
    pub data: Value,
}

impl StoredRecord {
    fn from_row(row: &PgRow) -> Result<Self, sqlx::Error> {
        let data: Json<Value> = row.try_get("data")?;
        Ok(Self {
            id: row.try_get("_id")?,
            timestamp: row.try_get("timestamp")?,
            device_id: row.try_get("device_id")?,
            data: data.0,
        })
    }
}

/// Repository for record tables
pub struct Repository {
    pool: ConnectionPool,
    provisioner: SchemaProvisioner,
}

impl Repository {
    /// Create a repository over a shared pool
    pub fn new(pool: ConnectionPool) -> Self {
        info!("Creating PostgreSQL repository");
        Self {
            provisioner: SchemaProvisioner::new(pool.clone()),
            pool,
        }
    }

    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    pub fn provisioner(&self) -> &SchemaProvisioner {
        &self.provisioner
    }

    /// Provision a table and its index
    pub async fn ensure_table(&self, table: &TableName) -> Result<(), StorageError> {
        self.provisioner.ensure_table(table).await
    }

    /// Log and count a rejected statement. A missing table also clears the
    /// provisioning memo so the next insert recreates it.
    fn note_failure(&self, operation: &'static str, table: &TableName, err: &sqlx::Error) {
        if is_undefined_table(err) {
            self.provisioner.forget(table);
        }
        error!("Failed to process {} for {}: {}", operation, table, err);
        counter!("storage_statement_failures_total", "operation" => operation).increment(1);
    }

    /// Insert a batch, provisioning the table first.
    ///
    /// An empty batch returns immediately without touching the store.
    pub async fn insert(
        &self,
        table: &TableName,
        device: &DeviceId,
        records: &[Record],
    ) -> Result<WriteOutcome, StorageError> {
        if records.is_empty() {
            return Ok(WriteOutcome::default());
        }

        if let Err(e) = self.provisioner.ensure_table(table).await {
            counter!("storage_statement_failures_total", "operation" => "insert").increment(1);
            return Err(e);
        }

        let mut conn = self.pool.acquire().await.map_err(|e| {
            error!("Failed to establish connection: {}", e);
            e
        })?;

        let mut rows_affected = 0;
        for chunk in records.chunks(MAX_ROWS_PER_INSERT) {
            let attempt = insert_chunk(&mut *conn, table, device, chunk).await;
            let result = match attempt {
                // Dropped behind our back: provision again and retry once.
                Err(e) if is_undefined_table(&e) => {
                    warn!("Table {} is gone, provisioning it again", table);
                    drop(conn);
                    self.provisioner.forget(table);
                    self.provisioner.ensure_table(table).await?;
                    conn = self.pool.acquire().await?;
                    insert_chunk(&mut *conn, table, device, chunk).await
                }
                other => other,
            };

            let done = result.map_err(|e| {
                self.note_failure("insert", table, &e);
                StorageError::from(e)
            })?;
            rows_affected += done.rows_affected();
        }

        info!("{} inserted to {}: {} records", device, table, records.len());
        counter!("storage_records_inserted_total").increment(rows_affected);

        Ok(WriteOutcome {
            rows_affected,
            failed: 0,
        })
    }

    /// Overwrite the payload of each `(device, timestamp)` row.
    ///
    /// Records are applied in order on one connection without a
    /// transaction; a rejected statement is logged and counted, and the
    /// rest of the batch still runs.
    pub async fn update(
        &self,
        table: &TableName,
        device: &DeviceId,
        records: &[Record],
    ) -> Result<WriteOutcome, StorageError> {
        if records.is_empty() {
            return Ok(WriteOutcome::default());
        }

        let mut conn = self.pool.acquire().await.map_err(|e| {
            error!("Failed to establish connection: {}", e);
            e
        })?;

        let sql = format!(
            "UPDATE {} SET \"data\" = $1 WHERE \"device_id\" = $2 AND \"timestamp\" = $3",
            table.quoted()
        );

        let mut outcome = WriteOutcome::default();
        for record in records {
            let result = sqlx::query(&sql)
                .bind(Json(record.document()))
                .bind(device.as_uuid())
                .bind(record.timestamp)
                .execute(&mut *conn)
                .await;

            match result {
                Ok(done) => {
                    outcome.rows_affected += done.rows_affected();
                    debug!("{} updated {} at {}", device, table, record.timestamp);
                }
                Err(e) => {
                    outcome.failed += 1;
                    debug!("Update of {} at {} rejected", table, record.timestamp);
                    self.note_failure("update", table, &e);
                }
            }
        }

        info!(
            "{} updated {}: {} rows ({} failed)",
            device, table, outcome.rows_affected, outcome.failed
        );
        counter!("storage_records_updated_total").increment(outcome.rows_affected);

        Ok(outcome)
    }

    /// Delete every row of `device` whose timestamp appears in the batch
    pub async fn delete(
        &self,
        table: &TableName,
        device: &DeviceId,
        records: &[Record],
    ) -> Result<WriteOutcome, StorageError> {
        if records.is_empty() {
            return Ok(WriteOutcome::default());
        }

        let timestamps: Vec<f64> = records.iter().map(|r| r.timestamp).collect();

        let mut conn = self.pool.acquire().await.map_err(|e| {
            error!("Failed to establish connection: {}", e);
            e
        })?;

        let sql = format!(
            "DELETE FROM {} WHERE \"device_id\" = $1 AND \"timestamp\" = ANY($2)",
            table.quoted()
        );

        let result = sqlx::query(&sql)
            .bind(device.as_uuid())
            .bind(timestamps)
            .execute(&mut *conn)
            .await
            .map_err(|e| {
                self.note_failure("delete", table, &e);
                StorageError::from(e)
            })?;

        let rows_affected = result.rows_affected();
        info!(
            "{} deleted from {}: {} records ({} rows)",
            device,
            table,
            records.len(),
            rows_affected
        );
        counter!("storage_records_deleted_total").increment(rows_affected);

        Ok(WriteOutcome {
            rows_affected,
            failed: 0,
        })
    }

    /// Rows of `device` within `range`, ascending by timestamp
    pub async fn query(
        &self,
        table: &TableName,
        device: &DeviceId,
        range: TimeRange,
    ) -> Result<Vec<StoredRecord>, StorageError> {
        let mut conn = self.pool.acquire().await.map_err(|e| {
            error!("Failed to establish connection: {}", e);
            e
        })?;

        let sql = format!(
            "SELECT \"_id\", \"timestamp\", \"device_id\", \"data\" FROM {} \
             WHERE \"device_id\" = $1 AND \"timestamp\" BETWEEN $2 AND $3 \
             ORDER BY \"timestamp\" ASC",
            table.quoted()
        );

        let fetched = sqlx::query(&sql)
            .bind(device.as_uuid())
            .bind(range.start)
            .bind(range.end)
            .fetch_all(&mut *conn)
            .await;
        drop(conn);

        let rows = fetched.map_err(|e| {
            self.note_failure("query", table, &e);
            StorageError::from(e)
        })?;

        let records = rows
            .iter()
            .map(StoredRecord::from_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| {
                error!("Failed to decode rows from {}: {}", table, e);
                StorageError::Statement(e.to_string())
            })?;

        info!("{} : retrieved {} records from {}", device, records.len(), table);
        counter!("storage_records_queried_total").increment(records.len() as u64);

        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DatabaseConfig;
    use serde_json::json;

    async fn closed_repository() -> Repository {
        let pool = ConnectionPool::new(&DatabaseConfig::default()).unwrap();
        pool.close().await;
        Repository::new(pool)
    }

    fn device() -> DeviceId {
        DeviceId::parse("550e8400-e29b-41d4-a716-446655449990").unwrap()
    }

    fn table() -> TableName {
        TableName::parse("accelerometer").unwrap()
    }

    #[tokio::test]
    async fn test_empty_batches_touch_nothing() {
        // A closed pool fails every acquire, so any statement attempt would error.
        let repo = closed_repository().await;

        assert_eq!(
            repo.insert(&table(), &device(), &[]).await.unwrap(),
            WriteOutcome::default()
        );
        assert_eq!(
            repo.update(&table(), &device(), &[]).await.unwrap(),
            WriteOutcome::default()
        );
        assert_eq!(
            repo.delete(&table(), &device(), &[]).await.unwrap(),
            WriteOutcome::default()
        );
        assert!(!repo.provisioner().is_provisioned(&table()));
    }

    #[tokio::test]
    async fn test_closed_pool_surfaces_connection_failure() {
        let repo = closed_repository().await;
        let records = vec![Record::from_value(0, json!({"timestamp": 1000, "v": 1})).unwrap()];

        // Provisioning runs first and reports its own failure kind.
        let err = repo.insert(&table(), &device(), &records).await.unwrap_err();
        assert!(matches!(err, StorageError::Schema { .. }));

        let err = repo.update(&table(), &device(), &records).await.unwrap_err();
        assert!(matches!(err, StorageError::Connection(_)));

        let err = repo.delete(&table(), &device(), &records).await.unwrap_err();
        assert!(matches!(err, StorageError::Connection(_)));

        let range = TimeRange::new(0.0, 2000.0).unwrap();
        let err = repo.query(&table(), &device(), range).await.unwrap_err();
        assert!(matches!(err, StorageError::Connection(_)));
    }

    #[test]
    fn test_undefined_table_detection_ignores_other_errors() {
        assert!(!is_undefined_table(&sqlx::Error::PoolTimedOut));
        assert!(!is_undefined_table(&sqlx::Error::RowNotFound));
    }

    #[test]
    fn test_stored_record_serializes_id_column() {
        let record = StoredRecord {
            id: 7,
            timestamp: 1000.0,
            device_id: device().as_uuid(),
            data: json!({"timestamp": 1000, "v": 1}),
        };
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["_id"], 7);
        assert_eq!(value["data"]["v"], 1);
        assert_eq!(value["device_id"], "550e8400-e29b-41d4-a716-446655449990");
    }
}
