//! Storage Layer
//!
//! Asynchronous PostgreSQL persistence for time-stamped sensor records:
//! - bounded connection pool configured once at startup
//! - on-demand, idempotent table and index provisioning
//! - batched insert, update and delete keyed by `(device_id, timestamp)`
//! - ranged, ordered retrieval per device

mod error;
pub mod pool;
mod record;
mod repository;
pub mod schema;

pub use error::StorageError;
pub use pool::{ConnectionPool, DatabaseConfig, PoolStatus, SslMode, TlsFiles};
pub use record::{parse_batch, parse_encoded_batch, DeviceId, Record, TimeRange};
pub use repository::{Repository, StoredRecord, WriteOutcome, MAX_ROWS_PER_INSERT};
pub use schema::{SchemaProvisioner, TableName};
