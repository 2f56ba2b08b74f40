//! Schema Provisioner
//!
//! Creates per-table relations and their `(timestamp, device_id)` index on
//! demand. Both statements are `IF NOT EXISTS` and run under a
//! transaction-scoped advisory lock keyed on the table name, so concurrent
//! provisioning of the same table from any number of tasks or processes
//! neither fails nor duplicates objects.

use crate::pool::ConnectionPool;
use crate::StorageError;
use sqlx::Connection;
use std::collections::HashSet;
use std::fmt;
use std::sync::Mutex;
use tracing::{debug, error, info};

/// Suffix of the secondary index name
pub const INDEX_SUFFIX: &str = "_timestamp_device";

/// PostgreSQL truncates identifiers beyond this many bytes
const MAX_IDENTIFIER_LEN: usize = 63;

/// Longest table name whose derived index name still fits
pub const MAX_TABLE_NAME_LEN: usize = MAX_IDENTIFIER_LEN - INDEX_SUFFIX.len();

/// Quote an identifier for PostgreSQL, doubling embedded quotes
pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// A caller-supplied table name that passed the allow-list
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableName(String);

impl TableName {
    /// Validate a table name: ASCII letters, digits, `_` or `-`, at most
    /// [`MAX_TABLE_NAME_LEN`] bytes.
    pub fn parse(name: &str) -> Result<Self, StorageError> {
        let invalid = |reason| StorageError::InvalidTableName {
            name: name.to_string(),
            reason,
        };

        if name.is_empty() {
            return Err(invalid("empty"));
        }
        if name.len() > MAX_TABLE_NAME_LEN {
            return Err(invalid("too long"));
        }
        if !name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
        {
            return Err(invalid("only ASCII letters, digits, '_' and '-' are allowed"));
        }

        Ok(Self(name.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Quoted relation name for statement text
    pub fn quoted(&self) -> String {
        quote_identifier(&self.0)
    }

    /// Unquoted name of the `(timestamp, device_id)` index
    pub fn index_name(&self) -> String {
        format!("{}{}", self.0, INDEX_SUFFIX)
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// `CREATE TABLE IF NOT EXISTS` statement for a record table
pub fn create_table_sql(table: &TableName) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {} (\
         \"_id\" SERIAL PRIMARY KEY, \
         \"timestamp\" DOUBLE PRECISION NOT NULL, \
         \"device_id\" UUID NOT NULL, \
         \"data\" JSONB NOT NULL)",
        table.quoted()
    )
}

/// `CREATE INDEX IF NOT EXISTS` statement for the lookup index
pub fn create_index_sql(table: &TableName) -> String {
    format!(
        "CREATE INDEX IF NOT EXISTS {} ON {} (\"timestamp\", \"device_id\")",
        quote_identifier(&table.index_name()),
        table.quoted()
    )
}

/// Ensures tables exist before writes reach them
pub struct SchemaProvisioner {
    pool: ConnectionPool,
    /// Tables provisioned by this process
    provisioned: Mutex<HashSet<String>>,
}

impl SchemaProvisioner {
    pub fn new(pool: ConnectionPool) -> Self {
        Self {
            pool,
            provisioned: Mutex::new(HashSet::new()),
        }
    }

    /// Create the table and its index if absent.
    ///
    /// Any failure, including failing to obtain a connection, is returned
    /// as [`StorageError::Schema`]. Nothing is retried.
    pub async fn ensure_table(&self, table: &TableName) -> Result<(), StorageError> {
        if self.is_provisioned(table) {
            return Ok(());
        }

        let mut conn = self.pool.acquire().await.map_err(|e| {
            error!("Failed to connect to database for creating table {}: {}", table, e);
            StorageError::Schema {
                table: table.to_string(),
                message: e.to_string(),
            }
        })?;

        let schema_failure = |statement: &str, e: sqlx::Error| {
            error!("Failed in: {}: {}", statement, e);
            StorageError::Schema {
                table: table.to_string(),
                message: e.to_string(),
            }
        };

        let mut tx = conn
            .begin()
            .await
            .map_err(|e| schema_failure("BEGIN", e))?;

        let lock = "SELECT pg_advisory_xact_lock(hashtext($1))";
        sqlx::query(lock)
            .bind(table.as_str())
            .execute(&mut *tx)
            .await
            .map_err(|e| schema_failure(lock, e))?;

        let create_table = create_table_sql(table);
        sqlx::query(&create_table)
            .execute(&mut *tx)
            .await
            .map_err(|e| schema_failure(&create_table, e))?;
        debug!("Created table {} successfully: {}", table, create_table);

        let create_index = create_index_sql(table);
        sqlx::query(&create_index)
            .execute(&mut *tx)
            .await
            .map_err(|e| schema_failure(&create_index, e))?;
        debug!("Created index for {} successfully: {}", table, create_index);

        tx.commit().await.map_err(|e| schema_failure("COMMIT", e))?;

        self.remember(table);
        info!("Table {} provisioned", table);
        Ok(())
    }

    /// Drop the memo for a table so the next write re-checks it
    pub fn forget(&self, table: &TableName) {
        if let Ok(mut set) = self.provisioned.lock() {
            set.remove(table.as_str());
        }
    }

    /// Whether this process already provisioned `table`
    pub fn is_provisioned(&self, table: &TableName) -> bool {
        self.provisioned
            .lock()
            .map(|set| set.contains(table.as_str()))
            .unwrap_or(false)
    }

    fn remember(&self, table: &TableName) {
        if let Ok(mut set) = self.provisioned.lock() {
            set.insert(table.as_str().to_string());
        }
    }
}
