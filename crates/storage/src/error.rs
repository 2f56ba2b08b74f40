//! Storage Error Types

use thiserror::Error;

/// Errors raised by the persistence layer
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StorageError {
    /// The pool could not hand out a connection (closed, timed out, unreachable)
    #[error("Connection failure: {0}")]
    Connection(String),

    /// Table or index creation was rejected
    #[error("Schema failure for table {table}: {message}")]
    Schema { table: String, message: String },

    /// A data-manipulation or query statement was rejected by the store
    #[error("Statement failure: {0}")]
    Statement(String),

    /// Connection parameters are missing or malformed
    #[error("Configuration failure: {0}")]
    Configuration(String),

    /// Table name outside the accepted identifier alphabet
    #[error("Invalid table name {name:?}: {reason}")]
    InvalidTableName { name: String, reason: &'static str },

    /// Device identifier is not a UUID
    #[error("Invalid device id {0:?}")]
    InvalidDeviceId(String),

    /// A record in a batch could not be interpreted
    #[error("Invalid record at index {index}: {reason}")]
    InvalidRecord { index: usize, reason: String },

    /// Request parameters are inconsistent
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl StorageError {
    /// Whether the error came from the store rather than from caller input
    pub fn is_backend(&self) -> bool {
        matches!(
            self,
            StorageError::Connection(_) | StorageError::Schema { .. } | StorageError::Statement(_)
        )
    }
}

impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed
            | sqlx::Error::Io(_)
            | sqlx::Error::Tls(_) => StorageError::Connection(err.to_string()),
            sqlx::Error::Configuration(_) => StorageError::Configuration(err.to_string()),
            _ => StorageError::Statement(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_errors_map_to_connection() {
        assert!(matches!(
            StorageError::from(sqlx::Error::PoolClosed),
            StorageError::Connection(_)
        ));
        assert!(matches!(
            StorageError::from(sqlx::Error::PoolTimedOut),
            StorageError::Connection(_)
        ));
    }

    #[test]
    fn test_row_errors_map_to_statement() {
        let err = StorageError::from(sqlx::Error::RowNotFound);
        assert!(matches!(err, StorageError::Statement(_)));
        assert!(err.is_backend());
    }

    #[test]
    fn test_input_errors_are_not_backend() {
        assert!(!StorageError::InvalidDeviceId("x".into()).is_backend());
        assert!(!StorageError::InvalidRequest("x".into()).is_backend());
    }
}
