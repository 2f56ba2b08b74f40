//! Router Error Types

use storage::StorageError;
use thiserror::Error;

/// Errors surfaced to whoever dispatched a request
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RouterError {
    /// No handler is registered under this name
    #[error("Unknown operation: {0}")]
    UnknownOperation(String),

    /// The message body does not match the operation's contract
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The persistence layer rejected the operation
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// The router stopped before the request completed
    #[error("Router is closed")]
    Closed,
}
