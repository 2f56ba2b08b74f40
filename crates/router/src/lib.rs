//! Request Router
//!
//! Decouples the persistence layer from its callers. Callers post named
//! operation messages (`insertData`, `updateData`, `deleteData`, `getData`)
//! through a [`RouterHandle`]; the [`Router`] run loop looks the name up in a
//! [`HandlerRegistry`] and runs the handler on its own task.
//!
//! Writes are fire-and-forget: `dispatch` returns as soon as the message is
//! queued. Reads are awaited through `request`.

mod dispatcher;
mod error;
pub mod memory;
mod operation;
mod registry;
mod request;
mod store;

pub use dispatcher::{Completion, Router, RouterHandle, DEFAULT_QUEUE_CAPACITY};
pub use error::RouterError;
pub use memory::MemoryStore;
pub use operation::{DispatchMode, Operation, WriteKind};
pub use registry::{execute, Handler, HandlerFuture, HandlerRegistry, Route};
pub use request::{OperationRequest, Reply};
pub use store::RecordStore;

use std::sync::Arc;

/// Router bound to `store` for the four persistence operations
pub fn spawn(
    store: Arc<dyn RecordStore>,
    capacity: usize,
) -> (RouterHandle, tokio::task::JoinHandle<()>) {
    let (handle, router) = Router::channel(HandlerRegistry::for_store(store), capacity);
    (handle, tokio::spawn(router.run()))
}
