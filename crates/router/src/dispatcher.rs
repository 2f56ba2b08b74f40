//! Request Router
//!
//! Envelopes travel over a bounded channel to a single run loop, which
//! spawns one task per request so any number can be in flight. Every
//! envelope carries a completion channel; write callers usually drop it.

use crate::operation::DispatchMode;
use crate::registry::HandlerRegistry;
use crate::request::Reply;
use crate::RouterError;
use serde_json::Value;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn, Level};

/// Default number of queued, not yet dispatched requests
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

type ReplySender = oneshot::Sender<Result<Reply, RouterError>>;

struct Envelope {
    operation: String,
    body: Value,
    reply: ReplySender,
}

/// Resolves with the outcome of a dispatched request.
///
/// Dropping it does not cancel the request.
#[derive(Debug)]
pub struct Completion {
    rx: oneshot::Receiver<Result<Reply, RouterError>>,
}

impl Future for Completion {
    type Output = Result<Reply, RouterError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        Pin::new(&mut this.rx)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(RouterError::Closed)))
    }
}

/// Cloneable sending side of the router
#[derive(Clone)]
pub struct RouterHandle {
    tx: mpsc::Sender<Envelope>,
}

impl RouterHandle {
    /// Enqueue a request and return without waiting for it to run
    pub async fn dispatch(&self, operation: &str, body: Value) -> Result<Completion, RouterError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Envelope {
                operation: operation.to_string(),
                body,
                reply,
            })
            .await
            .map_err(|_| RouterError::Closed)?;
        Ok(Completion { rx })
    }

    /// Enqueue a request and wait for its reply
    pub async fn request(&self, operation: &str, body: Value) -> Result<Reply, RouterError> {
        self.dispatch(operation, body).await?.await
    }

    /// Whether the run loop has stopped
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Receiving side: owns the registry and the in-flight tasks
pub struct Router {
    registry: Arc<HandlerRegistry>,
    rx: mpsc::Receiver<Envelope>,
    tasks: JoinSet<()>,
}

impl Router {
    /// Create a router and its handle
    pub fn channel(registry: HandlerRegistry, capacity: usize) -> (RouterHandle, Self) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let router = Self {
            registry: Arc::new(registry),
            rx,
            tasks: JoinSet::new(),
        };
        (RouterHandle { tx }, router)
    }

    /// Run until every handle is dropped, then drain in-flight requests
    pub async fn run(mut self) {
        info!("Starting request router with {} operations", self.registry.len());

        loop {
            tokio::select! {
                envelope = self.rx.recv() => match envelope {
                    Some(envelope) => self.dispatch(envelope),
                    None => break,
                },
                Some(joined) = self.tasks.join_next(), if !self.tasks.is_empty() => {
                    if let Err(e) = joined {
                        error!("Request task failed: {}", e);
                    }
                }
            }
        }

        debug!("Router channel closed, draining {} requests", self.tasks.len());
        while let Some(joined) = self.tasks.join_next().await {
            if let Err(e) = joined {
                error!("Request task failed: {}", e);
            }
        }

        info!("Request router stopped");
    }

    fn dispatch(&mut self, envelope: Envelope) {
        let Envelope {
            operation,
            body,
            reply,
        } = envelope;

        let Some(route) = self.registry.route(&operation).cloned() else {
            warn!("No handler for operation {:?}, dropping request", operation);
            let _ = reply.send(Err(RouterError::UnknownOperation(operation)));
            return;
        };

        self.tasks.spawn(async move {
            let result = (route.handler)(body).await;

            match &result {
                Ok(_) => debug!("{} completed", operation),
                Err(e) => {
                    let level = failure_level(e, route.mode);
                    if level == Level::ERROR {
                        error!("{} failed: {}", operation, e)
                    } else if level == Level::WARN {
                        warn!("{} failed: {}", operation, e)
                    } else {
                        debug!("{} failed: {}", operation, e)
                    }
                }
            }

            // The caller may have dropped its completion.
            let _ = reply.send(result);
        });
    }
}

/// Severity for a failed request. Backend failures are logged by the store
/// that raised them.
fn failure_level(err: &RouterError, mode: DispatchMode) -> Level {
    match (err, mode) {
        (RouterError::Storage(e), _) if e.is_backend() => Level::DEBUG,
        (_, DispatchMode::FireAndForget) => Level::ERROR,
        (_, DispatchMode::Reply) => Level::WARN,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use storage::{StorageError, WriteOutcome};

    fn echo_registry() -> HandlerRegistry {
        let mut registry = HandlerRegistry::new();
        registry.register("echo", DispatchMode::Reply, |_body| async {
            Ok(Reply::Written(WriteOutcome {
                rows_affected: 1,
                failed: 0,
            }))
        });
        registry
    }

    #[tokio::test]
    async fn test_request_reply() {
        let (handle, router) = Router::channel(echo_registry(), 8);
        let task = tokio::spawn(router.run());

        let reply = handle.request("echo", Value::Null).await.unwrap();
        assert_eq!(
            reply,
            Reply::Written(WriteOutcome {
                rows_affected: 1,
                failed: 0
            })
        );

        drop(handle);
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_unknown_operation_resolves_with_error() {
        let (handle, router) = Router::channel(echo_registry(), 8);
        let task = tokio::spawn(router.run());

        let err = handle.request("nope", Value::Null).await.unwrap_err();
        assert_eq!(err, RouterError::UnknownOperation("nope".to_string()));

        drop(handle);
        task.await.unwrap();
    }

    #[test]
    fn test_backend_failures_logged_once() {
        let backend = RouterError::Storage(StorageError::Statement("relation missing".into()));
        assert_eq!(failure_level(&backend, DispatchMode::FireAndForget), Level::DEBUG);
        assert_eq!(failure_level(&backend, DispatchMode::Reply), Level::DEBUG);

        let invalid = RouterError::InvalidRequest("no table".into());
        assert_eq!(failure_level(&invalid, DispatchMode::FireAndForget), Level::ERROR);
        assert_eq!(failure_level(&invalid, DispatchMode::Reply), Level::WARN);

        let bad_device = RouterError::Storage(StorageError::InvalidDeviceId("D1".into()));
        assert_eq!(failure_level(&bad_device, DispatchMode::FireAndForget), Level::ERROR);
    }

    #[tokio::test]
    async fn test_dispatch_after_stop_is_closed() {
        let (handle, router) = Router::channel(echo_registry(), 8);
        drop(router);

        assert!(handle.is_closed());
        let err = handle.dispatch("echo", Value::Null).await.unwrap_err();
        assert_eq!(err, RouterError::Closed);
    }
}
