//! Handler registry: operation name to handler

use crate::operation::{DispatchMode, Operation, WriteKind};
use crate::request::{OperationRequest, Reply};
use crate::store::RecordStore;
use crate::RouterError;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Boxed future produced by a handler
pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<Reply, RouterError>> + Send>>;

/// A type-erased operation handler
pub type Handler = Arc<dyn Fn(Value) -> HandlerFuture + Send + Sync>;

/// A registered handler and how callers relate to it
#[derive(Clone)]
pub struct Route {
    pub mode: DispatchMode,
    pub(crate) handler: Handler,
}

/// Maps operation names to handlers
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    routes: HashMap<String, Route>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind the four persistence operations to `store`
    pub fn for_store(store: Arc<dyn RecordStore>) -> Self {
        let mut registry = Self::new();
        for operation in Operation::ALL {
            let store = store.clone();
            registry.register(operation.name(), operation.mode(), move |body| {
                let store = store.clone();
                async move {
                    let request = OperationRequest::parse(operation, body)?;
                    execute(store.as_ref(), request).await
                }
            });
        }
        registry
    }

    /// Register (or replace) the handler for `name`
    pub fn register<F, Fut>(&mut self, name: impl Into<String>, mode: DispatchMode, handler: F)
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Reply, RouterError>> + Send + 'static,
    {
        let handler: Handler =
            Arc::new(move |body: Value| -> HandlerFuture { Box::pin(handler(body)) });
        self.routes.insert(name.into(), Route { mode, handler });
    }

    pub fn route(&self, name: &str) -> Option<&Route> {
        self.routes.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.routes.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

/// Run a parsed request against a store
pub async fn execute(
    store: &dyn RecordStore,
    request: OperationRequest,
) -> Result<Reply, RouterError> {
    match request {
        OperationRequest::Write {
            kind,
            table,
            device,
            records,
        } => {
            let outcome = match kind {
                WriteKind::Insert => store.insert(&table, &device, &records).await?,
                WriteKind::Update => store.update(&table, &device, &records).await?,
                WriteKind::Delete => store.delete(&table, &device, &records).await?,
            };
            Ok(Reply::Written(outcome))
        }
        OperationRequest::Query {
            table,
            device,
            range,
        } => Ok(Reply::Rows(store.query(&table, &device, range).await?)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use storage::WriteOutcome;

    #[tokio::test]
    async fn test_register_and_call() {
        let mut registry = HandlerRegistry::new();
        registry.register("ping", DispatchMode::Reply, |_body| async {
            Ok(Reply::Written(WriteOutcome::default()))
        });

        assert!(registry.contains("ping"));
        assert_eq!(registry.len(), 1);

        let route = registry.route("ping").unwrap();
        assert_eq!(route.mode, DispatchMode::Reply);
        let reply = (route.handler)(Value::Null).await.unwrap();
        assert_eq!(reply, Reply::Written(WriteOutcome::default()));
    }

    #[test]
    fn test_missing_route() {
        assert!(HandlerRegistry::new().route("insertData").is_none());
    }
}
