//! Method resolution and invocation.
//!
//! The server routes every inbound frame through a [`Dispatcher`]. The
//! bundled [`MethodDispatcher`] resolves method names against a table of
//! capability-checked async callables built once at bind time; unknown
//! names are rejected at dispatch time, not at bind time, so the caller
//! sees them as an error Response rather than a dead endpoint.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::{json, Value};

use crate::responder::Responder;
use crate::types::Result;

/// Resolves a method name plus parameters to application code.
///
/// `dispatch_request` implementations must complete the responder exactly
/// once; a responder left incomplete leaves the caller waiting on its own
/// timeout policy. Notify handlers have no reply channel, so their errors
/// stay on the server side.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    async fn dispatch_request(&self, method: &str, params: Vec<Value>, responder: Responder);

    async fn dispatch_notify(&self, method: &str, params: Vec<Value>);
}

type Handler = Arc<dyn Fn(Vec<Value>) -> BoxFuture<'static, Result<Value>> + Send + Sync>;

/// Dispatcher backed by a method-name → callable table.
#[derive(Default)]
pub struct MethodDispatcher {
    methods: HashMap<String, Handler>,
}

impl MethodDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an async method handler.
    pub fn method<F, Fut>(mut self, name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        self.methods
            .insert(name.into(), Arc::new(move |params| Box::pin(handler(params))));
        self
    }

    /// Restrict the table to an accept list. Names outside the list are
    /// dropped and behave exactly like methods that were never registered.
    pub fn accept(mut self, accept: &[&str]) -> Self {
        self.methods.retain(|name, _| accept.contains(&name.as_str()));
        self
    }

    /// Registered (and accepted) method names, for diagnostics.
    pub fn method_names(&self) -> Vec<&str> {
        self.methods.keys().map(String::as_str).collect()
    }

    fn resolve(&self, method: &str) -> Option<Handler> {
        self.methods.get(method).cloned()
    }
}

#[async_trait]
impl Dispatcher for MethodDispatcher {
    async fn dispatch_request(&self, method: &str, params: Vec<Value>, responder: Responder) {
        let Some(handler) = self.resolve(method) else {
            tracing::debug!("request for unknown method: {}", method);
            responder
                .error(json!(format!("method not found: {}", method)))
                .await;
            return;
        };

        // Handler failures become the Response's error payload; they never
        // escape to the transport boundary.
        match handler(params).await {
            Ok(value) => responder.result(value).await,
            Err(e) => responder.error(json!(e.to_string())).await,
        }
    }

    async fn dispatch_notify(&self, method: &str, params: Vec<Value>) {
        let Some(handler) = self.resolve(method) else {
            tracing::warn!("notify for unknown method: {}", method);
            return;
        };

        // No reply channel exists for notifications; log and move on.
        if let Err(e) = handler(params).await {
            tracing::warn!("notify handler {} failed: {}", method, e);
        }
    }
}

impl fmt::Debug for MethodDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodDispatcher")
            .field("methods", &self.methods.keys().collect::<Vec<_>>())
            .finish()
    }
}
