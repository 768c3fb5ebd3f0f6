//! Action registry - maps action names to handlers

use async_trait::async_trait;
use cmdrelay_shared::Params;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;

/// Context passed to action handlers
#[derive(Debug, Clone)]
pub struct HandlerContext {
    pub device_id: String,
    pub action: String,
}

/// Something a device can do when asked
///
/// A handler returns a human-readable detail on success. Errors become
/// `status=error` outcomes; they never stop the dispatcher.
#[async_trait]
pub trait ActionHandler: Send + Sync {
    async fn execute(&self, ctx: &HandlerContext, params: Params) -> anyhow::Result<String>;
}

/// Adapter so plain async closures can be registered as handlers
pub struct FnHandler<F>(F);

impl<F> FnHandler<F> {
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

#[async_trait]
impl<F, Fut> ActionHandler for FnHandler<F>
where
    F: Fn(HandlerContext, Params) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<String>> + Send + 'static,
{
    async fn execute(&self, ctx: &HandlerContext, params: Params) -> anyhow::Result<String> {
        (self.0)(ctx.clone(), params).await
    }
}

/// Returned when an action name is registered twice
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("action {name:?} is already registered")]
pub struct DuplicateActionError {
    pub name: String,
}

/// Name-to-handler table shared by all dispatch workers
#[derive(Default)]
pub struct ActionRegistry {
    handlers: RwLock<HashMap<String, Arc<dyn ActionHandler>>>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler; fails if `name` is taken
    pub async fn register(
        &self,
        name: impl Into<String>,
        handler: impl ActionHandler + 'static,
    ) -> Result<(), DuplicateActionError> {
        let name = name.into();
        let mut handlers = self.handlers.write().await;
        if handlers.contains_key(&name) {
            return Err(DuplicateActionError { name });
        }
        handlers.insert(name, Arc::new(handler));
        Ok(())
    }

    /// Register an async closure as a handler
    pub async fn register_fn<F, Fut>(
        &self,
        name: impl Into<String>,
        f: F,
    ) -> Result<(), DuplicateActionError>
    where
        F: Fn(HandlerContext, Params) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<String>> + Send + 'static,
    {
        self.register(name, FnHandler(f)).await
    }

    /// Register a handler, replacing any existing one; returns the previous handler
    pub async fn replace(
        &self,
        name: impl Into<String>,
        handler: impl ActionHandler + 'static,
    ) -> Option<Arc<dyn ActionHandler>> {
        self.handlers
            .write()
            .await
            .insert(name.into(), Arc::new(handler))
    }

    /// Look up the handler for `name`
    pub async fn lookup(&self, name: &str) -> Option<Arc<dyn ActionHandler>> {
        self.handlers.read().await.get(name).cloned()
    }

    /// Registered action names, sorted
    pub async fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    pub async fn len(&self) -> usize {
        self.handlers.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.handlers.read().await.is_empty()
    }
}
