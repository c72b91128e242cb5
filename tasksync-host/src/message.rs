//! Message commands and their handlers.

use crate::{HostError, HostResult, SyncContext};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

/// Why a message handler failed.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// The parameters are unusable; reported as `InvalidTask`.
    #[error("invalid params: {0}")]
    InvalidParams(String),

    /// The handler failed; reported as `UnhandledException`.
    #[error(transparent)]
    Failed(#[from] anyhow::Error),
}

/// Handles a named message command.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, params: &Value, ctx: &SyncContext) -> Result<Value, HandlerError>;
}

struct FnHandler<F>(F);

#[async_trait]
impl<F> MessageHandler for FnHandler<F>
where
    F: Fn(&Value, &SyncContext) -> Result<Value, HandlerError> + Send + Sync,
{
    async fn handle(&self, params: &Value, ctx: &SyncContext) -> Result<Value, HandlerError> {
        (self.0)(params, ctx)
    }
}

fn echo(params: &Value, _ctx: &SyncContext) -> Result<Value, HandlerError> {
    Ok(params.clone())
}

/// Message handlers by name.
#[derive(Default, Clone)]
pub struct MessageHandlers {
    handlers: HashMap<String, Arc<dyn MessageHandler>>,
}

impl MessageHandlers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handlers every host offers: `std.echo` returns its params.
    pub fn with_std() -> Self {
        let mut handlers = Self::new();
        handlers
            .handlers
            .insert("std.echo".to_string(), Arc::new(FnHandler(echo)));
        handlers
    }

    pub fn register(&mut self, name: impl Into<String>, handler: Arc<dyn MessageHandler>) -> HostResult<()> {
        let name = name.into();
        if self.handlers.contains_key(&name) {
            return Err(HostError::HandlerExists(name));
        }
        self.handlers.insert(name, handler);
        Ok(())
    }

    /// Registers a synchronous closure as a handler.
    pub fn register_fn<F>(&mut self, name: impl Into<String>, f: F) -> HostResult<()>
    where
        F: Fn(&Value, &SyncContext) -> Result<Value, HandlerError> + Send + Sync + 'static,
    {
        self.register(name, Arc::new(FnHandler(f)))
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn MessageHandler>> {
        self.handlers.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.keys().cloned().collect();
        names.sort();
        names
    }
}
