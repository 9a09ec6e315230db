//! Registry mapping action names to invocable callbacks, resolved at
//! execution time.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use crate::models::JobArgs;

/// A job body. Callbacks may block for a long time; the execution gate's
/// lock lease is what reclaims jobs whose callback hung.
#[async_trait]
pub trait JobCallback: Send + Sync {
    async fn invoke(&self, args: &JobArgs) -> anyhow::Result<Value>;
}

/// Adapter so plain async closures can be registered as callbacks
pub struct FnCallback<F>(pub F);

#[async_trait]
impl<F, Fut> JobCallback for FnCallback<F>
where
    F: Fn(JobArgs) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<Value>> + Send,
{
    async fn invoke(&self, args: &JobArgs) -> anyhow::Result<Value> {
        (self.0)(args.clone()).await
    }
}

#[derive(Default)]
pub struct ActionRegistry {
    callbacks: RwLock<HashMap<String, Arc<dyn JobCallback>>>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, action: &str, callback: Arc<dyn JobCallback>) {
        let mut callbacks = self.callbacks.write().await;
        callbacks.insert(action.to_string(), callback);
    }

    pub async fn register_fn<F, Fut>(&self, action: &str, f: F)
    where
        F: Fn(JobArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        self.register(action, Arc::new(FnCallback(f))).await;
    }

    pub async fn get(&self, action: &str) -> Option<Arc<dyn JobCallback>> {
        let callbacks = self.callbacks.read().await;
        callbacks.get(action).cloned()
    }
}
