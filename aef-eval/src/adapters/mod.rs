//! Adapter registry and the built-in generic adapters
//!
//! Agent-specific adapters live with the agent they wrap and are registered
//! by the caller before the run starts.

mod echo;
mod http;
mod replay;

pub use echo::{ECHO_ADAPTER, EchoAdapter};
pub use http::{HTTP_ADAPTER, HttpAgentAdapter};
pub use replay::{REPLAY_ADAPTER, ReplayAdapter};

use aef_core::{AdapterFactory, AdapterParams, AgentAdapter, EvalError, FnAdapterFactory, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

/// Adapter factories by key
#[derive(Clone)]
pub struct AdapterRegistry {
    factories: HashMap<String, Arc<dyn AdapterFactory>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self { factories: HashMap::new() }
    }

    /// `echo`, `replay` and `http`.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register_fn(ECHO_ADAPTER, EchoAdapter::from_params);
        registry.register(REPLAY_ADAPTER, ReplayFactory);
        registry.register(HTTP_ADAPTER, HttpFactory);
        registry
    }

    pub fn register(&mut self, key: impl Into<String>, factory: impl AdapterFactory + 'static) {
        self.factories.insert(key.into(), Arc::new(factory));
    }

    pub fn register_fn<F>(&mut self, key: impl Into<String>, build: F)
    where
        F: Fn(&AdapterParams) -> Result<Box<dyn AgentAdapter>> + Send + Sync + 'static,
    {
        self.register(key, FnAdapterFactory::new(build));
    }

    pub fn contains(&self, key: &str) -> bool {
        self.factories.contains_key(key)
    }

    /// Registered keys, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.factories.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Build the adapter registered under `key`.
    ///
    /// An unknown key, or a factory that rejects its parameters, is a
    /// configuration error.
    pub async fn create(&self, key: &str, params: &AdapterParams) -> Result<Box<dyn AgentAdapter>> {
        let factory = self.factories.get(key).ok_or_else(|| {
            EvalError::Config(format!(
                "Adapter '{}' not found. Available adapters: {}",
                key,
                self.keys().join(", ")
            ))
        })?;

        factory.create(params).await.map_err(|e| match e {
            EvalError::Config(_) => e,
            other => EvalError::Config(format!("failed to construct adapter '{}': {}", key, other)),
        })
    }
}

impl Default for AdapterRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

struct ReplayFactory;

#[async_trait]
impl AdapterFactory for ReplayFactory {
    async fn create(&self, params: &AdapterParams) -> Result<Box<dyn AgentAdapter>> {
        Ok(Box::new(ReplayAdapter::from_params(params).await?))
    }
}

struct HttpFactory;

#[async_trait]
impl AdapterFactory for HttpFactory {
    async fn create(&self, params: &AdapterParams) -> Result<Box<dyn AgentAdapter>> {
        Ok(Box::new(HttpAgentAdapter::connect(params).await?))
    }
}
