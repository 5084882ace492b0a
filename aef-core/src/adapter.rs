use crate::{AgentResponse, EvalError, Result};
use async_trait::async_trait;
use serde_json::{Map, Value};

/// Construction parameters for an adapter, taken verbatim from the
/// configuration file. The framework never interprets them.
pub type AdapterParams = Map<String, Value>;

/// Bridges the evaluation framework to one concrete agent.
///
/// Expensive setup (clients, sessions) belongs in the [`AdapterFactory`]
/// that builds the adapter, never in [`AgentAdapter::get_response`].
#[async_trait]
pub trait AgentAdapter: Send + Sync {
    fn name(&self) -> &str;

    /// Whether the runner may have several `get_response` calls in flight
    /// on this instance at once. Adapters are assumed to serve one call at
    /// a time unless they say otherwise.
    fn supports_concurrent_calls(&self) -> bool {
        false
    }

    /// Send one prompt to the agent.
    ///
    /// Fails with [`EvalError::AdapterInvocation`] when the agent cannot be
    /// reached or reports an error.
    async fn get_response(&self, prompt: &str) -> Result<AgentResponse>;
}

/// Builds an adapter from its configuration parameters.
#[async_trait]
pub trait AdapterFactory: Send + Sync {
    async fn create(&self, params: &AdapterParams) -> Result<Box<dyn AgentAdapter>>;
}

/// Factory backed by a synchronous constructor function.
pub struct FnAdapterFactory<F> {
    build: F,
}

impl<F> FnAdapterFactory<F>
where
    F: Fn(&AdapterParams) -> Result<Box<dyn AgentAdapter>> + Send + Sync,
{
    pub fn new(build: F) -> Self {
        Self { build }
    }
}

#[async_trait]
impl<F> AdapterFactory for FnAdapterFactory<F>
where
    F: Fn(&AdapterParams) -> Result<Box<dyn AgentAdapter>> + Send + Sync,
{
    async fn create(&self, params: &AdapterParams) -> Result<Box<dyn AgentAdapter>> {
        (self.build)(params)
    }
}

/// Typed accessors for [`AdapterParams`]. Errors are configuration errors.
pub trait AdapterParamsExt {
    fn required_str(&self, key: &str) -> Result<&str>;
    fn optional_str(&self, key: &str) -> Result<Option<&str>>;
    fn optional_u64(&self, key: &str) -> Result<Option<u64>>;
}

impl AdapterParamsExt for AdapterParams {
    fn required_str(&self, key: &str) -> Result<&str> {
        self.optional_str(key)?
            .filter(|s| !s.is_empty())
            .ok_or_else(|| EvalError::Config(format!("adapter parameter '{}' is required", key)))
    }

    fn optional_str(&self, key: &str) -> Result<Option<&str>> {
        match self.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.as_str())),
            Some(_) => Err(EvalError::Config(format!(
                "adapter parameter '{}' must be a string",
                key
            ))),
        }
    }

    fn optional_u64(&self, key: &str) -> Result<Option<u64>> {
        match self.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => value.as_u64().map(Some).ok_or_else(|| {
                EvalError::Config(format!(
                    "adapter parameter '{}' must be a non-negative integer",
                    key
                ))
            }),
        }
    }
}
