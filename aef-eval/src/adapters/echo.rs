use aef_core::{AdapterParams, AdapterParamsExt, AgentAdapter, AgentResponse, Result};
use async_trait::async_trait;

pub const ECHO_ADAPTER: &str = "echo";

const DEFAULT_TEMPLATE: &str = "response to {prompt}";

/// Answers every prompt from a template. Useful for smoke-testing a
/// configuration without an agent.
#[derive(Debug, Clone)]
pub struct EchoAdapter {
    template: String,
}

impl EchoAdapter {
    pub fn new(template: impl Into<String>) -> Self {
        Self { template: template.into() }
    }

    /// Params: optional `template`, where `{prompt}` is replaced by the prompt.
    pub fn from_params(params: &AdapterParams) -> Result<Box<dyn AgentAdapter>> {
        let template = params.optional_str("template")?.unwrap_or(DEFAULT_TEMPLATE);
        Ok(Box::new(Self::new(template)))
    }
}

impl Default for EchoAdapter {
    fn default() -> Self {
        Self::new(DEFAULT_TEMPLATE)
    }
}

#[async_trait]
impl AgentAdapter for EchoAdapter {
    fn name(&self) -> &str {
        ECHO_ADAPTER
    }

    fn supports_concurrent_calls(&self) -> bool {
        true
    }

    async fn get_response(&self, prompt: &str) -> Result<AgentResponse> {
        Ok(AgentResponse::text(self.template.replace("{prompt}", prompt)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_custom_template() {
        let mut params = AdapterParams::new();
        params.insert("template".to_string(), json!("{prompt}!"));
        let adapter = EchoAdapter::from_params(&params).unwrap();
        let response = adapter.get_response("4").await.unwrap();
        assert_eq!(response.actual_response, "4!");
        assert!(response.actual_trajectory.is_empty());
    }
}
