use aef_core::{AdapterParams, AdapterParamsExt, AgentAdapter, AgentResponse, EvalError, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;

pub const REPLAY_ADAPTER: &str = "replay";

/// Answers from previously recorded agent output.
///
/// The recording is JSONL, one `{prompt, actual_response, actual_trajectory}`
/// object per line, read once at construction. Scoring a recording lets a
/// metric change be evaluated without calling the agent again.
#[derive(Debug, Clone, Default)]
pub struct ReplayAdapter {
    responses: HashMap<String, AgentResponse>,
}

impl ReplayAdapter {
    /// Params: `path` (required) to the recording.
    pub async fn from_params(params: &AdapterParams) -> Result<Self> {
        let path = params.required_str("path")?;
        Self::load(path).await
    }

    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            EvalError::Config(format!("cannot read replay file '{}': {}", path.display(), e))
        })?;
        Self::from_jsonl(&content)
    }

    pub fn from_jsonl(content: &str) -> Result<Self> {
        let mut responses = HashMap::new();

        for (offset, line) in content.lines().enumerate() {
            let line_no = offset + 1;
            if line.trim().is_empty() {
                continue;
            }
            let invalid =
                |message: String| EvalError::Config(format!("replay line {}: {}", line_no, message));

            let value: Value = serde_json::from_str(line).map_err(|e| invalid(e.to_string()))?;
            let prompt = value
                .get("prompt")
                .and_then(Value::as_str)
                .ok_or_else(|| invalid("missing string field 'prompt'".to_string()))?
                .to_string();
            let response: AgentResponse =
                serde_json::from_value(value).map_err(|e| invalid(e.to_string()))?;

            if responses.contains_key(&prompt) {
                aef_telemetry::warn!(line = line_no, prompt = %prompt, "Duplicate prompt in replay file; keeping first");
                continue;
            }
            responses.insert(prompt, response);
        }

        Ok(Self { responses })
    }

    pub fn with_response(mut self, prompt: impl Into<String>, response: AgentResponse) -> Self {
        self.responses.insert(prompt.into(), response);
        self
    }

    pub fn len(&self) -> usize {
        self.responses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.responses.is_empty()
    }
}

#[async_trait]
impl AgentAdapter for ReplayAdapter {
    fn name(&self) -> &str {
        REPLAY_ADAPTER
    }

    fn supports_concurrent_calls(&self) -> bool {
        true
    }

    async fn get_response(&self, prompt: &str) -> Result<AgentResponse> {
        self.responses.get(prompt).cloned().ok_or_else(|| {
            EvalError::AdapterInvocation(format!("no recorded response for prompt '{}'", prompt))
        })
    }
}
