use aef_core::{AdapterParams, AdapterParamsExt, AgentAdapter, AgentResponse, EvalError, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;

pub const HTTP_ADAPTER: &str = "http";

const DEFAULT_USER_ID: &str = "evaluation_user";
const DEFAULT_TIMEOUT_SECS: u64 = 120;

#[derive(Serialize)]
struct QueryRequest<'a> {
    prompt: &'a str,
    user_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    session_id: Option<&'a str>,
}

#[derive(Serialize)]
struct SessionRequest<'a> {
    user_id: &'a str,
}

/// A deployed agent reached over HTTP.
///
/// Params:
/// - `url` (required): endpoint that takes `{prompt, user_id, session_id}`
///   and returns an adapter response document
/// - `headers`: extra request headers
/// - `timeout_secs`: per-request timeout, default 120
/// - `session_url`, `user_id`: when `session_url` is set a session is
///   created once at construction and reused for every query
pub struct HttpAgentAdapter {
    client: reqwest::Client,
    url: String,
    user_id: String,
    session_id: Option<String>,
}

impl HttpAgentAdapter {
    pub async fn connect(params: &AdapterParams) -> Result<Self> {
        let url = params.required_str("url")?.to_string();
        let user_id = params.optional_str("user_id")?.unwrap_or(DEFAULT_USER_ID).to_string();
        let timeout =
            Duration::from_secs(params.optional_u64("timeout_secs")?.unwrap_or(DEFAULT_TIMEOUT_SECS));

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .default_headers(header_map(params)?)
            .build()
            .map_err(|e| EvalError::Config(format!("failed to build agent HTTP client: {}", e)))?;

        let session_id = match params.optional_str("session_url")? {
            Some(session_url) => Some(create_session(&client, session_url, &user_id).await?),
            None => None,
        };

        Ok(Self { client, url, user_id, session_id })
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }
}

fn header_map(params: &AdapterParams) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    let Some(configured) = params.get("headers") else {
        return Ok(headers);
    };
    let Value::Object(configured) = configured else {
        return Err(EvalError::Config("adapter parameter 'headers' must be an object".to_string()));
    };

    for (name, value) in configured {
        let value = value.as_str().ok_or_else(|| {
            EvalError::Config(format!("header '{}' must be a string", name))
        })?;
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| EvalError::Config(format!("invalid header name '{}': {}", name, e)))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| EvalError::Config(format!("invalid value for header '{}': {}", name, e)))?;
        headers.insert(name, value);
    }
    Ok(headers)
}

async fn create_session(client: &reqwest::Client, url: &str, user_id: &str) -> Result<String> {
    let body: Value = send_json(client.post(url).json(&SessionRequest { user_id })).await?;
    let session_id = body
        .get("id")
        .or_else(|| body.get("session_id"))
        .and_then(Value::as_str)
        .ok_or_else(|| {
            EvalError::AdapterInvocation("session response carries no 'id' or 'session_id'".to_string())
        })?;

    aef_telemetry::debug!(session_id, user_id, "Agent session created");
    Ok(session_id.to_string())
}

async fn send_json<T: serde::de::DeserializeOwned>(request: reqwest::RequestBuilder) -> Result<T> {
    let response = request
        .send()
        .await
        .map_err(|e| EvalError::AdapterInvocation(format!("agent request failed: {}", e)))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        let reason = if matches!(status.as_u16(), 401 | 403) { "authentication rejected; " } else { "" };
        return Err(EvalError::AdapterInvocation(format!(
            "{}agent returned HTTP {}: {}",
            reason,
            status.as_u16(),
            body.trim()
        )));
    }

    response
        .json::<T>()
        .await
        .map_err(|e| EvalError::AdapterInvocation(format!("malformed agent response: {}", e)))
}

#[async_trait]
impl AgentAdapter for HttpAgentAdapter {
    fn name(&self) -> &str {
        HTTP_ADAPTER
    }

    /// Stateless endpoints can take parallel queries; a shared session
    /// cannot.
    fn supports_concurrent_calls(&self) -> bool {
        self.session_id.is_none()
    }

    async fn get_response(&self, prompt: &str) -> Result<AgentResponse> {
        let request = QueryRequest {
            prompt,
            user_id: &self.user_id,
            session_id: self.session_id.as_deref(),
        };
        send_json(self.client.post(&self.url).json(&request)).await
    }
}
