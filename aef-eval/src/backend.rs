//! Delegated scoring
//!
//! Text-similarity and rubric metrics are computed by an external service.
//! The runner sends one batch per run; [`ScoringClient`] adds the timeout,
//! the retry policy and the handling of partially scored batches on top of
//! any [`ScoringBackend`].

use crate::config::{ScoringCredentials, ScoringSettings};
use crate::retry::{RetryConfig, StatusClass, classify_status, with_backoff};
use aef_core::{EvalError, MetricValue, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// A metric the backend computes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DelegatedMetric {
    pub name: String,
    /// `computation` or `rubric`
    pub kind: String,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub params: Map<String, Value>,
}

/// One (response, reference) pair. `index` is the position in the batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoringInstance {
    pub index: usize,
    pub prompt: String,
    pub response: String,
    pub reference: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchRequest {
    pub project_id: String,
    pub location: String,
    pub metrics: Vec<DelegatedMetric>,
    pub instances: Vec<ScoringInstance>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchResponse {
    #[serde(default)]
    pub results: Vec<InstanceScores>,
}

/// Scores for one instance. A `null` or absent score means the backend
/// could not score that metric; `error` says why.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InstanceScores {
    #[serde(default)]
    pub index: Option<usize>,
    #[serde(default)]
    pub scores: BTreeMap<String, Option<MetricValue>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Score of one metric on one instance, or the reason it is missing.
pub type ScoreCell = std::result::Result<MetricValue, String>;

/// Per-instance scores in batch order.
pub type AlignedScores = Vec<BTreeMap<String, ScoreCell>>;

impl BatchResponse {
    /// Lay scores out by batch position. Results without an explicit index
    /// are taken positionally; out-of-range indices are ignored.
    pub fn align(&self, request: &BatchRequest) -> AlignedScores {
        let len = request.instances.len();
        let mut slots: Vec<Option<&InstanceScores>> = vec![None; len];

        for (position, result) in self.results.iter().enumerate() {
            let index = result.index.unwrap_or(position);
            match slots.get_mut(index) {
                Some(slot) if slot.is_none() => *slot = Some(result),
                Some(_) => {
                    aef_telemetry::warn!(index, "Scoring backend returned duplicate instance; ignoring")
                }
                None => aef_telemetry::warn!(index, len, "Scoring backend returned unknown instance index"),
            }
        }

        slots
            .into_iter()
            .map(|slot| {
                request
                    .metrics
                    .iter()
                    .map(|metric| {
                        let cell = match slot {
                            None => Err("no result returned for instance".to_string()),
                            Some(result) => match result.scores.get(&metric.name) {
                                Some(Some(value)) => Ok(*value),
                                _ => Err(result
                                    .error
                                    .clone()
                                    .unwrap_or_else(|| "no score returned".to_string())),
                            },
                        };
                        (metric.name.clone(), cell)
                    })
                    .collect()
            })
            .collect()
    }
}

fn missing_cells(scores: &AlignedScores) -> usize {
    scores.iter().flat_map(|row| row.values()).filter(|cell| cell.is_err()).count()
}

/// An external scoring oracle.
#[async_trait]
pub trait ScoringBackend: Send + Sync {
    async fn evaluate(&self, request: &BatchRequest) -> Result<BatchResponse>;
}

/// JSON-over-HTTP scoring backend.
pub struct HttpScoringBackend {
    client: reqwest::Client,
    endpoint: String,
    api_token: Option<String>,
}

impl HttpScoringBackend {
    pub fn new(
        endpoint: impl Into<String>,
        api_token: Option<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build().map_err(|e| {
            EvalError::Config(format!("failed to build scoring HTTP client: {}", e))
        })?;
        Ok(Self { client, endpoint: endpoint.into(), api_token })
    }

    /// Endpoint from the configuration file, falling back to the
    /// environment.
    pub fn from_settings(settings: &ScoringSettings, credentials: &ScoringCredentials) -> Result<Self> {
        let endpoint = settings
            .endpoint
            .clone()
            .or_else(|| credentials.endpoint.clone())
            .ok_or_else(|| {
                EvalError::Config(
                    "delegated metrics need a scoring endpoint (scoring.endpoint or SCORING_ENDPOINT)"
                        .to_string(),
                )
            })?;
        Self::new(endpoint, credentials.api_token.clone(), settings.timeout())
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl ScoringBackend for HttpScoringBackend {
    async fn evaluate(&self, request: &BatchRequest) -> Result<BatchResponse> {
        let mut builder = self.client.post(&self.endpoint).json(request);
        if let Some(token) = &self.api_token {
            builder = builder.bearer_auth(token);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                EvalError::transient(format!("scoring request timed out: {}", e))
            } else {
                EvalError::transient(format!("scoring request failed: {}", e))
            }
        })?;

        let code = response.status().as_u16();
        let class = classify_status(code);
        if class != StatusClass::Success {
            let body = response.text().await.unwrap_or_default();
            let message = format!("scoring backend returned HTTP {}: {}", code, body.trim());
            return Err(match class {
                StatusClass::Auth => {
                    EvalError::permanent(format!("authentication rejected; {}", message))
                }
                StatusClass::Transient => EvalError::transient(message),
                _ => EvalError::permanent(message),
            });
        }

        response
            .json::<BatchResponse>()
            .await
            .map_err(|e| EvalError::permanent(format!("malformed scoring response: {}", e)))
    }
}

/// Timeout, retry and partial-batch handling around a backend.
#[derive(Clone)]
pub struct ScoringClient {
    backend: Arc<dyn ScoringBackend>,
    retry_config: RetryConfig,
    timeout: Duration,
}

impl ScoringClient {
    pub fn new(backend: Arc<dyn ScoringBackend>, retry_config: RetryConfig, timeout: Duration) -> Self {
        Self { backend, retry_config, timeout }
    }

    pub fn from_settings(backend: Arc<dyn ScoringBackend>, settings: &ScoringSettings) -> Self {
        Self::new(backend, settings.retry_config(), settings.timeout())
    }

    /// Score a batch.
    ///
    /// Transient failures are retried with exponential backoff. A response
    /// that leaves some cells unscored retries the whole batch while budget
    /// remains; whatever is still missing afterwards comes back as `Err`
    /// cells. Exhausted or non-retryable failures are returned as errors.
    pub async fn score(&self, request: &BatchRequest) -> Result<AlignedScores> {
        if request.instances.is_empty() || request.metrics.is_empty() {
            return Ok(vec![BTreeMap::new(); request.instances.len()]);
        }

        let mut partial_backoff = self.retry_config.backoff();

        loop {
            let response =
                with_backoff(&self.retry_config, EvalError::is_retryable, || self.attempt(request))
                    .await?;
            let aligned = response.align(request);
            let missing = missing_cells(&aligned);

            if missing == 0 {
                return Ok(aligned);
            }
            let Some(delay) = partial_backoff.next() else {
                aef_telemetry::warn!(missing, "Scoring batch still incomplete; recording missing scores as failed");
                return Ok(aligned);
            };

            aef_telemetry::warn!(
                missing,
                delay_ms = delay.as_millis() as u64,
                "Scoring batch partially failed; retrying whole batch"
            );
            tokio::time::sleep(delay).await;
        }
    }

    async fn attempt(&self, request: &BatchRequest) -> Result<BatchResponse> {
        match tokio::time::timeout(self.timeout, self.backend.evaluate(request)).await {
            Ok(result) => result,
            Err(_) => Err(EvalError::transient(format!(
                "scoring request timed out after {}s",
                self.timeout.as_secs_f64()
            ))),
        }
    }
}
