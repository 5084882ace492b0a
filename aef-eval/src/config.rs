//! Evaluation configuration
//!
//! One document describes a run: which adapter to build, where the dataset
//! lives, which metrics to compute and how the run behaves on failure.
//! YAML, TOML and JSON are accepted; the format follows the file extension.

use crate::dataset::ColumnMapping;
use crate::retry::RetryConfig;
use aef_core::{AdapterParams, EvalError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;
use uuid::Uuid;

pub const DEFAULT_EXPERIMENT_NAME: &str = "default-agent-evals";
pub const DEFAULT_RUN_NAME_PREFIX: &str = "eval";

pub const ENV_PROJECT_ID: &str = "GCP_PROJECT_ID";
pub const ENV_REGION: &str = "GCP_REGION";
pub const ENV_SCORING_ENDPOINT: &str = "SCORING_ENDPOINT";
pub const ENV_SCORING_API_TOKEN: &str = "SCORING_API_TOKEN";

const REDACTED: &str = "***";
const SENSITIVE_KEY_PARTS: [&str; 5] = ["token", "secret", "password", "api_key", "authorization"];

/// Top-level run configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationConfig {
    /// Registry key of the adapter to build
    #[serde(alias = "agent_adapter_class")]
    pub adapter: String,

    /// Construction parameters handed to the adapter factory untouched
    #[serde(default, alias = "agent_config", deserialize_with = "null_as_default")]
    pub adapter_config: AdapterParams,

    /// Local path or URI of the JSONL dataset
    pub dataset_path: String,

    /// Canonical field name to dataset field name
    #[serde(default)]
    pub column_mapping: ColumnMapping,

    /// Metrics in report order
    #[serde(default)]
    pub metrics: Vec<MetricSpec>,

    #[serde(default = "default_experiment_name")]
    pub experiment_name: String,

    #[serde(default = "default_run_name_prefix")]
    pub run_name_prefix: String,

    /// What an adapter failure does to the run
    #[serde(default)]
    pub failure_policy: FailurePolicy,

    /// Upper bound on in-flight adapter calls
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// Per-call adapter timeout
    #[serde(default)]
    pub invocation_timeout_secs: Option<u64>,

    /// Delegated-metric client settings
    #[serde(default)]
    pub scoring: ScoringSettings,

    /// Where to persist the sealed result as JSON
    #[serde(default)]
    pub output_path: Option<String>,

    /// Directory of the file this configuration was loaded from
    #[serde(skip)]
    pub base_dir: Option<PathBuf>,
}

fn default_experiment_name() -> String {
    DEFAULT_EXPERIMENT_NAME.to_string()
}

fn default_run_name_prefix() -> String {
    DEFAULT_RUN_NAME_PREFIX.to_string()
}

fn default_max_concurrency() -> usize {
    1
}

fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Supported configuration file formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Yaml,
    Toml,
    Json,
}

impl ConfigFormat {
    pub fn from_path(path: &Path) -> Result<Self> {
        let extension =
            path.extension().and_then(|e| e.to_str()).map(str::to_ascii_lowercase).unwrap_or_default();
        match extension.as_str() {
            "yaml" | "yml" => Ok(Self::Yaml),
            "toml" => Ok(Self::Toml),
            "json" => Ok(Self::Json),
            other => Err(EvalError::Config(format!(
                "unsupported configuration format '{}' for '{}' (expected .yaml, .yml, .toml or .json)",
                other,
                path.display()
            ))),
        }
    }
}

impl EvaluationConfig {
    /// Read, parse and validate a configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let format = ConfigFormat::from_path(path)?;
        let content = std::fs::read_to_string(path).map_err(|e| {
            EvalError::Config(format!("cannot read configuration file '{}': {}", path.display(), e))
        })?;

        let mut config = Self::parse(&content, format)?;
        config.base_dir = path.parent().map(Path::to_path_buf);
        config.validate()?;
        Ok(config)
    }

    /// Parse without validating.
    pub fn parse(content: &str, format: ConfigFormat) -> Result<Self> {
        let parsed = match format {
            ConfigFormat::Yaml => serde_yaml::from_str(content).map_err(|e| e.to_string()),
            ConfigFormat::Toml => toml::from_str(content).map_err(|e| e.to_string()),
            ConfigFormat::Json => serde_json::from_str(content).map_err(|e| e.to_string()),
        };
        parsed.map_err(|e| EvalError::Config(format!("malformed configuration: {}", e)))
    }

    /// Check everything that can be checked without touching the network
    /// or the registries.
    pub fn validate(&self) -> Result<()> {
        if self.adapter.trim().is_empty() {
            return Err(EvalError::Config("'adapter' must not be empty".to_string()));
        }
        if self.dataset_path.trim().is_empty() {
            return Err(EvalError::Config("'dataset_path' must not be empty".to_string()));
        }
        if self.metrics.is_empty() {
            return Err(EvalError::Config("at least one metric must be configured".to_string()));
        }
        if self.max_concurrency == 0 {
            return Err(EvalError::Config("'max_concurrency' must be at least 1".to_string()));
        }
        if self.invocation_timeout_secs == Some(0) {
            return Err(EvalError::Config(
                "'invocation_timeout_secs' must be greater than zero".to_string(),
            ));
        }
        if self.scoring.timeout_secs == 0 {
            return Err(EvalError::Config(
                "'scoring.timeout_secs' must be greater than zero".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for spec in &self.metrics {
            let name = spec.name();
            if name.trim().is_empty() {
                return Err(EvalError::Config("metric names must not be empty".to_string()));
            }
            if !seen.insert(name) {
                return Err(EvalError::Config(format!("metric '{}' is configured twice", name)));
            }
        }

        self.column_mapping.validate()
    }

    pub fn invocation_timeout(&self) -> Option<Duration> {
        self.invocation_timeout_secs.map(Duration::from_secs)
    }

    /// Resolve a path from the configuration against the configuration
    /// file's directory.
    pub fn resolve_path(&self, raw: &str) -> PathBuf {
        let path = PathBuf::from(raw);
        match &self.base_dir {
            Some(base) if path.is_relative() => base.join(path),
            _ => path,
        }
    }

    /// `{prefix}-{YYYYmmdd-HHMMSS}-{first four characters of the run id}`
    pub fn run_name(&self, started_at: DateTime<Utc>, run_id: &Uuid) -> String {
        let short_id: String = run_id.to_string().chars().take(4).collect();
        format!("{}-{}-{}", self.run_name_prefix, started_at.format("%Y%m%d-%H%M%S"), short_id)
    }

    /// Flatten the configuration into the parameters recorded alongside a
    /// run. Nested values are rendered as JSON; secrets are masked.
    pub fn tracking_params(&self, run_id: &Uuid) -> BTreeMap<String, String> {
        let mut params = BTreeMap::new();
        params.insert("adapter".to_string(), self.adapter.clone());
        for (key, value) in &self.adapter_config {
            params.insert(format!("adapter_config.{}", key), param_value(key, value));
        }
        params.insert("dataset_path".to_string(), self.dataset_path.clone());
        if !self.column_mapping.is_empty() {
            params.insert(
                "column_mapping".to_string(),
                serde_json::to_string(&self.column_mapping).unwrap_or_default(),
            );
        }
        let metric_names: Vec<&str> = self.metrics.iter().map(MetricSpec::name).collect();
        params.insert("metrics".to_string(), metric_names.join(","));
        params.insert("experiment_name".to_string(), self.experiment_name.clone());
        params.insert("run_name_prefix".to_string(), self.run_name_prefix.clone());
        params.insert("failure_policy".to_string(), self.failure_policy.as_str().to_string());
        params.insert("max_concurrency".to_string(), self.max_concurrency.to_string());
        if let Some(secs) = self.invocation_timeout_secs {
            params.insert("invocation_timeout_secs".to_string(), secs.to_string());
        }
        params.insert("eval_run_id".to_string(), run_id.to_string());
        params
    }
}

fn is_sensitive(key: &str) -> bool {
    let key = key.to_ascii_lowercase();
    SENSITIVE_KEY_PARTS.iter().any(|part| key.contains(part))
}

fn param_value(key: &str, value: &Value) -> String {
    if is_sensitive(key) {
        return REDACTED.to_string();
    }
    match value {
        Value::String(s) => s.clone(),
        Value::Object(map) => {
            let masked: Map<String, Value> = map
                .iter()
                .map(|(k, v)| {
                    let v = if is_sensitive(k) { Value::String(REDACTED.to_string()) } else { v.clone() };
                    (k.clone(), v)
                })
                .collect();
            Value::Object(masked).to_string()
        }
        other => other.to_string(),
    }
}

/// A metric entry: either a bare name or a structured definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetricSpec {
    Name(String),
    Detailed(MetricDefinition),
}

impl MetricSpec {
    pub fn name(&self) -> &str {
        match self {
            MetricSpec::Name(name) => name,
            MetricSpec::Detailed(def) => &def.name,
        }
    }
}

impl From<&str> for MetricSpec {
    fn from(name: &str) -> Self {
        MetricSpec::Name(name.to_string())
    }
}

/// Structured metric entry
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricDefinition {
    pub name: String,

    /// `computation`, `delegated`, `rubric`, `custom_function` or `custom`
    #[serde(default, rename = "type", alias = "kind", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,

    /// Registry key of a local scorer (defaults to `name`)
    #[serde(default, alias = "custom_function_path", skip_serializing_if = "Option::is_none")]
    pub scorer: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub predefined_spec_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metric_spec_parameters: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<Value>,

    /// Free-form parameters forwarded to the scoring backend
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub params: Map<String, Value>,
}

impl MetricDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), ..Default::default() }
    }

    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = Some(kind.into());
        self
    }

    pub fn with_scorer(mut self, scorer: impl Into<String>) -> Self {
        self.scorer = Some(scorer.into());
        self
    }

    /// `params` plus the rubric fields, as sent to the scoring backend.
    pub fn backend_params(&self) -> Map<String, Value> {
        let mut params = self.params.clone();
        if let Some(spec) = &self.predefined_spec_name {
            params.insert("predefined_spec_name".to_string(), Value::String(spec.clone()));
        }
        if let Some(spec_params) = &self.metric_spec_parameters {
            params.insert("metric_spec_parameters".to_string(), spec_params.clone());
        }
        if let Some(version) = &self.version {
            params.insert("version".to_string(), version.clone());
        }
        params
    }
}

/// Reaction to an adapter invocation error
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Record the failure on that record and move on
    #[default]
    #[serde(alias = "record")]
    Continue,
    /// Abort the run on the first failure
    #[serde(alias = "strict")]
    FailFast,
}

impl FailurePolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailurePolicy::Continue => "continue",
            FailurePolicy::FailFast => "fail_fast",
        }
    }
}

/// Delegated-metric client settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringSettings {
    /// Overrides `SCORING_ENDPOINT`
    pub endpoint: Option<String>,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for ScoringSettings {
    fn default() -> Self {
        Self {
            endpoint: None,
            timeout_secs: 60,
            max_retries: 3,
            initial_backoff_ms: 500,
            max_backoff_ms: 10_000,
        }
    }
}

impl ScoringSettings {
    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig::new(
            self.max_retries,
            Duration::from_millis(self.initial_backoff_ms),
            Duration::from_millis(self.max_backoff_ms),
        )
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Project and credentials for the delegated scoring backend, read once at
/// start-up and passed explicitly to whoever needs them.
#[derive(Clone, Default, PartialEq)]
pub struct ScoringCredentials {
    pub project_id: Option<String>,
    pub location: Option<String>,
    pub endpoint: Option<String>,
    pub api_token: Option<String>,
}

impl std::fmt::Debug for ScoringCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScoringCredentials")
            .field("project_id", &self.project_id)
            .field("location", &self.location)
            .field("endpoint", &self.endpoint)
            .field("api_token", &self.api_token.as_ref().map(|_| REDACTED))
            .finish()
    }
}

impl ScoringCredentials {
    pub fn new(project_id: impl Into<String>, location: impl Into<String>) -> Self {
        Self {
            project_id: Some(project_id.into()),
            location: Some(location.into()),
            ..Default::default()
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    pub fn with_api_token(mut self, token: impl Into<String>) -> Self {
        self.api_token = Some(token.into());
        self
    }

    /// Read from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read through an arbitrary lookup. Blank values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let read = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        Self {
            project_id: read(ENV_PROJECT_ID),
            location: read(ENV_REGION),
            endpoint: read(ENV_SCORING_ENDPOINT),
            api_token: read(ENV_SCORING_API_TOKEN),
        }
    }

    /// Project and region, or a configuration error naming what is missing.
    pub fn require_project(&self) -> Result<(&str, &str)> {
        match (self.project_id.as_deref(), self.location.as_deref()) {
            (Some(project), Some(location)) => Ok((project, location)),
            (project, location) => {
                let mut missing = Vec::new();
                if project.is_none() {
                    missing.push(ENV_PROJECT_ID);
                }
                if location.is_none() {
                    missing.push(ENV_REGION);
                }
                Err(EvalError::Config(format!(
                    "delegated metrics need {} to be set",
                    missing.join(" and ")
                )))
            }
        }
    }
}
