//! Record, response and metric types shared by every crate in the workspace.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Arguments passed to a tool, keyed by parameter name.
pub type ToolInput = Map<String, Value>;

/// A single tool invocation in a trajectory.
///
/// Equality compares `tool_name` and `tool_input` only. Inputs are compared
/// as mappings, so key order is irrelevant, and numbers compare by value
/// (`1` equals `1.0`). `tool_output` is carried for reporting and never
/// takes part in comparisons.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub tool_name: String,
    #[serde(default, deserialize_with = "deserialize_tool_input")]
    pub tool_input: ToolInput,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_output: Option<Value>,
}

impl ToolCall {
    pub fn new(tool_name: impl Into<String>) -> Self {
        Self { tool_name: tool_name.into(), tool_input: Map::new(), tool_output: None }
    }

    /// Replace the input mapping. A non-object value is stored under `input`.
    pub fn with_input(mut self, input: Value) -> Self {
        self.tool_input = match input {
            Value::Object(map) => map,
            other => {
                let mut map = Map::new();
                map.insert("input".to_string(), other);
                map
            }
        };
        self
    }

    pub fn with_arg(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.tool_input.insert(key.into(), value.into());
        self
    }

    pub fn with_output(mut self, output: Value) -> Self {
        self.tool_output = Some(output);
        self
    }
}

impl PartialEq for ToolCall {
    fn eq(&self, other: &Self) -> bool {
        self.tool_name == other.tool_name && inputs_equal(&self.tool_input, &other.tool_input)
    }
}

/// Compare two tool inputs as unordered mappings.
pub fn inputs_equal(a: &ToolInput, b: &ToolInput) -> bool {
    a.len() == b.len() && a.iter().all(|(key, value)| b.get(key).is_some_and(|v| values_equal(value, v)))
}

/// Structural JSON equality with numeric comparison by value.
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        // Integers compare exactly; f64 is only used when a float is involved.
        (Value::Number(x), Value::Number(y)) if !x.is_f64() && !y.is_f64() => x == y,
        (Value::Number(x), Value::Number(y)) => match (x.as_f64(), y.as_f64()) {
            (Some(x), Some(y)) => x == y,
            _ => false,
        },
        (Value::Array(x), Value::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(a, b)| values_equal(a, b))
        }
        (Value::Object(x), Value::Object(y)) => inputs_equal(x, y),
        _ => a == b,
    }
}

/// Normalise a raw `tool_input` value into a mapping.
///
/// Objects pass through, `null` becomes an empty mapping, and a string is
/// parsed as a JSON object when possible, otherwise stored under `input`.
pub fn tool_input_from_value(value: Value) -> std::result::Result<ToolInput, String> {
    match value {
        Value::Object(map) => Ok(map),
        Value::Null => Ok(Map::new()),
        Value::String(raw) => match serde_json::from_str::<Value>(&raw) {
            Ok(Value::Object(map)) => Ok(map),
            _ => {
                let mut map = Map::new();
                map.insert("input".to_string(), Value::String(raw));
                Ok(map)
            }
        },
        Value::Bool(_) => Err("tool_input must be an object, got a boolean".to_string()),
        Value::Number(_) => Err("tool_input must be an object, got a number".to_string()),
        Value::Array(_) => Err("tool_input must be an object, got an array".to_string()),
    }
}

fn deserialize_tool_input<'de, D>(deserializer: D) -> std::result::Result<ToolInput, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    tool_input_from_value(value).map_err(serde::de::Error::custom)
}

fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// What an adapter returns for one prompt.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentResponse {
    #[serde(default, deserialize_with = "null_as_default")]
    pub actual_response: String,
    #[serde(default, alias = "predicted_trajectory", deserialize_with = "null_as_default")]
    pub actual_trajectory: Vec<ToolCall>,
}

impl AgentResponse {
    pub fn text(actual_response: impl Into<String>) -> Self {
        Self { actual_response: actual_response.into(), actual_trajectory: Vec::new() }
    }

    pub fn with_trajectory(mut self, trajectory: Vec<ToolCall>) -> Self {
        self.actual_trajectory = trajectory;
        self
    }
}

/// One golden record: prompt, reference answer and reference trajectory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetRecord {
    pub prompt: String,
    pub reference: String,
    #[serde(default)]
    pub reference_trajectory: Vec<ToolCall>,
}

impl DatasetRecord {
    pub fn new(prompt: impl Into<String>, reference: impl Into<String>) -> Self {
        Self { prompt: prompt.into(), reference: reference.into(), reference_trajectory: Vec::new() }
    }

    pub fn with_reference_trajectory(mut self, trajectory: Vec<ToolCall>) -> Self {
        self.reference_trajectory = trajectory;
        self
    }
}

/// A per-record score. Boolean metrics aggregate to a pass rate, numeric
/// metrics to a mean.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetricValue {
    Bool(bool),
    Number(f64),
}

impl MetricValue {
    pub fn as_f64(&self) -> f64 {
        match self {
            MetricValue::Bool(true) => 1.0,
            MetricValue::Bool(false) => 0.0,
            MetricValue::Number(n) => *n,
        }
    }

    pub fn is_bool(&self) -> bool {
        matches!(self, MetricValue::Bool(_))
    }
}

impl From<bool> for MetricValue {
    fn from(value: bool) -> Self {
        MetricValue::Bool(value)
    }
}

impl From<f64> for MetricValue {
    fn from(value: f64) -> Self {
        MetricValue::Number(value)
    }
}

impl std::fmt::Display for MetricValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MetricValue::Bool(b) => write!(f, "{}", b),
            MetricValue::Number(n) => write!(f, "{:.3}", n),
        }
    }
}

/// Outcome of one metric on one record.
///
/// `failed` distinguishes "could not be scored" from a legitimate zero or
/// `false`. A failed result never carries a value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricResult {
    pub metric: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<MetricValue>,
    #[serde(default)]
    pub failed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl MetricResult {
    pub fn scored(metric: impl Into<String>, value: impl Into<MetricValue>) -> Self {
        Self { metric: metric.into(), value: Some(value.into()), failed: false, error: None }
    }

    pub fn failure(metric: impl Into<String>, error: impl Into<String>) -> Self {
        Self { metric: metric.into(), value: None, failed: true, error: Some(error.into()) }
    }

    pub fn is_scored(&self) -> bool {
        !self.failed && self.value.is_some()
    }
}
