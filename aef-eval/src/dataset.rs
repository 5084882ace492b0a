//! Golden dataset loading
//!
//! Datasets are newline-delimited JSON. Each line is projected onto a
//! [`DatasetRecord`] through a [`ColumnMapping`]. Fetching the raw bytes is
//! the job of a [`DatasetStore`], so remote object stores can be plugged in
//! without this module knowing about them.

use aef_core::{DatasetRecord, EvalError, Result, ToolCall};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

pub const PROMPT_FIELD: &str = "prompt";
pub const REFERENCE_FIELD: &str = "reference";
pub const REFERENCE_TRAJECTORY_FIELD: &str = "reference_trajectory";

const CANONICAL_FIELDS: [&str; 3] = [PROMPT_FIELD, REFERENCE_FIELD, REFERENCE_TRAJECTORY_FIELD];

/// Maps canonical field names onto the names a dataset actually uses.
/// Unmapped fields keep their canonical name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ColumnMapping(BTreeMap<String, String>);

impl ColumnMapping {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, canonical: impl Into<String>, field: impl Into<String>) -> Self {
        self.0.insert(canonical.into(), field.into());
        self
    }

    pub fn field_for<'a>(&'a self, canonical: &'a str) -> &'a str {
        self.0.get(canonical).map(String::as_str).unwrap_or(canonical)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn validate(&self) -> Result<()> {
        for (canonical, field) in &self.0 {
            if !CANONICAL_FIELDS.contains(&canonical.as_str()) {
                return Err(EvalError::Config(format!(
                    "column_mapping key '{}' is not one of {}",
                    canonical,
                    CANONICAL_FIELDS.join(", ")
                )));
            }
            if field.trim().is_empty() {
                return Err(EvalError::Config(format!(
                    "column_mapping for '{}' must name a field",
                    canonical
                )));
            }
        }
        Ok(())
    }
}

/// Parse JSONL content into records.
///
/// Line numbers in errors are 1-based and count blank lines, so they match
/// what an editor shows.
pub fn parse_records(content: &str, mapping: &ColumnMapping) -> Result<Vec<DatasetRecord>> {
    let mut records = Vec::new();

    for (offset, raw_line) in content.lines().enumerate() {
        let line = offset + 1;
        let text = if offset == 0 { raw_line.trim_start_matches('\u{feff}') } else { raw_line };
        let text = text.trim();
        if text.is_empty() {
            continue;
        }

        let value: Value = serde_json::from_str(text)
            .map_err(|e| EvalError::DatasetFormat { line, message: e.to_string() })?;
        let Value::Object(object) = value else {
            return Err(EvalError::DatasetFormat {
                line,
                message: "expected a JSON object".to_string(),
            });
        };

        records.push(project_record(&object, mapping, line)?);
    }

    if records.is_empty() {
        return Err(EvalError::Dataset("dataset contains no records".to_string()));
    }
    Ok(records)
}

fn project_record(
    object: &Map<String, Value>,
    mapping: &ColumnMapping,
    line: usize,
) -> Result<DatasetRecord> {
    let prompt = required_text(object, PROMPT_FIELD, mapping, line)?;
    let reference = required_text(object, REFERENCE_FIELD, mapping, line)?;

    let trajectory_field = mapping.field_for(REFERENCE_TRAJECTORY_FIELD);
    let reference_trajectory = match object.get(trajectory_field) {
        None | Some(Value::Null) => Vec::new(),
        Some(value) => serde_json::from_value::<Vec<ToolCall>>(value.clone()).map_err(|e| {
            EvalError::DatasetSchema {
                line,
                message: format!("field '{}' is not a valid trajectory: {}", trajectory_field, e),
            }
        })?,
    };

    Ok(DatasetRecord { prompt, reference, reference_trajectory })
}

fn required_text(
    object: &Map<String, Value>,
    canonical: &str,
    mapping: &ColumnMapping,
    line: usize,
) -> Result<String> {
    let field = mapping.field_for(canonical);
    let schema_error =
        |message: String| EvalError::DatasetSchema { line, message };

    match object.get(field) {
        None | Some(Value::Null) => Err(schema_error(missing_message(canonical, field))),
        Some(Value::String(s)) if s.trim().is_empty() => {
            Err(schema_error(format!("field '{}' must not be empty", field)))
        }
        Some(Value::String(s)) => Ok(s.clone()),
        Some(_) => Err(schema_error(format!("field '{}' must be a string", field))),
    }
}

fn missing_message(canonical: &str, field: &str) -> String {
    if canonical == field {
        format!("missing required field '{}'", field)
    } else {
        format!("missing required field '{}' (mapped from '{}')", field, canonical)
    }
}

/// Where a dataset lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatasetLocation {
    Local(PathBuf),
    Remote { scheme: String, uri: String },
}

impl DatasetLocation {
    /// Parse a configured location. Relative local paths are joined onto
    /// `base_dir`; `file://` URIs are local.
    pub fn parse(raw: &str, base_dir: Option<&Path>) -> Result<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(EvalError::Config("dataset location is empty".to_string()));
        }

        if let Some((scheme, rest)) = raw.split_once("://") {
            let valid = !scheme.is_empty()
                && scheme.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'));
            if !valid {
                return Err(EvalError::Config(format!("invalid dataset URI '{}'", raw)));
            }
            let scheme = scheme.to_ascii_lowercase();
            if scheme == "file" {
                return Ok(Self::Local(PathBuf::from(rest)));
            }
            return Ok(Self::Remote { scheme, uri: raw.to_string() });
        }

        let path = PathBuf::from(raw);
        let path = match base_dir {
            Some(base) if path.is_relative() => base.join(path),
            _ => path,
        };
        Ok(Self::Local(path))
    }

    pub fn scheme(&self) -> &str {
        match self {
            Self::Local(_) => "file",
            Self::Remote { scheme, .. } => scheme,
        }
    }
}

impl fmt::Display for DatasetLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local(path) => write!(f, "{}", path.display()),
            Self::Remote { uri, .. } => f.write_str(uri),
        }
    }
}

/// Storage access for dataset content.
#[async_trait]
pub trait DatasetStore: Send + Sync {
    fn supports(&self, location: &DatasetLocation) -> bool;

    async fn fetch(&self, location: &DatasetLocation) -> Result<String>;
}

/// Local filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalStore;

#[async_trait]
impl DatasetStore for LocalStore {
    fn supports(&self, location: &DatasetLocation) -> bool {
        matches!(location, DatasetLocation::Local(_))
    }

    async fn fetch(&self, location: &DatasetLocation) -> Result<String> {
        let DatasetLocation::Local(path) = location else {
            return Err(EvalError::Dataset(format!("not a local path: {}", location)));
        };
        tokio::fs::read_to_string(path)
            .await
            .map_err(|e| EvalError::Dataset(format!("cannot read '{}': {}", path.display(), e)))
    }
}

/// Plain HTTP(S) GET.
#[derive(Debug, Clone)]
pub struct HttpStore {
    timeout: Duration,
}

impl Default for HttpStore {
    fn default() -> Self {
        Self { timeout: Duration::from_secs(60) }
    }
}

impl HttpStore {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl DatasetStore for HttpStore {
    fn supports(&self, location: &DatasetLocation) -> bool {
        matches!(location.scheme(), "http" | "https")
    }

    async fn fetch(&self, location: &DatasetLocation) -> Result<String> {
        let client = reqwest::Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|e| EvalError::Dataset(format!("failed to build HTTP client: {}", e)))?;

        let url = location.to_string();
        let response = client
            .get(&url)
            .send()
            .await
            .map_err(|e| EvalError::Dataset(format!("cannot fetch '{}': {}", url, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(EvalError::Dataset(format!("fetching '{}' returned HTTP {}", url, status)));
        }

        response
            .text()
            .await
            .map_err(|e| EvalError::Dataset(format!("cannot read body of '{}': {}", url, e)))
    }
}

/// The stores every run gets: local files and HTTP(S).
pub fn default_stores() -> Vec<Arc<dyn DatasetStore>> {
    vec![Arc::new(LocalStore), Arc::new(HttpStore::default())]
}

/// Fetch and parse a dataset with the first store that handles its scheme.
pub async fn load_dataset(
    stores: &[Arc<dyn DatasetStore>],
    location: &DatasetLocation,
    mapping: &ColumnMapping,
) -> Result<Vec<DatasetRecord>> {
    let store = stores.iter().find(|store| store.supports(location)).ok_or_else(|| {
        EvalError::Config(format!(
            "no dataset store handles '{}' locations ({}); supply one to the runner",
            location.scheme(),
            location
        ))
    })?;

    let content = store.fetch(location).await?;
    let records = parse_records(&content, mapping)?;
    aef_telemetry::debug!(location = %location, records = records.len(), "Dataset loaded");
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal_records() {
        let content = r#"{"prompt":"2+2?","reference":"4","reference_trajectory":[]}

{"prompt":"hi","reference":"hello"}
"#;
        let records = parse_records(content, &ColumnMapping::new()).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0], DatasetRecord::new("2+2?", "4"));
        assert!(records[1].reference_trajectory.is_empty());
    }

    #[test]
    fn test_trajectory_with_string_input() {
        let content = r#"{"prompt":"p","reference":"r","reference_trajectory":[{"tool_name":"search","tool_input":"{\"q\":\"x\"}","tool_output":"ok"}]}"#;
        let records = parse_records(content, &ColumnMapping::new()).unwrap();
        assert_eq!(records[0].reference_trajectory, vec![ToolCall::new("search").with_arg("q", "x")]);
    }

    #[test]
    fn test_format_error_names_physical_line() {
        let content = "{\"prompt\":\"a\",\"reference\":\"b\"}\n\n{not json}\n";
        match parse_records(content, &ColumnMapping::new()) {
            Err(EvalError::DatasetFormat { line, .. }) => assert_eq!(line, 3),
            other => panic!("unexpected: {:?}", other),
        }

        match parse_records("[1,2]", &ColumnMapping::new()) {
            Err(EvalError::DatasetFormat { line: 1, .. }) => {}
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_schema_errors() {
        let cases = [
            r#"{"reference":"b"}"#,
            r#"{"prompt":"","reference":"b"}"#,
            r#"{"prompt":"a","reference":7}"#,
            r#"{"prompt":"a","reference":"b","reference_trajectory":{"tool_name":"x"}}"#,
            r#"{"prompt":"a","reference":"b","reference_trajectory":[{"tool_input":{}}]}"#,
        ];
        for case in cases {
            let err = parse_records(case, &ColumnMapping::new()).unwrap_err();
            assert!(matches!(err, EvalError::DatasetSchema { line: 1, .. }), "{}: {:?}", case, err);
        }
    }

    #[test]
    fn test_mapped_field_missing_mentions_both_names() {
        let mapping = ColumnMapping::new().with("reference", "answer");
        let err = parse_records(r#"{"prompt":"a","reference":"b"}"#, &mapping).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("'answer'"), "{}", message);
        assert!(message.contains("'reference'"), "{}", message);
    }

    #[test]
    fn test_empty_dataset_rejected() {
        assert!(matches!(
            parse_records("\n  \n", &ColumnMapping::new()),
            Err(EvalError::Dataset(_))
        ));
    }

    #[test]
    fn test_mapping_validation() {
        assert!(ColumnMapping::new().with("reference", "answer").validate().is_ok());
        assert!(ColumnMapping::new().with("question", "q").validate().is_err());
        assert!(ColumnMapping::new().with("prompt", "").validate().is_err());
    }

    #[test]
    fn test_location_parsing() {
        let base = Path::new("/configs");
        assert_eq!(
            DatasetLocation::parse("data.jsonl", Some(base)).unwrap(),
            DatasetLocation::Local(PathBuf::from("/configs/data.jsonl"))
        );
        assert_eq!(
            DatasetLocation::parse("file:///tmp/data.jsonl", Some(base)).unwrap(),
            DatasetLocation::Local(PathBuf::from("/tmp/data.jsonl"))
        );
        let remote = DatasetLocation::parse("gs://bucket/data.jsonl", Some(base)).unwrap();
        assert_eq!(remote.scheme(), "gs");
        assert_eq!(remote.to_string(), "gs://bucket/data.jsonl");
        assert!(DatasetLocation::parse("", None).is_err());
    }

    #[tokio::test]
    async fn test_unsupported_scheme_is_config_error() {
        let location = DatasetLocation::parse("gs://bucket/data.jsonl", None).unwrap();
        let err = load_dataset(&default_stores(), &location, &ColumnMapping::new()).await.unwrap_err();
        assert!(matches!(err, EvalError::Config(ref m) if m.contains("'gs'")), "{:?}", err);
    }

    #[tokio::test]
    async fn test_local_store_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("golden.jsonl");
        std::fs::write(&path, "{\"prompt\":\"a\",\"reference\":\"b\"}\n").unwrap();

        let location = DatasetLocation::Local(path);
        let records = load_dataset(&default_stores(), &location, &ColumnMapping::new()).await.unwrap();
        assert_eq!(records, vec![DatasetRecord::new("a", "b")]);

        let missing = DatasetLocation::Local(dir.path().join("missing.jsonl"));
        let err = load_dataset(&default_stores(), &missing, &ColumnMapping::new()).await.unwrap_err();
        assert!(matches!(err, EvalError::Dataset(_)));
    }
}
