//! Evaluation result reporting
//!
//! The sealed [`EvaluationResult`] is what a run produces. Reporters only
//! project it; nothing here changes a score.

use aef_core::{AgentResponse, DatasetRecord, EvalError, MetricResult, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

const PROMPT_COLUMN_WIDTH: usize = 40;

/// Everything one run produced. Read-only once sealed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationResult {
    run_id: String,
    run_name: String,
    experiment_name: String,
    started_at: DateTime<Utc>,
    completed_at: DateTime<Utc>,
    params: BTreeMap<String, String>,
    metric_names: Vec<String>,
    records: Vec<RecordResult>,
    summary: BTreeMap<String, MetricSummary>,
    failed_invocations: usize,
}

/// One dataset record and what happened to it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordResult {
    pub index: usize,
    pub record: DatasetRecord,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<AgentResponse>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invocation_error: Option<String>,
    pub metrics: BTreeMap<String, MetricResult>,
}

impl RecordResult {
    pub fn invocation_failed(&self) -> bool {
        self.invocation_error.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Aggregation {
    Mean,
    PassRate,
}

/// Aggregate of one metric over the records it could score
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSummary {
    pub aggregation: Aggregation,
    /// `None` when no record could be scored
    pub value: Option<f64>,
    pub scored: usize,
    pub failed: usize,
}

impl MetricSummary {
    /// Failed results are counted but kept out of the denominator.
    ///
    /// `declared` wins when given. Otherwise a metric whose scored values
    /// are all boolean aggregates to a pass rate.
    pub fn from_results<'a>(
        results: impl IntoIterator<Item = &'a MetricResult>,
        declared: Option<Aggregation>,
    ) -> Self {
        let mut sum = 0.0;
        let mut scored = 0;
        let mut failed = 0;
        let mut all_bool = true;

        for result in results {
            match (&result.value, result.failed) {
                (Some(value), false) => {
                    sum += value.as_f64();
                    scored += 1;
                    all_bool &= value.is_bool();
                }
                _ => failed += 1,
            }
        }

        let aggregation = declared.unwrap_or(if scored > 0 && all_bool {
            Aggregation::PassRate
        } else {
            Aggregation::Mean
        });
        let value = (scored > 0).then(|| sum / scored as f64);
        Self { aggregation, value, scored, failed }
    }
}

impl EvaluationResult {
    /// Compute the summary and freeze the result. `metrics` lists the metric
    /// names in configuration order with their declared aggregation.
    pub fn seal(
        run_id: String,
        run_name: String,
        experiment_name: String,
        started_at: DateTime<Utc>,
        params: BTreeMap<String, String>,
        metrics: Vec<(String, Option<Aggregation>)>,
        records: Vec<RecordResult>,
    ) -> Self {
        let summary = metrics
            .iter()
            .map(|(name, declared)| {
                let results = records.iter().filter_map(|r| r.metrics.get(name));
                (name.clone(), MetricSummary::from_results(results, *declared))
            })
            .collect();
        let metric_names = metrics.into_iter().map(|(name, _)| name).collect();
        let failed_invocations = records.iter().filter(|r| r.invocation_failed()).count();

        Self {
            run_id,
            run_name,
            experiment_name,
            started_at,
            completed_at: Utc::now(),
            params,
            metric_names,
            records,
            summary,
            failed_invocations,
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn run_name(&self) -> &str {
        &self.run_name
    }

    pub fn experiment_name(&self) -> &str {
        &self.experiment_name
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn completed_at(&self) -> DateTime<Utc> {
        self.completed_at
    }

    /// Flattened configuration recorded with the run
    pub fn params(&self) -> &BTreeMap<String, String> {
        &self.params
    }

    /// Metric names in configuration order
    pub fn metric_names(&self) -> &[String] {
        &self.metric_names
    }

    /// Per-record results in dataset order
    pub fn records(&self) -> &[RecordResult] {
        &self.records
    }

    pub fn summary(&self) -> &BTreeMap<String, MetricSummary> {
        &self.summary
    }

    /// Records whose adapter call failed
    pub fn failed_invocations(&self) -> usize {
        self.failed_invocations
    }

    pub fn total_records(&self) -> usize {
        self.records.len()
    }

    pub fn metric(&self, index: usize, name: &str) -> Option<&MetricResult> {
        self.records.get(index).and_then(|r| r.metrics.get(name))
    }
}

/// Render the per-record table followed by the summary block.
pub fn format_table(result: &EvaluationResult) -> String {
    let mut headers = vec!["#".to_string(), "prompt".to_string()];
    headers.extend(result.metric_names.iter().cloned());
    headers.push("status".to_string());

    let rows: Vec<Vec<String>> = result
        .records
        .iter()
        .map(|record| {
            let mut row = vec![record.index.to_string(), truncate(&record.record.prompt)];
            for name in &result.metric_names {
                row.push(match record.metrics.get(name) {
                    Some(MetricResult { value: Some(value), failed: false, .. }) => value.to_string(),
                    Some(_) => "FAILED".to_string(),
                    None => "-".to_string(),
                });
            }
            row.push(if record.invocation_failed() { "error" } else { "ok" }.to_string());
            row
        })
        .collect();

    let widths: Vec<usize> = (0..headers.len())
        .map(|column| {
            rows.iter()
                .map(|row| row[column].chars().count())
                .chain(std::iter::once(headers[column].chars().count()))
                .max()
                .unwrap_or(0)
        })
        .collect();

    let mut output = String::new();
    output.push_str(&format!("Run: {} ({})\n", result.run_name, result.experiment_name));
    output.push_str(&format!("Run id: {}\n\n", result.run_id));
    push_row(&mut output, &headers, &widths);
    let rule: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
    push_row(&mut output, &rule, &widths);
    for row in &rows {
        push_row(&mut output, row, &widths);
    }

    output.push_str(&format!(
        "\nSummary ({} records, {} failed invocations):\n",
        result.total_records(),
        result.failed_invocations
    ));
    for name in &result.metric_names {
        let Some(summary) = result.summary.get(name) else { continue };
        let value = match summary.value {
            Some(v) if summary.aggregation == Aggregation::PassRate => format!("{:.1}%", v * 100.0),
            Some(v) => format!("{:.3}", v),
            None => "n/a".to_string(),
        };
        let label = match summary.aggregation {
            Aggregation::Mean => "mean",
            Aggregation::PassRate => "pass rate",
        };
        output.push_str(&format!(
            "  {}: {} {} (scored {}, failed {})\n",
            name, label, value, summary.scored, summary.failed
        ));
    }
    output
}

fn push_row(output: &mut String, cells: &[String], widths: &[usize]) {
    let line: Vec<String> = cells
        .iter()
        .zip(widths)
        .map(|(cell, width)| {
            let pad = width.saturating_sub(cell.chars().count());
            format!("{}{}", cell, " ".repeat(pad))
        })
        .collect();
    output.push_str(line.join(" | ").trim_end());
    output.push('\n');
}

fn truncate(text: &str) -> String {
    let single_line = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if single_line.chars().count() <= PROMPT_COLUMN_WIDTH {
        return single_line;
    }
    let mut truncated: String = single_line.chars().take(PROMPT_COLUMN_WIDTH - 3).collect();
    truncated.push_str("...");
    truncated
}

/// Receives the sealed result at the end of a run.
#[async_trait]
pub trait Reporter: Send + Sync {
    async fn report(&self, result: &EvaluationResult) -> Result<()>;
}

/// Prints the table to stdout.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsoleReporter;

#[async_trait]
impl Reporter for ConsoleReporter {
    async fn report(&self, result: &EvaluationResult) -> Result<()> {
        println!("{}", format_table(result));
        Ok(())
    }
}

/// Writes the result as pretty JSON, creating parent directories.
#[derive(Debug, Clone)]
pub struct JsonFileReporter {
    path: PathBuf,
}

impl JsonFileReporter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl Reporter for JsonFileReporter {
    async fn report(&self, result: &EvaluationResult) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_string_pretty(result)?;
        tokio::fs::write(&self.path, json).await.map_err(|e| {
            EvalError::Io(std::io::Error::new(
                e.kind(),
                format!("cannot write report to '{}': {}", self.path.display(), e),
            ))
        })?;
        aef_telemetry::info!(path = %self.path.display(), "Evaluation report written");
        Ok(())
    }
}

/// Sends the result to several reporters in order, stopping at the first
/// failure.
#[derive(Default, Clone)]
pub struct MultiReporter {
    reporters: Vec<std::sync::Arc<dyn Reporter>>,
}

impl MultiReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, reporter: std::sync::Arc<dyn Reporter>) -> Self {
        self.push(reporter);
        self
    }

    pub fn push(&mut self, reporter: std::sync::Arc<dyn Reporter>) {
        self.reporters.push(reporter);
    }

    pub fn len(&self) -> usize {
        self.reporters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reporters.is_empty()
    }
}

#[async_trait]
impl Reporter for MultiReporter {
    async fn report(&self, result: &EvaluationResult) -> Result<()> {
        for reporter in &self.reporters {
            reporter.report(result).await?;
        }
        Ok(())
    }
}
