//! Span helpers for evaluation runs
//!
//! Provides pre-configured spans for the run, each adapter invocation and the
//! delegated scoring batch.

use tracing::Span;

/// Create the root span for one evaluation run
///
/// # Arguments
/// * `run_id` - Unique id of this run
/// * `experiment` - Experiment label the run belongs to
///
/// # Example
/// ```
/// use aef_telemetry::eval_run_span;
/// let span = eval_run_span("run-123", "default-agent-evals");
/// let _enter = span.enter();
/// ```
pub fn eval_run_span(run_id: &str, experiment: &str) -> Span {
    tracing::info_span!(
        "eval.run",
        eval.run_id = run_id,
        eval.experiment = experiment,
        otel.kind = "internal"
    )
}

/// Create a span for one adapter invocation
///
/// # Arguments
/// * `record_index` - Dataset index of the record being answered
/// * `adapter` - Name of the adapter serving the call
pub fn record_invoke_span(record_index: usize, adapter: &str) -> Span {
    tracing::info_span!(
        "eval.invoke",
        record.index = record_index,
        adapter.name = adapter,
        otel.kind = "client"
    )
}

/// Create a span for the delegated scoring batch
///
/// # Arguments
/// * `metrics` - Number of delegated metrics in the batch
/// * `instances` - Number of (response, reference) pairs submitted
pub fn scoring_batch_span(metrics: usize, instances: usize) -> Span {
    tracing::info_span!(
        "eval.scoring_batch",
        scoring.metrics = metrics,
        scoring.instances = instances,
        otel.kind = "client"
    )
}
