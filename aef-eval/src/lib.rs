//! # aef-eval
//!
//! Configuration-driven evaluation of conversational agents.
//!
//! ## Overview
//!
//! A run reads a configuration file, builds the configured adapter, loads a
//! JSONL golden dataset, asks the agent every prompt, scores the answers and
//! reports per-record and aggregate results.
//!
//! - [`EvaluationConfig`] - the run description (YAML, TOML or JSON)
//! - [`dataset`] - JSONL loading with column remapping and pluggable storage
//! - [`MetricRegistry`] - local scorers by key, including trajectory exact match
//! - [`ScoringClient`] - batched delegated scoring with timeout and retry
//! - [`EvaluationRunner`] - the state machine that ties it together
//! - [`Reporter`] - console and JSON file output
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use aef_eval::run_evaluation;
//!
//! #[tokio::main]
//! async fn main() -> aef_core::Result<()> {
//!     let result = run_evaluation("evals/shopping.yaml").await?;
//!     println!("{}", aef_eval::format_table(&result));
//!     Ok(())
//! }
//! ```
//!
//! Agent-specific adapters are registered by the caller:
//!
//! ```rust,ignore
//! let mut adapters = AdapterRegistry::with_builtins();
//! adapters.register_fn("shopping_agent", |params| {
//!     Ok(Box::new(ShoppingAdapter::new(params)?) as Box<dyn AgentAdapter>)
//! });
//! let runner = EvaluationRunner::builder().adapter_registry(adapters).build();
//! ```

pub mod adapters;
pub mod backend;
pub mod config;
pub mod dataset;
pub mod metrics;
pub mod report;
pub mod retry;
pub mod runner;
pub mod scoring;

pub use adapters::{AdapterRegistry, EchoAdapter, HttpAgentAdapter, ReplayAdapter};
pub use backend::{
    BatchRequest, BatchResponse, DelegatedMetric, HttpScoringBackend, InstanceScores,
    ScoringBackend, ScoringClient, ScoringInstance,
};
pub use config::{
    ConfigFormat, EvaluationConfig, FailurePolicy, MetricDefinition, MetricSpec,
    ScoringCredentials, ScoringSettings,
};
pub use dataset::{
    ColumnMapping, DatasetLocation, DatasetStore, HttpStore, LocalStore, load_dataset,
    parse_records,
};
pub use metrics::{LocalScorer, MetricPlan, MetricRegistry, ResolvedMetric};
pub use report::{
    Aggregation, ConsoleReporter, EvaluationResult, JsonFileReporter, MetricSummary,
    MultiReporter, RecordResult, Reporter, format_table,
};
pub use retry::RetryConfig;
pub use runner::{EvaluationRunner, RunState, RunnerBuilder, load_dotenv, run_evaluation};
pub use scoring::{first_divergence, trajectory_exact_match};

pub use aef_core::{
    AdapterFactory, AdapterParams, AgentAdapter, AgentResponse, DatasetRecord, EvalError,
    MetricResult, MetricValue, Result, ToolCall,
};
