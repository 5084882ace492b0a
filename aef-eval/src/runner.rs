//! Evaluation runner
//!
//! Drives one run through `Configured → Loading → Invoking → Scoring →
//! Aggregated → Reported`. Any fatal error moves the run to `Failed`.
//! Everything that can be resolved from the configuration alone (metrics,
//! scoring credentials, the adapter) is resolved before the dataset is read,
//! so a misconfigured run never calls the agent.

use crate::adapters::AdapterRegistry;
use crate::backend::{
    BatchRequest, HttpScoringBackend, ScoringBackend, ScoringClient, ScoringInstance,
};
use crate::config::{EvaluationConfig, FailurePolicy, ScoringCredentials};
use crate::dataset::{DatasetLocation, DatasetStore, default_stores, load_dataset};
use crate::metrics::{LocalScorer, MetricPlan, MetricRegistry};
use crate::report::{
    ConsoleReporter, EvaluationResult, JsonFileReporter, MultiReporter, RecordResult, Reporter,
};
use aef_core::{AgentAdapter, AgentResponse, DatasetRecord, EvalError, MetricResult, Result};
use aef_telemetry::{
    Instrument, debug, eval_run_span, info, record_invoke_span, scoring_batch_span, warn,
};
use chrono::Utc;
use futures::StreamExt;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Once};
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Where a run currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Configured,
    Loading,
    Invoking,
    Scoring,
    Aggregated,
    Reported,
    Failed,
}

impl RunState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunState::Configured => "configured",
            RunState::Loading => "loading",
            RunState::Invoking => "invoking",
            RunState::Scoring => "scoring",
            RunState::Aggregated => "aggregated",
            RunState::Reported => "reported",
            RunState::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Reported | RunState::Failed)
    }
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one adapter call; the error is kept as its message.
type Invocation = std::result::Result<AgentResponse, String>;

struct ScoringSetup {
    client: ScoringClient,
    project_id: String,
    location: String,
}

/// Runs evaluations against a fixed set of registries and collaborators.
pub struct EvaluationRunner {
    adapters: AdapterRegistry,
    metrics: MetricRegistry,
    stores: Vec<Arc<dyn DatasetStore>>,
    scoring_backend: Option<Arc<dyn ScoringBackend>>,
    credentials: ScoringCredentials,
    reporters: MultiReporter,
    cancellation: CancellationToken,
    state: watch::Sender<RunState>,
    // Runs on one runner are serialized so `state` tracks a single run.
    run_lock: tokio::sync::Mutex<()>,
}

impl EvaluationRunner {
    pub fn builder() -> RunnerBuilder {
        RunnerBuilder::default()
    }

    /// State of the current or most recent run. Concurrent calls to
    /// [`run`](Self::run) on the same runner wait for each other.
    pub fn state(&self) -> RunState {
        *self.state.borrow()
    }

    /// Watch state transitions as they happen.
    pub fn subscribe(&self) -> watch::Receiver<RunState> {
        self.state.subscribe()
    }

    /// Token that aborts the run between records when cancelled.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    /// Load the configuration file at `config_path` and run it.
    pub async fn run(&self, config_path: impl AsRef<Path>) -> Result<EvaluationResult> {
        let _guard = self.run_lock.lock().await;
        self.transition(RunState::Configured);
        match EvaluationConfig::load(config_path) {
            Ok(config) => self.run_locked(config).await,
            Err(e) => Err(self.fail(e)),
        }
    }

    /// Run an already parsed configuration.
    pub async fn run_config(&self, config: EvaluationConfig) -> Result<EvaluationResult> {
        let _guard = self.run_lock.lock().await;
        self.transition(RunState::Configured);
        self.run_locked(config).await
    }

    async fn run_locked(&self, config: EvaluationConfig) -> Result<EvaluationResult> {
        let run_id = Uuid::new_v4();
        let span = eval_run_span(&run_id.to_string(), &config.experiment_name);

        match self.execute(config, run_id).instrument(span).await {
            Ok(result) => Ok(result),
            Err(e) => Err(self.fail(e)),
        }
    }

    fn transition(&self, next: RunState) {
        let previous = self.state.send_replace(next);
        debug!(from = %previous, to = %next, "Run state changed");
    }

    fn fail(&self, error: EvalError) -> EvalError {
        self.transition(RunState::Failed);
        aef_telemetry::error!(error = %error, "Evaluation run failed");
        error
    }

    async fn execute(&self, config: EvaluationConfig, run_id: Uuid) -> Result<EvaluationResult> {
        config.validate()?;
        let started_at = Utc::now();
        let run_name = config.run_name(started_at, &run_id);

        let plan = self.metrics.resolve(&config.metrics)?;
        let scoring = self.prepare_scoring(&config, &plan)?;
        let location = DatasetLocation::parse(&config.dataset_path, config.base_dir.as_deref())?;
        let adapter = self.adapters.create(&config.adapter, &config.adapter_config).await?;
        info!(
            run_name = %run_name,
            adapter = adapter.name(),
            metrics = ?plan.names(),
            dataset = %location,
            "Evaluation run configured"
        );

        self.transition(RunState::Loading);
        let records = load_dataset(&self.stores, &location, &config.column_mapping).await?;

        self.transition(RunState::Invoking);
        let outcomes = self.invoke_all(adapter.as_ref(), &records, &config).await?;

        self.transition(RunState::Scoring);
        let results = self.score(&plan, scoring.as_ref(), records, outcomes).await?;

        self.transition(RunState::Aggregated);
        let result = EvaluationResult::seal(
            run_id.to_string(),
            run_name,
            config.experiment_name.clone(),
            started_at,
            config.tracking_params(&run_id),
            plan.aggregations(),
            results,
        );
        info!(
            records = result.total_records(),
            failed_invocations = result.failed_invocations(),
            "Evaluation run aggregated"
        );

        self.report(&config, &result).await?;
        self.transition(RunState::Reported);
        Ok(result)
    }

    /// Credentials are only required when some metric is delegated.
    fn prepare_scoring(
        &self,
        config: &EvaluationConfig,
        plan: &MetricPlan,
    ) -> Result<Option<ScoringSetup>> {
        if !plan.has_delegated() {
            return Ok(None);
        }

        let (project_id, location) = self.credentials.require_project()?;
        let backend: Arc<dyn ScoringBackend> = match &self.scoring_backend {
            Some(backend) => Arc::clone(backend),
            None => Arc::new(HttpScoringBackend::from_settings(&config.scoring, &self.credentials)?),
        };

        Ok(Some(ScoringSetup {
            client: ScoringClient::from_settings(backend, &config.scoring),
            project_id: project_id.to_string(),
            location: location.to_string(),
        }))
    }

    async fn invoke_all(
        &self,
        adapter: &dyn AgentAdapter,
        records: &[DatasetRecord],
        config: &EvaluationConfig,
    ) -> Result<Vec<Invocation>> {
        let concurrency = if adapter.supports_concurrent_calls() {
            config.max_concurrency
        } else {
            if config.max_concurrency > 1 {
                warn!(
                    adapter = adapter.name(),
                    requested = config.max_concurrency,
                    "Adapter does not support concurrent calls; invoking sequentially"
                );
            }
            1
        };
        let timeout = config.invocation_timeout();
        let cancellation = &self.cancellation;

        // `buffered` yields in submission order, so outcomes line up with records.
        let mut calls = futures::stream::iter(records.iter().enumerate())
            .map(move |(index, record)| async move {
                if cancellation.is_cancelled() {
                    return (index, None);
                }
                (index, Some(invoke_one(adapter, index, &record.prompt, timeout).await))
            })
            .buffered(concurrency);

        let mut outcomes = Vec::with_capacity(records.len());
        while let Some((index, outcome)) = calls.next().await {
            let Some(outcome) = outcome else {
                warn!(completed = outcomes.len(), "Evaluation run cancelled");
                return Err(EvalError::Cancelled { completed: outcomes.len() });
            };

            match outcome {
                Ok(response) => outcomes.push(Ok(response)),
                Err(e) if config.failure_policy == FailurePolicy::FailFast => {
                    return Err(e.at_record(index));
                }
                Err(e) => {
                    warn!(record = index, error = %e, "Adapter invocation failed; continuing");
                    outcomes.push(Err(e.to_string()));
                }
            }
        }
        Ok(outcomes)
    }

    async fn score(
        &self,
        plan: &MetricPlan,
        scoring: Option<&ScoringSetup>,
        records: Vec<DatasetRecord>,
        outcomes: Vec<Invocation>,
    ) -> Result<Vec<RecordResult>> {
        let names = plan.names();
        let mut results: Vec<RecordResult> = records
            .into_iter()
            .zip(outcomes)
            .enumerate()
            .map(|(index, (record, outcome))| {
                let mut metrics = BTreeMap::new();
                match &outcome {
                    Ok(response) => {
                        for (name, scorer) in plan.local() {
                            let result = score_local(name, scorer.as_ref(), response, &record, index);
                            metrics.insert(name.to_string(), result);
                        }
                    }
                    Err(message) => {
                        for name in &names {
                            let result = MetricResult::failure(
                                name.as_str(),
                                format!("adapter invocation failed: {}", message),
                            );
                            metrics.insert(name.clone(), result);
                        }
                    }
                }
                let (response, invocation_error) = match outcome {
                    Ok(response) => (Some(response), None),
                    Err(message) => (None, Some(message)),
                };
                RecordResult { index, record, response, invocation_error, metrics }
            })
            .collect();

        if let Some(setup) = scoring {
            self.score_delegated(plan, setup, &mut results).await?;
        }
        Ok(results)
    }

    /// One batch for every record that has a response. Batch positions are
    /// mapped back onto dataset indices.
    async fn score_delegated(
        &self,
        plan: &MetricPlan,
        setup: &ScoringSetup,
        results: &mut [RecordResult],
    ) -> Result<()> {
        let mut positions = Vec::new();
        let mut instances = Vec::new();
        for result in results.iter() {
            if let Some(response) = &result.response {
                instances.push(ScoringInstance {
                    index: instances.len(),
                    prompt: result.record.prompt.clone(),
                    response: response.actual_response.clone(),
                    reference: result.record.reference.clone(),
                });
                positions.push(result.index);
            }
        }
        if instances.is_empty() {
            return Ok(());
        }

        let request = BatchRequest {
            project_id: setup.project_id.clone(),
            location: setup.location.clone(),
            metrics: plan.delegated(),
            instances,
        };
        let span = scoring_batch_span(request.metrics.len(), request.instances.len());
        let scores = setup.client.score(&request).instrument(span).await?;

        for (cells, index) in scores.into_iter().zip(positions) {
            let Some(result) = results.get_mut(index) else { continue };
            for (name, cell) in cells {
                let metric = match cell {
                    Ok(value) => MetricResult::scored(name.as_str(), value),
                    Err(reason) => {
                        MetricResult::failure(name.as_str(), format!("scoring backend: {}", reason))
                    }
                };
                result.metrics.insert(name, metric);
            }
        }
        Ok(())
    }

    async fn report(&self, config: &EvaluationConfig, result: &EvaluationResult) -> Result<()> {
        self.reporters.report(result).await?;
        if let Some(output) = &config.output_path {
            JsonFileReporter::new(config.resolve_path(output)).report(result).await?;
        }
        Ok(())
    }
}

async fn invoke_one(
    adapter: &dyn AgentAdapter,
    index: usize,
    prompt: &str,
    timeout: Option<Duration>,
) -> Result<AgentResponse> {
    let span = record_invoke_span(index, adapter.name());
    async {
        let outcome = match timeout {
            Some(limit) => match tokio::time::timeout(limit, adapter.get_response(prompt)).await {
                Ok(outcome) => outcome,
                Err(_) => Err(EvalError::AdapterInvocation(format!(
                    "no response within {}s",
                    limit.as_secs_f64()
                ))),
            },
            None => adapter.get_response(prompt).await,
        };
        outcome.map_err(|e| match e {
            EvalError::AdapterInvocation(_) => e,
            other => EvalError::AdapterInvocation(other.to_string()),
        })
    }
    .instrument(span)
    .await
}

/// A scorer error only fails this metric on this record.
fn score_local(
    name: &str,
    scorer: &dyn LocalScorer,
    response: &AgentResponse,
    record: &DatasetRecord,
    index: usize,
) -> MetricResult {
    match scorer.score(response, record) {
        Ok(value) => MetricResult::scored(name, value),
        Err(e) => {
            let error = match e {
                EvalError::MetricComputation { .. } => e,
                other => EvalError::MetricComputation {
                    metric: name.to_string(),
                    message: other.to_string(),
                },
            };
            warn!(record = index, metric = name, error = %error, "Metric computation failed");
            MetricResult::failure(name, error.to_string())
        }
    }
}

/// Configures an [`EvaluationRunner`]
#[derive(Default)]
pub struct RunnerBuilder {
    adapters: Option<AdapterRegistry>,
    metrics: Option<MetricRegistry>,
    stores: Vec<Arc<dyn DatasetStore>>,
    scoring_backend: Option<Arc<dyn ScoringBackend>>,
    credentials: Option<ScoringCredentials>,
    reporters: MultiReporter,
    cancellation: Option<CancellationToken>,
}

impl RunnerBuilder {
    /// Defaults to [`AdapterRegistry::with_builtins`].
    pub fn adapter_registry(mut self, registry: AdapterRegistry) -> Self {
        self.adapters = Some(registry);
        self
    }

    /// Defaults to [`MetricRegistry::with_builtins`].
    pub fn metric_registry(mut self, registry: MetricRegistry) -> Self {
        self.metrics = Some(registry);
        self
    }

    /// Add a dataset store. Added stores are consulted before the built-in
    /// local and HTTP stores.
    pub fn dataset_store(mut self, store: Arc<dyn DatasetStore>) -> Self {
        self.stores.push(store);
        self
    }

    /// Use this backend for delegated metrics instead of the HTTP one.
    pub fn scoring_backend(mut self, backend: Arc<dyn ScoringBackend>) -> Self {
        self.scoring_backend = Some(backend);
        self
    }

    /// Defaults to [`ScoringCredentials::from_env`], read when the runner
    /// is built.
    pub fn credentials(mut self, credentials: ScoringCredentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Reporters run in the order they are added; the first failure stops
    /// the rest and fails the run.
    pub fn reporter(mut self, reporter: Arc<dyn Reporter>) -> Self {
        self.reporters.push(reporter);
        self
    }

    pub fn cancellation_token(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    pub fn build(self) -> EvaluationRunner {
        let mut stores = self.stores;
        stores.extend(default_stores());
        let (state, _) = watch::channel(RunState::Configured);

        EvaluationRunner {
            adapters: self.adapters.unwrap_or_default(),
            metrics: self.metrics.unwrap_or_default(),
            stores,
            scoring_backend: self.scoring_backend,
            credentials: self.credentials.unwrap_or_else(ScoringCredentials::from_env),
            reporters: self.reporters,
            cancellation: self.cancellation.unwrap_or_default(),
            state,
            run_lock: tokio::sync::Mutex::new(()),
        }
    }
}

static DOTENV: Once = Once::new();

/// Load `.env` from the working directory, once per process. A missing
/// file is fine.
pub fn load_dotenv() {
    DOTENV.call_once(|| {
        if let Err(e) = dotenvy::dotenv() {
            if !e.not_found() {
                warn!(error = %e, "Failed to load .env file");
            }
        }
    });
}

/// Run the configuration file at `config_path` with the built-in adapters
/// and metrics, credentials from the environment and a console report.
pub async fn run_evaluation(config_path: impl AsRef<Path>) -> Result<EvaluationResult> {
    load_dotenv();
    EvaluationRunner::builder().reporter(Arc::new(ConsoleReporter)).build().run(config_path).await
}
