//! Metric registry
//!
//! Metric entries from the configuration are resolved once, before any
//! record is processed, into a [`MetricPlan`]. Local scorers come from an
//! explicit registry keyed by stable names; nothing is loaded dynamically.

use crate::backend::DelegatedMetric;
use crate::config::{MetricDefinition, MetricSpec};
use crate::report::Aggregation;
use crate::scoring::{
    RESPONSE_EXACT_MATCH, RESPONSE_TOKEN_JACCARD, TRAJECTORY_EXACT_MATCH,
    score_response_exact_match, score_response_token_jaccard, score_trajectory_exact_match,
};
use aef_core::{AgentResponse, DatasetRecord, EvalError, MetricValue, Result};
use aef_telemetry::warn;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

pub const KIND_COMPUTATION: &str = "computation";
pub const KIND_RUBRIC: &str = "rubric";

/// A metric computed in-process, per record.
pub trait LocalScorer: Send + Sync {
    fn score(&self, response: &AgentResponse, record: &DatasetRecord) -> Result<MetricValue>;
}

impl<F> LocalScorer for F
where
    F: Fn(&AgentResponse, &DatasetRecord) -> Result<MetricValue> + Send + Sync,
{
    fn score(&self, response: &AgentResponse, record: &DatasetRecord) -> Result<MetricValue> {
        self(response, record)
    }
}

/// A metric entry after resolution
#[derive(Clone)]
pub enum ResolvedMetric {
    Local { name: String, scorer: Arc<dyn LocalScorer>, aggregation: Option<Aggregation> },
    Delegated(DelegatedMetric),
}

impl ResolvedMetric {
    pub fn name(&self) -> &str {
        match self {
            ResolvedMetric::Local { name, .. } => name,
            ResolvedMetric::Delegated(metric) => &metric.name,
        }
    }

    pub fn is_delegated(&self) -> bool {
        matches!(self, ResolvedMetric::Delegated(_))
    }

    /// Declared aggregation. Delegated scores are always numeric; a local
    /// scorer registered without one is aggregated by the values it returns.
    pub fn aggregation(&self) -> Option<Aggregation> {
        match self {
            ResolvedMetric::Local { aggregation, .. } => *aggregation,
            ResolvedMetric::Delegated(_) => Some(Aggregation::Mean),
        }
    }
}

impl fmt::Debug for ResolvedMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolvedMetric::Local { name, .. } => f.debug_struct("Local").field("name", name).finish(),
            ResolvedMetric::Delegated(metric) => f.debug_tuple("Delegated").field(metric).finish(),
        }
    }
}

/// Resolved metrics in configuration order
#[derive(Debug, Clone, Default)]
pub struct MetricPlan {
    metrics: Vec<ResolvedMetric>,
}

impl MetricPlan {
    pub fn metrics(&self) -> &[ResolvedMetric] {
        &self.metrics
    }

    pub fn names(&self) -> Vec<String> {
        self.metrics.iter().map(|m| m.name().to_string()).collect()
    }

    /// Metric names in configuration order with their declared aggregation.
    pub fn aggregations(&self) -> Vec<(String, Option<Aggregation>)> {
        self.metrics.iter().map(|m| (m.name().to_string(), m.aggregation())).collect()
    }

    pub fn local(&self) -> impl Iterator<Item = (&str, &Arc<dyn LocalScorer>)> {
        self.metrics.iter().filter_map(|m| match m {
            ResolvedMetric::Local { name, scorer, .. } => Some((name.as_str(), scorer)),
            ResolvedMetric::Delegated(_) => None,
        })
    }

    pub fn delegated(&self) -> Vec<DelegatedMetric> {
        self.metrics
            .iter()
            .filter_map(|m| match m {
                ResolvedMetric::Delegated(metric) => Some(metric.clone()),
                ResolvedMetric::Local { .. } => None,
            })
            .collect()
    }

    pub fn has_delegated(&self) -> bool {
        self.metrics.iter().any(ResolvedMetric::is_delegated)
    }
}

/// Local scorers by key
#[derive(Clone)]
pub struct MetricRegistry {
    scorers: HashMap<String, Arc<dyn LocalScorer>>,
    aggregations: HashMap<String, Aggregation>,
}

impl MetricRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self { scorers: HashMap::new(), aggregations: HashMap::new() }
    }

    /// A registry holding the built-in local scorers.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register_with_aggregation(
            TRAJECTORY_EXACT_MATCH,
            Aggregation::PassRate,
            score_trajectory_exact_match,
        );
        registry.register_with_aggregation(
            RESPONSE_EXACT_MATCH,
            Aggregation::PassRate,
            score_response_exact_match,
        );
        registry.register_with_aggregation(
            RESPONSE_TOKEN_JACCARD,
            Aggregation::Mean,
            score_response_token_jaccard,
        );
        registry
    }

    /// Register a scorer, replacing any previous one under the same key.
    /// Its summary aggregation is taken from the values it returns.
    pub fn register(&mut self, key: impl Into<String>, scorer: impl LocalScorer + 'static) {
        let key = key.into();
        self.aggregations.remove(&key);
        self.scorers.insert(key, Arc::new(scorer));
    }

    /// Register a scorer whose summary is always computed as `aggregation`,
    /// even when no record could be scored.
    pub fn register_with_aggregation(
        &mut self,
        key: impl Into<String>,
        aggregation: Aggregation,
        scorer: impl LocalScorer + 'static,
    ) {
        let key = key.into();
        self.aggregations.insert(key.clone(), aggregation);
        self.scorers.insert(key, Arc::new(scorer));
    }

    pub fn contains(&self, key: &str) -> bool {
        self.scorers.contains_key(key)
    }

    /// Registered keys, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.scorers.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn get(&self, key: &str) -> Option<Arc<dyn LocalScorer>> {
        self.scorers.get(key).cloned()
    }

    /// Resolve every metric entry, failing on the first one that cannot be
    /// resolved.
    pub fn resolve(&self, specs: &[MetricSpec]) -> Result<MetricPlan> {
        let metrics = specs.iter().map(|spec| self.resolve_one(spec)).collect::<Result<Vec<_>>>()?;
        Ok(MetricPlan { metrics })
    }

    fn resolve_one(&self, spec: &MetricSpec) -> Result<ResolvedMetric> {
        match spec {
            MetricSpec::Name(name) => Ok(self.by_name(name)),
            MetricSpec::Detailed(definition) => self.resolve_definition(definition),
        }
    }

    /// A bare name is local when registered and delegated otherwise. An
    /// unregistered name within a small edit distance of a registered key
    /// is still delegated, with a warning naming that key.
    fn by_name(&self, name: &str) -> ResolvedMetric {
        match self.get(name) {
            Some(scorer) => ResolvedMetric::Local {
                name: name.to_string(),
                scorer,
                aggregation: self.aggregations.get(name).copied(),
            },
            None => {
                if let Some(nearest) = self.nearest_key(name) {
                    warn!(
                        metric = name,
                        nearest = %nearest,
                        "Unregistered metric name is close to a local scorer; delegating it"
                    );
                }
                ResolvedMetric::Delegated(DelegatedMetric {
                name: name.to_string(),
                    kind: KIND_COMPUTATION.to_string(),
                    params: serde_json::Map::new(),
                })
            }
        }
    }

    /// Registered key within a small edit distance of `name`, if any.
    pub fn nearest_key(&self, name: &str) -> Option<String> {
        let max_distance = (name.chars().count() / 5).clamp(1, 3);
        self.keys()
            .into_iter()
            .map(|key| (edit_distance(name, &key), key))
            .filter(|(distance, _)| *distance <= max_distance)
            .min_by_key(|(distance, _)| *distance)
            .map(|(_, key)| key)
    }

    fn resolve_definition(&self, definition: &MetricDefinition) -> Result<ResolvedMetric> {
        let kind = definition.kind.as_deref().map(|k| k.trim().to_ascii_lowercase());

        match kind.as_deref() {
            None if definition.scorer.is_none() => Ok(match self.by_name(&definition.name) {
                ResolvedMetric::Delegated(mut metric) => {
                    metric.params = definition.backend_params();
                    ResolvedMetric::Delegated(metric)
                }
                local => local,
            }),
            None | Some("custom_function" | "custom" | "local") => self.local(definition),
            Some(kind @ (KIND_COMPUTATION | "delegated")) => {
                let kind = if kind == "delegated" { KIND_COMPUTATION } else { kind };
                Ok(self.delegated(definition, kind))
            }
            Some(KIND_RUBRIC) => Ok(self.delegated(definition, KIND_RUBRIC)),
            Some(other) => Err(EvalError::MetricResolution(format!(
                "metric '{}' has unknown type '{}' (expected computation, rubric or custom_function)",
                definition.name, other
            ))),
        }
    }

    fn delegated(&self, definition: &MetricDefinition, kind: &str) -> ResolvedMetric {
        ResolvedMetric::Delegated(DelegatedMetric {
            name: definition.name.clone(),
            kind: kind.to_string(),
            params: definition.backend_params(),
        })
    }

    /// Look the scorer up by its key, falling back to the last segment of a
    /// dotted path (`package.module.function`).
    fn local(&self, definition: &MetricDefinition) -> Result<ResolvedMetric> {
        let key = definition.scorer.as_deref().unwrap_or(&definition.name).trim();
        let short_key = key.rsplit('.').next().unwrap_or(key);

        let scorer = self.get(key).or_else(|| self.get(short_key)).ok_or_else(|| {
            EvalError::MetricResolution(format!(
                "no local scorer '{}' for metric '{}'. Available scorers: {}",
                key,
                definition.name,
                self.keys().join(", ")
            ))
        })?;

        let aggregation = self
            .aggregations
            .get(key)
            .or_else(|| self.aggregations.get(short_key))
            .copied();
        Ok(ResolvedMetric::Local { name: definition.name.clone(), scorer, aggregation })
    }
}

/// Levenshtein distance over chars.
fn edit_distance(a: &str, b: &str) -> usize {
    let b: Vec<char> = b.chars().collect();
    let mut previous: Vec<usize> = (0..=b.len()).collect();
    for (i, ca) in a.chars().enumerate() {
        let mut current = vec![i + 1; b.len() + 1];
        for (j, cb) in b.iter().enumerate() {
            let substitution = previous[j] + usize::from(ca != *cb);
            current[j + 1] = substitution.min(previous[j + 1] + 1).min(current[j] + 1);
        }
        previous = current;
    }
    previous[b.len()]
}

impl Default for MetricRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aef_core::ToolCall;

    fn detailed(definition: MetricDefinition) -> MetricSpec {
        MetricSpec::Detailed(definition)
    }

    #[test]
    fn test_bare_names_resolve_local_or_delegated() {
        let plan = MetricRegistry::with_builtins()
            .resolve(&[MetricSpec::from("trajectory_exact_match"), MetricSpec::from("rouge_l_sum")])
            .unwrap();

        assert_eq!(plan.names(), vec!["trajectory_exact_match", "rouge_l_sum"]);
        assert!(!plan.metrics()[0].is_delegated());
        assert!(plan.metrics()[1].is_delegated());
        assert_eq!(plan.delegated()[0].kind, KIND_COMPUTATION);
        assert!(plan.has_delegated());
    }

    #[test]
    fn test_custom_function_lookup() {
        let specs = [
            detailed(
                MetricDefinition::new("traj")
                    .with_kind("custom_function")
                    .with_scorer("agent_eval.metric_utils.trajectory_exact_match"),
            ),
            detailed(MetricDefinition::new("response_exact_match").with_kind("custom")),
        ];
        let plan = MetricRegistry::with_builtins().resolve(&specs).unwrap();
        assert_eq!(plan.local().count(), 2);
        assert!(!plan.has_delegated());

        let (name, scorer) = plan.local().next().unwrap();
        assert_eq!(name, "traj");
        let record = DatasetRecord::new("p", "r")
            .with_reference_trajectory(vec![ToolCall::new("search")]);
        let response = AgentResponse::text("r").with_trajectory(vec![ToolCall::new("search")]);
        assert_eq!(scorer.score(&response, &record).unwrap(), MetricValue::Bool(true));
    }

    #[test]
    fn test_unknown_scorer_fails() {
        let specs = [detailed(MetricDefinition::new("mine").with_kind("custom_function"))];
        let err = MetricRegistry::with_builtins().resolve(&specs).unwrap_err();
        match err {
            EvalError::MetricResolution(message) => {
                assert!(message.contains("'mine'"));
                assert!(message.contains("trajectory_exact_match"));
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_unknown_kind_fails() {
        let specs = [detailed(MetricDefinition::new("x").with_kind("magic"))];
        assert!(matches!(
            MetricRegistry::with_builtins().resolve(&specs),
            Err(EvalError::MetricResolution(_))
        ));
    }

    #[test]
    fn test_rubric_carries_params() {
        let mut definition = MetricDefinition::new("helpfulness").with_kind("Rubric");
        definition.predefined_spec_name = Some("question_answering_quality".to_string());
        let plan = MetricRegistry::with_builtins().resolve(&[detailed(definition)]).unwrap();
        let delegated = plan.delegated();
        assert_eq!(delegated[0].kind, KIND_RUBRIC);
        assert_eq!(delegated[0].params["predefined_spec_name"], "question_answering_quality");
    }

    #[test]
    fn test_registered_closure() {
        let mut registry = MetricRegistry::new();
        registry.register("length", |response: &AgentResponse, _record: &DatasetRecord| -> Result<MetricValue> {
            Ok(MetricValue::Number(response.actual_response.len() as f64))
        });
        assert_eq!(registry.keys(), vec!["length"]);

        let plan = registry.resolve(&[MetricSpec::from("length")]).unwrap();
        let (_, scorer) = plan.local().next().unwrap();
        let value = scorer.score(&AgentResponse::text("abc"), &DatasetRecord::new("p", "r")).unwrap();
        assert_eq!(value, MetricValue::Number(3.0));
    }

    #[test]
    fn test_near_miss_names_find_the_local_scorer() {
        let registry = MetricRegistry::with_builtins();
        assert_eq!(
            registry.nearest_key("trajectory_exact_mach").as_deref(),
            Some(TRAJECTORY_EXACT_MATCH)
        );
        assert_eq!(registry.nearest_key("bleu"), None);
        assert_eq!(registry.nearest_key("rouge_l_sum"), None);

        let plan = registry.resolve(&[MetricSpec::from("trajectory_exact_mach")]).unwrap();
        assert!(plan.metrics()[0].is_delegated());
    }

    #[test]
    fn test_edit_distance() {
        assert_eq!(edit_distance("", "abc"), 3);
        assert_eq!(edit_distance("kitten", "sitting"), 3);
        assert_eq!(edit_distance("bleu", "bleu"), 0);
    }

    #[test]
    fn test_aggregation_comes_from_the_plan() {
        let mut registry = MetricRegistry::with_builtins();
        registry.register("custom", |_: &AgentResponse, _: &DatasetRecord| -> Result<MetricValue> {
            Ok(MetricValue::Bool(true))
        });
        let specs = [
            MetricSpec::from(TRAJECTORY_EXACT_MATCH),
            MetricSpec::from(RESPONSE_TOKEN_JACCARD),
            MetricSpec::from("bleu"),
            MetricSpec::from("custom"),
            detailed(MetricDefinition::new("exact").with_scorer(RESPONSE_EXACT_MATCH)),
        ];
        let plan = registry.resolve(&specs).unwrap();

        assert_eq!(
            plan.aggregations(),
            vec![
                (TRAJECTORY_EXACT_MATCH.to_string(), Some(Aggregation::PassRate)),
                (RESPONSE_TOKEN_JACCARD.to_string(), Some(Aggregation::Mean)),
                ("bleu".to_string(), Some(Aggregation::Mean)),
                ("custom".to_string(), None),
                ("exact".to_string(), Some(Aggregation::PassRate)),
            ]
        );
    }
}
