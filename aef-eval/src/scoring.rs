//! Locally computed metrics
//!
//! The trajectory comparator plus the text scorers that need no external
//! service. Every function here is pure.

use aef_core::{AgentResponse, DatasetRecord, MetricValue, Result, ToolCall};
use std::collections::HashSet;

pub const TRAJECTORY_EXACT_MATCH: &str = "trajectory_exact_match";
pub const RESPONSE_EXACT_MATCH: &str = "response_exact_match";
pub const RESPONSE_TOKEN_JACCARD: &str = "response_token_jaccard";

/// Strict, order-sensitive trajectory equality.
///
/// True iff both sequences have the same length and every position holds
/// equal tool calls. A length mismatch returns before any call is compared.
pub fn trajectory_exact_match(actual: &[ToolCall], reference: &[ToolCall]) -> bool {
    if actual.len() != reference.len() {
        return false;
    }
    actual.iter().zip(reference).all(|(a, r)| a == r)
}

/// Where two trajectories stop agreeing
#[derive(Debug, Clone, PartialEq)]
pub enum Divergence {
    /// The sequences differ in length; `common` leading calls agree
    Length { actual: usize, reference: usize, common: usize },
    /// Same length, calls differ at `position`
    Call { position: usize },
}

/// First point of disagreement, or `None` when the trajectories match.
/// Used for diagnostics only; the metric itself is [`trajectory_exact_match`].
pub fn first_divergence(actual: &[ToolCall], reference: &[ToolCall]) -> Option<Divergence> {
    let common = actual.iter().zip(reference).take_while(|(a, r)| a == r).count();

    if actual.len() != reference.len() {
        return Some(Divergence::Length { actual: actual.len(), reference: reference.len(), common });
    }
    if common < actual.len() { Some(Divergence::Call { position: common }) } else { None }
}

pub fn score_trajectory_exact_match(
    response: &AgentResponse,
    record: &DatasetRecord,
) -> Result<MetricValue> {
    let matched = trajectory_exact_match(&response.actual_trajectory, &record.reference_trajectory);
    if !matched {
        if let Some(divergence) =
            first_divergence(&response.actual_trajectory, &record.reference_trajectory)
        {
            aef_telemetry::trace!(?divergence, "Trajectory mismatch");
        }
    }
    Ok(MetricValue::Bool(matched))
}

/// Trimmed actual response equals trimmed reference.
pub fn score_response_exact_match(
    response: &AgentResponse,
    record: &DatasetRecord,
) -> Result<MetricValue> {
    Ok(MetricValue::Bool(response.actual_response.trim() == record.reference.trim()))
}

/// Word-set Jaccard similarity between response and reference.
pub fn score_response_token_jaccard(
    response: &AgentResponse,
    record: &DatasetRecord,
) -> Result<MetricValue> {
    Ok(MetricValue::Number(token_jaccard(&response.actual_response, &record.reference)))
}

fn token_jaccard(a: &str, b: &str) -> f64 {
    let a_words: HashSet<&str> = a.split_whitespace().collect();
    let b_words: HashSet<&str> = b.split_whitespace().collect();

    if a_words.is_empty() && b_words.is_empty() {
        return 1.0;
    }

    let intersection = a_words.intersection(&b_words).count();
    let union = a_words.union(&b_words).count();
    intersection as f64 / union as f64
}
