//! Scoring algorithm ensemble
//!
//! Each algorithm is a named, weighted [`AgentEvaluator`]. The ensemble score
//! of a candidate is `Σ(score_i × weight_i) / Σ(weight_i)` over the
//! algorithms that evaluated successfully; an evaluator that errors is left
//! out of both sums.

use std::sync::Arc;

use anyhow::anyhow;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::agents::Agent;
use crate::config::SelectionConfig;

use super::{SelectionContext, SelectionQuery};

pub const PERFORMANCE: &str = "performance";
pub const CAPABILITY_MATCH: &str = "capability_match";
pub const USER_PREFERENCE: &str = "user_preference";
pub const LOAD_BALANCING: &str = "load_balancing";
pub const CONTEXT_SIMILARITY: &str = "context_similarity";

/// Scores one candidate against one query, in [0, 1]
pub trait AgentEvaluator: Send + Sync {
    fn evaluate(
        &self,
        candidate: &Agent,
        query: &SelectionQuery<'_>,
        context: &SelectionContext,
    ) -> anyhow::Result<f64>;
}

/// Adapter turning a closure into an [`AgentEvaluator`]
pub struct FnEvaluator<F>(F);

impl<F> AgentEvaluator for FnEvaluator<F>
where
    F: Fn(&Agent, &SelectionQuery<'_>, &SelectionContext) -> anyhow::Result<f64> + Send + Sync,
{
    fn evaluate(
        &self,
        candidate: &Agent,
        query: &SelectionQuery<'_>,
        context: &SelectionContext,
    ) -> anyhow::Result<f64> {
        (self.0)(candidate, query, context)
    }
}

/// Wrap a closure as a shareable evaluator
pub fn evaluator_fn<F>(f: F) -> Arc<dyn AgentEvaluator>
where
    F: Fn(&Agent, &SelectionQuery<'_>, &SelectionContext) -> anyhow::Result<f64>
        + Send
        + Sync
        + 'static,
{
    Arc::new(FnEvaluator(f))
}

/// Registered algorithm
#[derive(Clone)]
pub struct AlgorithmEntry {
    pub name: String,
    pub weight: f64,
    pub evaluator: Arc<dyn AgentEvaluator>,
}

/// Ensemble result for one candidate
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnsembleScore {
    /// Normalized weighted score; `None` when no algorithm evaluated
    pub score: Option<f64>,
    /// (algorithm, raw score, weight) for every successful evaluation
    pub evaluated: Vec<(String, f64, f64)>,
    /// Algorithms that errored and were excluded
    pub failed: Vec<String>,
}

/// Thread-safe table of weighted algorithms
pub struct AlgorithmRegistry {
    entries: RwLock<Vec<AlgorithmEntry>>,
    min_weight: f64,
    max_weight: f64,
}

impl AlgorithmRegistry {
    /// Empty registry with a weight band
    pub fn new(min_weight: f64, max_weight: f64) -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
            min_weight,
            max_weight,
        }
    }

    /// Registry holding the built-in algorithms named in `config`
    pub fn with_defaults(config: &SelectionConfig) -> Self {
        let registry = Self::new(config.min_weight, config.max_weight);

        for (name, weight) in &config.algorithm_weights {
            let evaluator: Arc<dyn AgentEvaluator> = match name.as_str() {
                PERFORMANCE => Arc::new(PerformanceEvaluator {
                    reference_response_time_ms: config.reference_response_time_ms,
                }),
                CAPABILITY_MATCH => Arc::new(CapabilityMatchEvaluator),
                USER_PREFERENCE => Arc::new(UserPreferenceEvaluator),
                LOAD_BALANCING => Arc::new(LoadBalancingEvaluator),
                CONTEXT_SIMILARITY => Arc::new(ContextSimilarityEvaluator),
                other => {
                    warn!("Ignoring weight for unknown scoring algorithm: {}", other);
                    continue;
                }
            };
            registry.register(name, *weight, evaluator);
        }

        registry
    }

    /// Add or replace an algorithm
    pub fn register(&self, name: &str, weight: f64, evaluator: Arc<dyn AgentEvaluator>) {
        let weight = weight.clamp(self.min_weight, self.max_weight);
        let mut entries = self.entries.write();
        if let Some(existing) = entries.iter_mut().find(|e| e.name == name) {
            existing.weight = weight;
            existing.evaluator = evaluator;
        } else {
            entries.push(AlgorithmEntry {
                name: name.to_string(),
                weight,
                evaluator,
            });
        }
        debug!("Registered scoring algorithm {} (weight {:.2})", name, weight);
    }

    /// Remove an algorithm, returning whether it existed
    pub fn remove(&self, name: &str) -> bool {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|e| e.name != name);
        entries.len() != before
    }

    /// Current (name, weight) pairs in registration order
    pub fn weights(&self) -> Vec<(String, f64)> {
        self.entries
            .read()
            .iter()
            .map(|e| (e.name.clone(), e.weight))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Multiply every weight by `multiplier`, clamped to the weight band
    pub fn nudge(&self, multiplier: f64) {
        let mut entries = self.entries.write();
        for entry in entries.iter_mut() {
            entry.weight = (entry.weight * multiplier).clamp(self.min_weight, self.max_weight);
        }
    }

    /// Run the ensemble for one candidate
    pub fn score(
        &self,
        candidate: &Agent,
        query: &SelectionQuery<'_>,
        context: &SelectionContext,
    ) -> EnsembleScore {
        // Evaluate outside the lock so slow evaluators never block learning
        let entries: Vec<AlgorithmEntry> = self.entries.read().clone();

        let mut weighted_sum = 0.0;
        let mut weight_sum = 0.0;
        let mut evaluated = Vec::with_capacity(entries.len());
        let mut failed = Vec::new();

        for entry in &entries {
            match entry.evaluator.evaluate(candidate, query, context) {
                Ok(raw) if raw.is_finite() => {
                    let score = raw.clamp(0.0, 1.0);
                    weighted_sum += score * entry.weight;
                    weight_sum += entry.weight;
                    evaluated.push((entry.name.clone(), score, entry.weight));
                }
                Ok(raw) => {
                    warn!(
                        "Algorithm {} returned non-finite score {} for agent {}",
                        entry.name, raw, candidate.id
                    );
                    failed.push(entry.name.clone());
                }
                Err(e) => {
                    warn!("Algorithm {} failed for agent {}: {}", entry.name, candidate.id, e);
                    failed.push(entry.name.clone());
                }
            }
        }

        let score = if weight_sum > 0.0 {
            Some((weighted_sum / weight_sum).clamp(0.0, 1.0))
        } else {
            None
        };

        EnsembleScore {
            score,
            evaluated,
            failed,
        }
    }
}

// ============================================================================
// Built-in algorithms
// ============================================================================

/// Success rate, latency, error rate and satisfaction from live counters
pub struct PerformanceEvaluator {
    pub reference_response_time_ms: f64,
}

impl AgentEvaluator for PerformanceEvaluator {
    fn evaluate(
        &self,
        candidate: &Agent,
        query: &SelectionQuery<'_>,
        context: &SelectionContext,
    ) -> anyhow::Result<f64> {
        let perf = context
            .performance_of(&candidate.id)
            .ok_or_else(|| anyhow!("no performance snapshot for agent {}", candidate.id))?;

        let reference = query
            .criteria
            .max_response_time_ms
            .unwrap_or(self.reference_response_time_ms);
        let responsiveness = 1.0 - (perf.average_response_time_ms / reference).clamp(0.0, 1.0);

        Ok(0.4 * perf.success_rate
            + 0.3 * responsiveness
            + 0.2 * (1.0 - perf.error_rate)
            + 0.1 * perf.user_satisfaction)
    }
}

/// Required-capability coverage plus preferred-type match
pub struct CapabilityMatchEvaluator;

impl AgentEvaluator for CapabilityMatchEvaluator {
    fn evaluate(
        &self,
        candidate: &Agent,
        query: &SelectionQuery<'_>,
        _context: &SelectionContext,
    ) -> anyhow::Result<f64> {
        let required = &query.criteria.required_capabilities;
        let coverage = if required.is_empty() {
            1.0
        } else {
            let matched = required.iter().filter(|c| candidate.has_capability(c)).count();
            matched as f64 / required.len() as f64
        };

        let preferred = &query.criteria.preferred_agent_types;
        let type_match = if preferred.is_empty() || preferred.contains(&candidate.agent_type) {
            1.0
        } else {
            0.0
        };

        Ok(0.9 * coverage + 0.1 * type_match)
    }
}

/// How this session has fared with the candidate before
pub struct UserPreferenceEvaluator;

impl AgentEvaluator for UserPreferenceEvaluator {
    fn evaluate(
        &self,
        candidate: &Agent,
        _query: &SelectionQuery<'_>,
        context: &SelectionContext,
    ) -> anyhow::Result<f64> {
        let Some(session) = &context.session_history else {
            return Ok(0.5);
        };

        if let Some(satisfaction) = session.satisfaction_with(&candidate.id) {
            return Ok(satisfaction);
        }
        if session.has_seen(&candidate.id) {
            return Ok(0.6);
        }

        // An unhappy session leans towards agents it has not tried yet
        match session.average_satisfaction() {
            Some(avg) if avg < 0.5 => Ok(0.6),
            _ => Ok(0.5),
        }
    }
}

/// Favors headroom, and agents below the fleet average
pub struct LoadBalancingEvaluator;

impl AgentEvaluator for LoadBalancingEvaluator {
    fn evaluate(
        &self,
        candidate: &Agent,
        _query: &SelectionQuery<'_>,
        context: &SelectionContext,
    ) -> anyhow::Result<f64> {
        let load = context
            .system
            .load_distribution
            .get(&candidate.id)
            .copied()
            .unwrap_or(candidate.performance.current_load)
            .clamp(0.0, 1.0);

        let below_average = if load < context.system.average_load { 0.1 } else { 0.0 };
        Ok(0.9 * (1.0 - load) + below_average)
    }
}

/// Case-based score from similar past switches that chose this candidate
pub struct ContextSimilarityEvaluator;

impl AgentEvaluator for ContextSimilarityEvaluator {
    fn evaluate(
        &self,
        candidate: &Agent,
        query: &SelectionQuery<'_>,
        context: &SelectionContext,
    ) -> anyhow::Result<f64> {
        let mut weighted = 0.0;
        let mut total = 0.0;

        for case in context.similar_switches.iter().filter(|c| c.chosen_agent == candidate.id) {
            let similarity = case.similarity(query);
            let value = if case.success {
                case.satisfaction.unwrap_or(1.0)
            } else {
                0.0
            };
            weighted += similarity * value;
            total += similarity;
        }

        if total > 0.0 {
            Ok(weighted / total)
        } else {
            Ok(0.5)
        }
    }
}
