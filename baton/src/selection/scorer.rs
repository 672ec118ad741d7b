//! Smart Agent Selection - weighted, self-tuning candidate ranking
//!
//! Scores every candidate that survives the criteria filter through the
//! algorithm ensemble, ranks them, and wraps the winner in a
//! [`SwitchRecommendation`] with reasoning, benefits, risks and an impact
//! estimate.
//!
//! # Features
//!
//! - Criteria pre-filtering against the live agent directory
//! - Weighted ensemble with per-algorithm failure isolation
//! - Confidence and handoff-latency estimation
//! - Outcome feedback that tunes algorithm weights and per-agent history

use std::cmp::Ordering;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::agents::{Agent, AgentDirectory, AgentId};
use crate::config::SelectionConfig;
use crate::context::ContextPreservationPolicy;
use crate::events::{EventBus, HandoffEvent};
use crate::load::{DirectoryLoadMonitor, LoadMonitor, SystemSnapshot};

use super::algorithms::{AgentEvaluator, AlgorithmRegistry};
use super::context::SIMILARITY_THRESHOLD;
use super::{
    AgentSelectionCriteria, AgentSwitchHistory, AgentSwitchProfile, ImpactEstimate, PastSwitch,
    Result, RiskSeverity, SelectionContext, SelectionError, SelectionQuery,
    SessionInteractionHistory, SwitchOutcome, SwitchReason, SwitchRecommendation, SwitchRequest,
    SwitchRisk, Urgency,
};

/// Maximum alternatives attached to a recommendation
const MAX_ALTERNATIVES: usize = 3;

/// What the scorer remembers about a request until its outcome arrives
#[derive(Debug, Clone)]
struct PendingSelection {
    session_id: String,
    reason: SwitchReason,
    urgency: Urgency,
    required_capabilities: Vec<String>,
    created_at: DateTime<Utc>,
}

/// Aggregate view over the selection history
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SelectionStatistics {
    pub total_selections: usize,
    pub average_score: f64,
    pub average_confidence: f64,
    pub average_selection_time_ms: f64,
}

/// Weighted-ensemble agent selector
pub struct SmartAgentSelection {
    directory: Arc<dyn AgentDirectory>,
    load_monitor: Arc<dyn LoadMonitor>,
    events: Arc<EventBus>,
    config: SelectionConfig,
    algorithms: AlgorithmRegistry,
    agent_history: DashMap<AgentId, AgentSwitchHistory>,
    session_history: DashMap<String, SessionInteractionHistory>,
    past_switches: RwLock<VecDeque<PastSwitch>>,
    pending: DashMap<String, PendingSelection>,
    selection_history: RwLock<VecDeque<SwitchRecommendation>>,
}

impl SmartAgentSelection {
    /// Create a selector that derives load figures from the directory
    pub fn new(
        directory: Arc<dyn AgentDirectory>,
        events: Arc<EventBus>,
        config: SelectionConfig,
    ) -> Self {
        let load_monitor = Arc::new(DirectoryLoadMonitor::new(directory.clone()));
        Self::with_load_monitor(directory, load_monitor, events, config)
    }

    /// Create a selector with an explicit load monitor
    pub fn with_load_monitor(
        directory: Arc<dyn AgentDirectory>,
        load_monitor: Arc<dyn LoadMonitor>,
        events: Arc<EventBus>,
        config: SelectionConfig,
    ) -> Self {
        info!(
            "Initializing agent selection with {} scoring algorithms",
            config.algorithm_weights.len()
        );

        Self {
            directory,
            load_monitor,
            events,
            algorithms: AlgorithmRegistry::with_defaults(&config),
            config,
            agent_history: DashMap::new(),
            session_history: DashMap::new(),
            past_switches: RwLock::new(VecDeque::new()),
            pending: DashMap::new(),
            selection_history: RwLock::new(VecDeque::new()),
        }
    }

    // ========================================================================
    // Selection
    // ========================================================================

    /// Pick the best agent for a switch request
    pub async fn select_best_agent(&self, request: &SwitchRequest) -> Result<SwitchRecommendation> {
        let started = Instant::now();
        debug!("Selecting agent for switch request {}", request.id);

        request.criteria.validate()?;
        let query = request.query();

        let candidates = self.filter_candidates(&query).await?;
        if candidates.is_empty() {
            warn!("No candidates satisfy criteria for request {}", request.id);
            return Err(SelectionError::NoCandidates {
                request_id: request.id.clone(),
            });
        }
        let candidate_count = candidates.len();

        let context = self.build_context(&query, &candidates).await;
        let mut ranked = self.rank(&candidates, &query, &context);
        if ranked.is_empty() {
            return Err(SelectionError::Exhausted {
                request_id: request.id.clone(),
            });
        }

        let recommended = ranked.remove(0);
        ranked.truncate(MAX_ALTERNATIVES);

        let current = match self.directory.get_agent(&request.current_agent_id).await {
            Ok(agent) => agent,
            Err(e) => {
                warn!("Could not load current agent {}: {}", request.current_agent_id, e);
                None
            }
        };

        let selection_time_ms = started.elapsed().as_millis() as u64;
        let recommendation = SwitchRecommendation {
            request_id: request.id.clone(),
            reasoning: self.recommendation_reasoning(request, &recommended, candidate_count),
            expected_benefits: self.expected_benefits(request, &recommended, current.as_ref()),
            potential_risks: self.potential_risks(request, &recommended, &context),
            estimated_impact: self.estimate_impact(&recommended, current.as_ref()),
            recommended_agent: recommended,
            alternative_options: ranked,
            selection_time_ms,
            created_at: Utc::now(),
        };

        self.remember(request, &recommendation);

        info!(
            "Selected agent {} for request {} (score {:.3}, confidence {:.3}, {} alternatives)",
            recommendation.recommended_agent.agent_id,
            request.id,
            recommendation.recommended_agent.score,
            recommendation.recommended_agent.confidence_level,
            recommendation.alternative_options.len()
        );

        self.events.publish(HandoffEvent::AgentSelected {
            request_id: request.id.clone(),
            agent_id: recommendation.recommended_agent.agent_id.clone(),
            confidence: recommendation.recommended_agent.confidence_level,
            selection_time_ms,
        });

        Ok(recommendation)
    }

    /// Rank candidates for advisory queries without recording anything
    pub async fn get_selection_recommendations(
        &self,
        criteria: &AgentSelectionCriteria,
        session_id: &str,
        limit: usize,
    ) -> Result<Vec<AgentSwitchProfile>> {
        criteria.validate()?;

        let policy = ContextPreservationPolicy::default();
        let query = SelectionQuery {
            request_id: None,
            criteria,
            session_id,
            current_agent_id: None,
            reason: None,
            urgency: Urgency::Medium,
            policy: &policy,
        };

        let candidates = self.filter_candidates(&query).await?;
        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let context = self.build_context(&query, &candidates).await;
        let mut ranked = self.rank(&candidates, &query, &context);
        ranked.truncate(limit);
        Ok(ranked)
    }

    // ========================================================================
    // Learning
    // ========================================================================

    /// Feed an observed switch outcome back into history and weights
    pub fn learn_from_switch_outcome(&self, request_id: &str, agent_id: &AgentId, outcome: &SwitchOutcome) {
        self.agent_history
            .entry(agent_id.clone())
            .or_default()
            .record(outcome);

        if let Some((_, pending)) = self.pending.remove(request_id) {
            self.session_history
                .entry(pending.session_id.clone())
                .or_insert_with(|| SessionInteractionHistory::new(pending.session_id.clone()))
                .record(agent_id, outcome.user_satisfaction, self.config.session_history_limit);

            let mut past = self.past_switches.write();
            past.push_back(PastSwitch {
                request_id: request_id.to_string(),
                reason: Some(pending.reason),
                urgency: pending.urgency,
                required_capabilities: pending.required_capabilities,
                chosen_agent: agent_id.clone(),
                success: outcome.success,
                satisfaction: outcome.user_satisfaction,
                recorded_at: Utc::now(),
            });
            while past.len() > self.config.past_switch_limit {
                past.pop_front();
            }
        } else {
            debug!("No pending selection for request {}; session history unchanged", request_id);
        }

        let multiplier = if outcome.success {
            self.config.success_multiplier
        } else {
            self.config.failure_multiplier
        };
        self.algorithms.nudge(multiplier);

        debug!(
            "Processed outcome for request {} (agent {}, success {})",
            request_id, agent_id, outcome.success
        );

        self.events.publish(HandoffEvent::OutcomeProcessed {
            request_id: request_id.to_string(),
            agent_id: agent_id.clone(),
            success: outcome.success,
            satisfaction: outcome.user_satisfaction,
        });
    }

    // ========================================================================
    // Registry and introspection
    // ========================================================================

    /// Add or replace a scoring algorithm
    pub fn register_algorithm(&self, name: &str, weight: f64, evaluator: Arc<dyn AgentEvaluator>) {
        self.algorithms.register(name, weight, evaluator);
    }

    /// Remove a scoring algorithm
    pub fn remove_algorithm(&self, name: &str) -> bool {
        self.algorithms.remove(name)
    }

    /// Current algorithm weights
    pub fn algorithm_weights(&self) -> Vec<(String, f64)> {
        self.algorithms.weights()
    }

    /// Learned switch record of an agent
    pub fn agent_history(&self, agent_id: &AgentId) -> Option<AgentSwitchHistory> {
        self.agent_history.get(agent_id).map(|h| h.clone())
    }

    /// Interaction history of a session
    pub fn session_history(&self, session_id: &str) -> Option<SessionInteractionHistory> {
        self.session_history.get(session_id).map(|h| h.clone())
    }

    /// Recommendations made so far, oldest first
    pub fn selection_history(&self) -> Vec<SwitchRecommendation> {
        self.selection_history.read().iter().cloned().collect()
    }

    pub fn selection_statistics(&self) -> SelectionStatistics {
        let history = self.selection_history.read();
        if history.is_empty() {
            return SelectionStatistics::default();
        }
        let n = history.len() as f64;
        SelectionStatistics {
            total_selections: history.len(),
            average_score: history.iter().map(|r| r.recommended_agent.score).sum::<f64>() / n,
            average_confidence: history
                .iter()
                .map(|r| r.recommended_agent.confidence_level)
                .sum::<f64>()
                / n,
            average_selection_time_ms: history.iter().map(|r| r.selection_time_ms as f64).sum::<f64>() / n,
        }
    }

    // ========================================================================
    // Pipeline internals
    // ========================================================================

    async fn filter_candidates(&self, query: &SelectionQuery<'_>) -> Result<Vec<Agent>> {
        let criteria = query.criteria;

        let pool = match criteria.required_capabilities.first() {
            Some(capability) => self.directory.get_agents_by_capability(capability).await?,
            None => self.directory.get_active_agents().await?,
        };

        let candidates: Vec<Agent> = pool
            .into_iter()
            .filter(|agent| {
                let keep = agent.status.accepts_handoff()
                    && query.current_agent_id != Some(&agent.id)
                    && !criteria.excluded_agents.contains(&agent.id)
                    && agent.has_all_capabilities(&criteria.required_capabilities)
                    && (criteria.preferred_agent_types.is_empty()
                        || criteria.preferred_agent_types.contains(&agent.agent_type))
                    && criteria
                        .min_success_rate
                        .is_none_or(|min| agent.performance.success_rate >= min)
                    && criteria
                        .max_response_time_ms
                        .is_none_or(|max| agent.performance.average_response_time_ms <= max)
                    && criteria.workload_preference.accepts(agent.performance.current_load);
                if !keep {
                    debug!("Agent {} filtered out by selection criteria", agent.id);
                }
                keep
            })
            .collect();

        debug!("{} candidates after filtering", candidates.len());
        Ok(candidates)
    }

    async fn build_context(&self, query: &SelectionQuery<'_>, candidates: &[Agent]) -> SelectionContext {
        let system = match self.load_monitor.system_snapshot().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!("Load snapshot unavailable, scoring without it: {}", e);
                SystemSnapshot::empty()
            }
        };

        let similar_switches = self
            .past_switches
            .read()
            .iter()
            .filter(|case| case.similarity(query) >= SIMILARITY_THRESHOLD)
            .cloned()
            .collect();

        SelectionContext {
            agent_performance: candidates
                .iter()
                .map(|a| (a.id.clone(), a.performance.clone()))
                .collect(),
            agent_history: candidates
                .iter()
                .filter_map(|a| self.agent_history.get(&a.id).map(|h| (a.id.clone(), h.clone())))
                .collect(),
            session_history: self.session_history.get(query.session_id).map(|h| h.clone()),
            system,
            similar_switches,
            built_at: Utc::now(),
        }
    }

    /// Score, profile and sort candidates (score desc, then agent id asc)
    fn rank(
        &self,
        candidates: &[Agent],
        query: &SelectionQuery<'_>,
        context: &SelectionContext,
    ) -> Vec<AgentSwitchProfile> {
        let mut profiles: Vec<AgentSwitchProfile> = candidates
            .iter()
            .filter_map(|candidate| {
                let ensemble = self.algorithms.score(candidate, query, context);
                let Some(score) = ensemble.score else {
                    warn!("No scoring algorithm produced a score for agent {}", candidate.id);
                    return None;
                };

                let mut reasoning: Vec<String> = ensemble
                    .evaluated
                    .iter()
                    .map(|(name, value, weight)| format!("{} scored {:.2} (weight {:.1})", name, value, weight))
                    .collect();
                reasoning.extend(ensemble.failed.iter().map(|name| format!("{} unavailable", name)));

                Some(AgentSwitchProfile {
                    agent_id: candidate.id.clone(),
                    name: candidate.name.clone(),
                    agent_type: candidate.agent_type.clone(),
                    capabilities: candidate.capabilities.clone(),
                    score,
                    reasoning,
                    estimated_handoff_time_ms: self.estimate_handoff_time(candidate, query),
                    confidence_level: self.confidence(score, candidate, context),
                    specializations: self.specializations(candidate, query, context),
                    current_load: candidate.performance.current_load,
                    performance: candidate.performance.clone(),
                })
            })
            .collect();

        profiles.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.agent_id.cmp(&b.agent_id))
        });
        profiles
    }

    fn confidence(&self, score: f64, candidate: &Agent, context: &SelectionContext) -> f64 {
        let mut confidence = score;

        if context
            .history_of(&candidate.id)
            .is_some_and(|h| h.total_switches > self.config.min_history_switches)
        {
            confidence += 0.1;
        }
        if candidate.performance.current_load > self.config.high_load_threshold {
            confidence -= 0.15;
        }
        if candidate.performance.success_rate > self.config.high_reliability_threshold {
            confidence += 0.1;
        }

        confidence.clamp(0.0, 1.0)
    }

    fn estimate_handoff_time(&self, candidate: &Agent, query: &SelectionQuery<'_>) -> u64 {
        let perf = &candidate.performance;
        let estimate = perf.average_response_time_ms.max(0.0)
            * (1.0 + perf.current_load.clamp(0.0, 1.0))
            * query.policy.complexity_factor()
            * query.urgency.time_factor();
        estimate.round() as u64
    }

    fn specializations(
        &self,
        candidate: &Agent,
        query: &SelectionQuery<'_>,
        context: &SelectionContext,
    ) -> Vec<String> {
        let mut specializations: Vec<String> = query
            .criteria
            .required_capabilities
            .iter()
            .filter(|c| candidate.has_capability(c))
            .cloned()
            .collect();

        let perf = &candidate.performance;
        if perf.success_rate > self.config.high_reliability_threshold {
            specializations.push("high_reliability".to_string());
        }
        if perf.average_response_time_ms < 0.2 * self.config.reference_response_time_ms {
            specializations.push("low_latency".to_string());
        }
        if context.history_of(&candidate.id).is_some_and(|h| {
            h.total_switches > self.config.min_history_switches && h.success_rate >= 0.8
        }) {
            specializations.push("proven_handoff_target".to_string());
        }
        specializations
    }

    fn recommendation_reasoning(
        &self,
        request: &SwitchRequest,
        chosen: &AgentSwitchProfile,
        candidate_count: usize,
    ) -> Vec<String> {
        let mut reasoning = vec![
            format!("Switch requested because {}", request.reason.describe()),
            format!(
                "{} ranked first of {} candidates with score {:.2}",
                chosen.name, candidate_count, chosen.score
            ),
            format!("Confidence {:.2}", chosen.confidence_level),
        ];
        reasoning.extend(chosen.reasoning.iter().cloned());
        reasoning
    }

    fn expected_benefits(
        &self,
        request: &SwitchRequest,
        chosen: &AgentSwitchProfile,
        current: Option<&Agent>,
    ) -> Vec<String> {
        let mut benefits = Vec::new();
        let perf = &chosen.performance;

        if let Some(current) = current {
            let before = &current.performance;
            if perf.success_rate > before.success_rate {
                benefits.push(format!(
                    "Higher success rate ({:.0}% vs {:.0}%)",
                    perf.success_rate * 100.0,
                    before.success_rate * 100.0
                ));
            }
            if perf.average_response_time_ms < before.average_response_time_ms {
                benefits.push(format!(
                    "Faster responses ({:.0}ms vs {:.0}ms)",
                    perf.average_response_time_ms, before.average_response_time_ms
                ));
            }
            if perf.current_load < before.current_load {
                benefits.push("More available capacity".to_string());
            }
        }

        let required = &request.criteria.required_capabilities;
        if !required.is_empty() {
            benefits.push(format!("Covers all {} required capabilities", required.len()));
        }
        if request.reason == SwitchReason::AgentFailure {
            benefits.push("Restores service continuity".to_string());
        }
        if benefits.is_empty() {
            benefits.push("Maintains current service level".to_string());
        }
        benefits
    }

    fn potential_risks(
        &self,
        request: &SwitchRequest,
        chosen: &AgentSwitchProfile,
        context: &SelectionContext,
    ) -> Vec<SwitchRisk> {
        let mut risks = Vec::new();

        if chosen.current_load > self.config.high_load_threshold {
            risks.push(SwitchRisk {
                description: format!("Target agent is heavily loaded ({:.0}%)", chosen.current_load * 100.0),
                severity: RiskSeverity::Medium,
                probability: chosen.current_load.clamp(0.0, 1.0),
            });
        }
        if chosen.performance.is_at_capacity() && !request.criteria.allow_capacity_override {
            risks.push(SwitchRisk {
                description: "Target agent has no free task slot".to_string(),
                severity: RiskSeverity::High,
                probability: 0.8,
            });
        }
        let history = context.history_of(&chosen.agent_id);
        if history.is_none_or(|h| h.total_switches <= self.config.min_history_switches) {
            risks.push(SwitchRisk {
                description: "Limited handoff history for target agent".to_string(),
                severity: RiskSeverity::Low,
                probability: 0.3,
            });
        }
        if chosen.confidence_level < 0.5 {
            risks.push(SwitchRisk {
                description: "Low selection confidence".to_string(),
                severity: RiskSeverity::High,
                probability: 1.0 - chosen.confidence_level,
            });
        }
        if request.preservation_policy.preserve_full_context {
            risks.push(SwitchRisk {
                description: "Full context transfer may add latency".to_string(),
                severity: RiskSeverity::Low,
                probability: 0.2,
            });
        }
        risks
    }

    fn estimate_impact(&self, chosen: &AgentSwitchProfile, current: Option<&Agent>) -> ImpactEstimate {
        let perf = &chosen.performance;
        let (user_satisfaction_delta, performance_delta) = match current {
            Some(current) => (
                perf.user_satisfaction - current.performance.user_satisfaction,
                perf.success_rate - current.performance.success_rate,
            ),
            None => (0.0, 0.0),
        };

        let spread = (1.0 - chosen.confidence_level) * 0.5;
        ImpactEstimate {
            user_satisfaction_delta,
            performance_delta,
            time_to_completion_ms: chosen.estimated_handoff_time_ms
                + perf.average_response_time_ms.max(0.0).round() as u64,
            confidence_interval: (
                (chosen.score - spread).clamp(0.0, 1.0),
                (chosen.score + spread).clamp(0.0, 1.0),
            ),
        }
    }

    fn remember(&self, request: &SwitchRequest, recommendation: &SwitchRecommendation) {
        {
            let mut history = self.selection_history.write();
            history.push_back(recommendation.clone());
            while history.len() > self.config.selection_history_limit {
                history.pop_front();
            }
        }

        self.pending.insert(
            request.id.clone(),
            PendingSelection {
                session_id: request.session_id.clone(),
                reason: request.reason,
                urgency: request.urgency,
                required_capabilities: request.criteria.required_capabilities.clone(),
                created_at: Utc::now(),
            },
        );

        // Outcomes that never arrive must not pin memory forever
        if self.pending.len() > self.config.selection_history_limit {
            let oldest = self
                .pending
                .iter()
                .min_by_key(|entry| entry.value().created_at)
                .map(|entry| entry.key().clone());
            if let Some(key) = oldest {
                self.pending.remove(&key);
            }
        }
    }
}
