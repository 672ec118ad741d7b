//! Point-in-time inputs to candidate scoring
//!
//! A [`SelectionContext`] is assembled fresh for every selection call from
//! the live directory, the load monitor and the scorer's learned history.
//! It is never persisted.

use std::collections::{HashMap, HashSet, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::agents::{AgentId, AgentPerformance};
use crate::load::SystemSnapshot;

use super::{SelectionQuery, SwitchOutcome, SwitchReason, Urgency};

/// Minimum similarity for a past switch to count as a precedent
pub const SIMILARITY_THRESHOLD: f64 = 0.5;

/// Learned switch record of one agent
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentSwitchHistory {
    pub total_switches: u64,
    pub successful_switches: u64,
    pub success_rate: f64,
    pub average_switch_duration_ms: f64,
    pub average_satisfaction: f64,
    pub satisfaction_samples: u64,
    pub last_switch_at: Option<DateTime<Utc>>,
}

impl AgentSwitchHistory {
    /// Fold one outcome into the running figures
    pub fn record(&mut self, outcome: &SwitchOutcome) {
        self.total_switches += 1;
        if outcome.success {
            self.successful_switches += 1;
        }
        let n = self.total_switches as f64;
        self.success_rate = self.successful_switches as f64 / n;
        self.average_switch_duration_ms +=
            (outcome.switch_duration_ms as f64 - self.average_switch_duration_ms) / n;

        if let Some(satisfaction) = outcome.user_satisfaction {
            self.satisfaction_samples += 1;
            self.average_satisfaction += (satisfaction.clamp(0.0, 1.0) - self.average_satisfaction)
                / self.satisfaction_samples as f64;
        }
        self.last_switch_at = Some(Utc::now());
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SatisfactionPoint {
    pub agent_id: AgentId,
    pub score: f64,
    pub recorded_at: DateTime<Utc>,
}

/// What one session has experienced so far
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionInteractionHistory {
    pub session_id: String,
    pub previous_agents: Vec<AgentId>,
    pub satisfaction: VecDeque<SatisfactionPoint>,
    pub last_interaction: DateTime<Utc>,
}

impl SessionInteractionHistory {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            previous_agents: Vec::new(),
            satisfaction: VecDeque::new(),
            last_interaction: Utc::now(),
        }
    }

    /// Mark an agent as seen and append a satisfaction point (drop oldest past `limit`)
    pub fn record(&mut self, agent_id: &AgentId, satisfaction: Option<f64>, limit: usize) {
        if !self.previous_agents.contains(agent_id) {
            self.previous_agents.push(agent_id.clone());
        }
        if let Some(score) = satisfaction {
            self.satisfaction.push_back(SatisfactionPoint {
                agent_id: agent_id.clone(),
                score: score.clamp(0.0, 1.0),
                recorded_at: Utc::now(),
            });
            while self.satisfaction.len() > limit {
                self.satisfaction.pop_front();
            }
        }
        self.last_interaction = Utc::now();
    }

    pub fn has_seen(&self, agent_id: &AgentId) -> bool {
        self.previous_agents.contains(agent_id)
    }

    /// Mean satisfaction this session reported with `agent_id`
    pub fn satisfaction_with(&self, agent_id: &AgentId) -> Option<f64> {
        let scores: Vec<f64> = self
            .satisfaction
            .iter()
            .filter(|p| &p.agent_id == agent_id)
            .map(|p| p.score)
            .collect();
        if scores.is_empty() {
            None
        } else {
            Some(scores.iter().sum::<f64>() / scores.len() as f64)
        }
    }

    /// Mean satisfaction across all agents
    pub fn average_satisfaction(&self) -> Option<f64> {
        if self.satisfaction.is_empty() {
            None
        } else {
            Some(self.satisfaction.iter().map(|p| p.score).sum::<f64>() / self.satisfaction.len() as f64)
        }
    }
}

/// A previously completed switch, used for case-based scoring
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PastSwitch {
    pub request_id: String,
    pub reason: Option<SwitchReason>,
    pub urgency: Urgency,
    pub required_capabilities: Vec<String>,
    pub chosen_agent: AgentId,
    pub success: bool,
    pub satisfaction: Option<f64>,
    pub recorded_at: DateTime<Utc>,
}

impl PastSwitch {
    /// Similarity in [0, 1]: capability overlap, plus a same-reason bonus
    pub fn similarity(&self, query: &SelectionQuery<'_>) -> f64 {
        let overlap = jaccard(&self.required_capabilities, &query.criteria.required_capabilities);
        let same_reason = match (self.reason, query.reason) {
            (Some(a), Some(b)) if a == b => 1.0,
            _ => 0.0,
        };
        0.7 * overlap + 0.3 * same_reason
    }
}

fn jaccard(a: &[String], b: &[String]) -> f64 {
    let a: HashSet<&String> = a.iter().collect();
    let b: HashSet<&String> = b.iter().collect();
    let union = a.union(&b).count();
    if union == 0 {
        return 1.0;
    }
    a.intersection(&b).count() as f64 / union as f64
}

/// Everything the evaluators may consult for one selection call
#[derive(Debug, Clone)]
pub struct SelectionContext {
    pub agent_performance: HashMap<AgentId, AgentPerformance>,
    pub agent_history: HashMap<AgentId, AgentSwitchHistory>,
    pub session_history: Option<SessionInteractionHistory>,
    pub system: SystemSnapshot,
    pub similar_switches: Vec<PastSwitch>,
    pub built_at: DateTime<Utc>,
}

impl SelectionContext {
    pub fn history_of(&self, agent_id: &AgentId) -> Option<&AgentSwitchHistory> {
        self.agent_history.get(agent_id)
    }

    pub fn performance_of(&self, agent_id: &AgentId) -> Option<&AgentPerformance> {
        self.agent_performance.get(agent_id)
    }
}
