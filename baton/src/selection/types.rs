//! Switch requests, criteria and recommendation shapes

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::agents::{AgentId, AgentPerformance, AgentType};
use crate::context::ContextPreservationPolicy;

use super::{Result, SelectionError};

/// Why a task should move to another agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SwitchReason {
    PerformanceDegradation,
    CapabilityMismatch,
    UserRequest,
    LoadBalancing,
    AgentFailure,
    Escalation,
}

impl SwitchReason {
    pub fn describe(&self) -> &'static str {
        match self {
            SwitchReason::PerformanceDegradation => "current agent performance has degraded",
            SwitchReason::CapabilityMismatch => "current agent lacks required capabilities",
            SwitchReason::UserRequest => "user requested a different agent",
            SwitchReason::LoadBalancing => "rebalancing load across the fleet",
            SwitchReason::AgentFailure => "current agent failed",
            SwitchReason::Escalation => "task needs a more specialized agent",
        }
    }
}

/// How quickly the switch must happen
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Urgency {
    Low,
    Medium,
    High,
    Critical,
}

impl Urgency {
    /// Multiplier applied to the estimated handoff time
    pub fn time_factor(&self) -> f64 {
        match self {
            Urgency::Critical => 0.7,
            Urgency::High => 0.85,
            Urgency::Medium => 1.0,
            Urgency::Low => 1.3,
        }
    }
}

/// Load bucket a candidate must fall into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkloadPreference {
    #[default]
    Any,
    /// Load below 0.3
    Low,
    /// Load below 0.7
    Medium,
    /// Any load short of saturation
    High,
}

impl WorkloadPreference {
    pub fn accepts(&self, load: f64) -> bool {
        match self {
            WorkloadPreference::Any => true,
            WorkloadPreference::Low => load < 0.3,
            WorkloadPreference::Medium => load < 0.7,
            WorkloadPreference::High => load < 1.0,
        }
    }
}

/// Pre-filter applied to candidate agents
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentSelectionCriteria {
    pub required_capabilities: Vec<String>,
    pub preferred_agent_types: Vec<AgentType>,
    pub excluded_agents: Vec<AgentId>,
    pub min_success_rate: Option<f64>,
    pub max_response_time_ms: Option<f64>,
    pub workload_preference: WorkloadPreference,
    /// Allow a target with no free task slot
    pub allow_capacity_override: bool,
}

impl AgentSelectionCriteria {
    pub fn requiring(capabilities: &[&str]) -> Self {
        Self {
            required_capabilities: capabilities.iter().map(|c| c.to_string()).collect(),
            ..Default::default()
        }
    }

    /// Reject criteria no candidate could meaningfully satisfy
    pub fn validate(&self) -> Result<()> {
        if let Some(rate) = self.min_success_rate {
            if !(0.0..=1.0).contains(&rate) {
                return Err(SelectionError::InvalidCriteria(format!(
                    "min_success_rate must be within [0, 1], got {}",
                    rate
                )));
            }
        }
        if let Some(max) = self.max_response_time_ms {
            if max <= 0.0 {
                return Err(SelectionError::InvalidCriteria(format!(
                    "max_response_time_ms must be positive, got {}",
                    max
                )));
            }
        }
        if self.required_capabilities.iter().any(|c| c.trim().is_empty()) {
            return Err(SelectionError::InvalidCriteria(
                "required capability names cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Request to move an in-progress task to a better-suited agent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwitchRequest {
    pub id: String,
    pub current_task_id: String,
    pub current_agent_id: AgentId,
    pub session_id: String,
    pub reason: SwitchReason,
    pub urgency: Urgency,
    pub criteria: AgentSelectionCriteria,
    pub preservation_policy: ContextPreservationPolicy,
    pub requested_at: DateTime<Utc>,
}

impl SwitchRequest {
    pub fn new(
        current_task_id: impl Into<String>,
        current_agent_id: AgentId,
        session_id: impl Into<String>,
        reason: SwitchReason,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            current_task_id: current_task_id.into(),
            current_agent_id,
            session_id: session_id.into(),
            reason,
            urgency: Urgency::Medium,
            criteria: AgentSelectionCriteria::default(),
            preservation_policy: ContextPreservationPolicy::default(),
            requested_at: Utc::now(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_urgency(mut self, urgency: Urgency) -> Self {
        self.urgency = urgency;
        self
    }

    pub fn with_criteria(mut self, criteria: AgentSelectionCriteria) -> Self {
        self.criteria = criteria;
        self
    }

    pub fn with_preservation_policy(mut self, policy: ContextPreservationPolicy) -> Self {
        self.preservation_policy = policy;
        self
    }

    /// Borrowed view used by the scoring pipeline
    pub fn query(&self) -> SelectionQuery<'_> {
        SelectionQuery {
            request_id: Some(&self.id),
            criteria: &self.criteria,
            session_id: &self.session_id,
            current_agent_id: Some(&self.current_agent_id),
            reason: Some(self.reason),
            urgency: self.urgency,
            policy: &self.preservation_policy,
        }
    }
}

/// What the evaluators see of a request.
///
/// Advisory queries have no request id, current agent or reason.
#[derive(Debug, Clone, Copy)]
pub struct SelectionQuery<'a> {
    pub request_id: Option<&'a str>,
    pub criteria: &'a AgentSelectionCriteria,
    pub session_id: &'a str,
    pub current_agent_id: Option<&'a AgentId>,
    pub reason: Option<SwitchReason>,
    pub urgency: Urgency,
    pub policy: &'a ContextPreservationPolicy,
}

/// One candidate's evaluation result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSwitchProfile {
    pub agent_id: AgentId,
    pub name: String,
    pub agent_type: AgentType,
    pub capabilities: Vec<String>,
    /// Normalized ensemble score (0.0 - 1.0)
    pub score: f64,
    pub reasoning: Vec<String>,
    pub estimated_handoff_time_ms: u64,
    /// 0.0 - 1.0
    pub confidence_level: f64,
    pub specializations: Vec<String>,
    pub current_load: f64,
    pub performance: AgentPerformance,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskSeverity {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwitchRisk {
    pub description: String,
    pub severity: RiskSeverity,
    /// 0.0 - 1.0
    pub probability: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImpactEstimate {
    pub user_satisfaction_delta: f64,
    pub performance_delta: f64,
    pub time_to_completion_ms: u64,
    /// Bounds around the chosen score, within [0, 1]
    pub confidence_interval: (f64, f64),
}

/// Ranked answer to a switch request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwitchRecommendation {
    pub request_id: String,
    pub recommended_agent: AgentSwitchProfile,
    pub alternative_options: Vec<AgentSwitchProfile>,
    pub reasoning: Vec<String>,
    pub expected_benefits: Vec<String>,
    pub potential_risks: Vec<SwitchRisk>,
    pub estimated_impact: ImpactEstimate,
    pub selection_time_ms: u64,
    pub created_at: DateTime<Utc>,
}

/// Observed result of a switch, fed back into the scorer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwitchOutcome {
    pub success: bool,
    pub switch_duration_ms: u64,
    /// 0.0 - 1.0, when known
    pub user_satisfaction: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_workload_buckets() {
        assert!(WorkloadPreference::Low.accepts(0.1));
        assert!(!WorkloadPreference::Low.accepts(0.5));
        assert!(WorkloadPreference::Medium.accepts(0.5));
        assert!(!WorkloadPreference::High.accepts(1.0));
        assert!(WorkloadPreference::Any.accepts(1.0));
    }

    #[test]
    fn test_criteria_validation() {
        assert!(AgentSelectionCriteria::default().validate().is_ok());

        let bad_rate = AgentSelectionCriteria {
            min_success_rate: Some(1.5),
            ..Default::default()
        };
        assert!(matches!(bad_rate.validate(), Err(SelectionError::InvalidCriteria(_))));

        let bad_time = AgentSelectionCriteria {
            max_response_time_ms: Some(0.0),
            ..Default::default()
        };
        assert!(bad_time.validate().is_err());

        assert!(AgentSelectionCriteria::requiring(&[" "]).validate().is_err());
    }

    #[test]
    fn test_urgency_factor_ordering() {
        assert!(Urgency::Critical.time_factor() < Urgency::High.time_factor());
        assert!(Urgency::Low.time_factor() > Urgency::Medium.time_factor());
    }

    #[test]
    fn test_request_query_view() {
        let request = SwitchRequest::new("task-1", AgentId::from("a"), "s-1", SwitchReason::Escalation)
            .with_id("req-1")
            .with_urgency(Urgency::High);
        let query = request.query();

        assert_eq!(query.request_id, Some("req-1"));
        assert_eq!(query.current_agent_id, Some(&AgentId::from("a")));
        assert_eq!(query.urgency, Urgency::High);
    }
}
