//! Core Agent Types and Data Structures

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique identifier for an agent
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AgentId(String);

impl AgentId {
    /// Create a new unique agent ID
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from string (for deserialization/testing)
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Borrow the raw identifier
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for AgentId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for AgentId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Classification of agent types
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentType {
    /// Master coordination and task delegation
    Orchestrator,

    /// Code generation, modification, and refactoring
    Developer,

    /// Code review, quality assessment, and validation
    Reviewer,

    /// Test generation, execution, and validation
    Tester,

    /// Documentation generation and maintenance
    Documenter,

    /// System design and architecture planning
    Architect,

    /// Information gathering and analysis
    Researcher,

    /// Customer-facing conversational support
    Support,

    /// Deployment-specific agent type
    Custom(String),
}

impl fmt::Display for AgentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AgentType::Orchestrator => write!(f, "orchestrator"),
            AgentType::Developer => write!(f, "developer"),
            AgentType::Reviewer => write!(f, "reviewer"),
            AgentType::Tester => write!(f, "tester"),
            AgentType::Documenter => write!(f, "documenter"),
            AgentType::Architect => write!(f, "architect"),
            AgentType::Researcher => write!(f, "researcher"),
            AgentType::Support => write!(f, "support"),
            AgentType::Custom(name) => write!(f, "{}", name),
        }
    }
}

/// Current status of an agent as reported by the directory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    /// Online with no assigned task
    Idle,

    /// Online and owning at least one task
    Active,

    /// Online but saturated
    Busy,

    /// Not reachable
    Offline,

    /// Failed and needs intervention
    Error,
}

impl AgentStatus {
    /// Whether the agent is reachable at all
    pub fn is_online(&self) -> bool {
        matches!(self, AgentStatus::Idle | AgentStatus::Active | AgentStatus::Busy)
    }

    /// Whether the agent can take over a task right now
    pub fn accepts_handoff(&self) -> bool {
        matches!(self, AgentStatus::Idle | AgentStatus::Active)
    }
}

/// Live performance counters for one agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentPerformance {
    /// Success rate (0.0 - 1.0)
    pub success_rate: f64,

    /// Average response time in milliseconds
    pub average_response_time_ms: f64,

    /// Current load (0.0 - 1.0)
    pub current_load: f64,

    /// Error rate (0.0 - 1.0)
    pub error_rate: f64,

    /// Mean user satisfaction (0.0 - 1.0)
    pub user_satisfaction: f64,

    /// Tasks currently assigned
    pub current_tasks: u32,

    /// Maximum concurrent tasks
    pub max_concurrent_tasks: u32,

    /// Lifetime task count
    pub total_tasks: u64,
}

impl AgentPerformance {
    /// Whether the agent has no free task slot
    pub fn is_at_capacity(&self) -> bool {
        self.current_tasks >= self.max_concurrent_tasks
    }
}

impl Default for AgentPerformance {
    fn default() -> Self {
        Self {
            success_rate: 1.0,
            average_response_time_ms: 1000.0,
            current_load: 0.0,
            error_rate: 0.0,
            user_satisfaction: 0.8,
            current_tasks: 0,
            max_concurrent_tasks: 4,
            total_tasks: 0,
        }
    }
}

/// Directory record for one agent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: AgentId,
    pub name: String,
    pub agent_type: AgentType,
    pub capabilities: Vec<String>,
    pub status: AgentStatus,
    pub performance: AgentPerformance,
}

impl Agent {
    /// Create an idle agent with default performance counters
    pub fn new(id: impl Into<String>, agent_type: AgentType, capabilities: Vec<String>) -> Self {
        let id = AgentId::from_string(id);
        Self {
            name: id.to_string(),
            id,
            agent_type,
            capabilities,
            status: AgentStatus::Idle,
            performance: AgentPerformance::default(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_status(mut self, status: AgentStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_performance(mut self, performance: AgentPerformance) -> Self {
        self.performance = performance;
        self
    }

    /// Check a single capability
    pub fn has_capability(&self, capability: &str) -> bool {
        self.capabilities.iter().any(|c| c == capability)
    }

    /// Check that every required capability is present
    pub fn has_all_capabilities(&self, required: &[String]) -> bool {
        required.iter().all(|c| self.has_capability(c))
    }
}
