//! Agent Directory - source of truth for agent identity, status and counters
//!
//! The handoff core only reads from the directory, apart from status flips
//! during finalization and rollback. Deployments plug their own registry in
//! through [`AgentDirectory`]; [`InMemoryAgentDirectory`] backs tests and
//! single-process setups.

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{Agent, AgentError, AgentId, AgentPerformance, AgentStatus, AgentType, Result};

/// Notice delivered to a target agent while it is being prepared
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandoffNotice {
    pub request_id: String,
    pub task_id: String,
    pub session_id: String,
    pub source_agent_id: AgentId,
    pub context_handle: Option<String>,
}

/// Read-mostly view of the agent fleet
#[async_trait]
pub trait AgentDirectory: Send + Sync {
    /// Look up one agent
    async fn get_agent(&self, id: &AgentId) -> Result<Option<Agent>>;

    /// Change an agent's status
    async fn update_agent_status(&self, id: &AgentId, status: AgentStatus) -> Result<()>;

    /// All agents that are currently online
    async fn get_active_agents(&self) -> Result<Vec<Agent>>;

    /// Online agents advertising a capability
    async fn get_agents_by_capability(&self, capability: &str) -> Result<Vec<Agent>> {
        Ok(self
            .get_active_agents()
            .await?
            .into_iter()
            .filter(|a| a.has_capability(capability))
            .collect())
    }

    /// Online agents of a given type
    async fn get_agents_by_type(&self, agent_type: &AgentType) -> Result<Vec<Agent>> {
        Ok(self
            .get_active_agents()
            .await?
            .into_iter()
            .filter(|a| &a.agent_type == agent_type)
            .collect())
    }

    /// Tell the target agent a handoff is coming.
    ///
    /// Returns whether the agent acknowledged the notice.
    async fn notify_handoff(&self, _target: &AgentId, _notice: &HandoffNotice) -> Result<bool> {
        Ok(true)
    }

    /// Warm up whatever the target needs before the context lands
    async fn preload_resources(&self, _target: &AgentId, _context_handle: Option<&str>) -> Result<()> {
        Ok(())
    }
}

/// Concurrent in-memory directory
#[derive(Default)]
pub struct InMemoryAgentDirectory {
    agents: DashMap<AgentId, Agent>,
}

impl InMemoryAgentDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a directory pre-populated with agents
    pub fn with_agents(agents: impl IntoIterator<Item = Agent>) -> Self {
        let directory = Self::new();
        for agent in agents {
            directory.register(agent);
        }
        directory
    }

    /// Register or replace an agent
    pub fn register(&self, agent: Agent) {
        debug!("Registering agent: {} ({})", agent.id, agent.agent_type);
        self.agents.insert(agent.id.clone(), agent);
    }

    /// Remove an agent
    pub fn unregister(&self, id: &AgentId) -> Option<Agent> {
        self.agents.remove(id).map(|(_, agent)| agent)
    }

    /// Replace an agent's live counters
    pub fn update_performance(&self, id: &AgentId, performance: AgentPerformance) -> Result<()> {
        let mut entry = self
            .agents
            .get_mut(id)
            .ok_or_else(|| AgentError::NotFound(id.to_string()))?;
        entry.performance = performance;
        Ok(())
    }

    /// Snapshot of an agent's status, if known
    pub fn status_of(&self, id: &AgentId) -> Option<AgentStatus> {
        self.agents.get(id).map(|a| a.status)
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}

#[async_trait]
impl AgentDirectory for InMemoryAgentDirectory {
    async fn get_agent(&self, id: &AgentId) -> Result<Option<Agent>> {
        Ok(self.agents.get(id).map(|a| a.clone()))
    }

    async fn update_agent_status(&self, id: &AgentId, status: AgentStatus) -> Result<()> {
        let mut entry = self
            .agents
            .get_mut(id)
            .ok_or_else(|| AgentError::NotFound(id.to_string()))?;
        info!("Agent {} status {:?} -> {:?}", id, entry.status, status);
        entry.status = status;
        Ok(())
    }

    async fn get_active_agents(&self) -> Result<Vec<Agent>> {
        let mut agents: Vec<Agent> = self
            .agents
            .iter()
            .filter(|a| a.status.is_online())
            .map(|a| a.clone())
            .collect();
        agents.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(agents)
    }
}
