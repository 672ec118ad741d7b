//! System load snapshots consumed by the selection scorer

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::agents::{AgentDirectory, AgentId, AgentStatus};

/// Fleet-wide load and health figures
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemSnapshot {
    pub total_agents: usize,
    pub active_agents: usize,
    pub average_load: f64,
    /// 0.0 (everything failing) - 1.0 (healthy)
    pub overall_health: f64,
    pub load_distribution: HashMap<AgentId, f64>,
    pub captured_at: DateTime<Utc>,
}

impl SystemSnapshot {
    pub fn empty() -> Self {
        Self {
            total_agents: 0,
            active_agents: 0,
            average_load: 0.0,
            overall_health: 1.0,
            load_distribution: HashMap::new(),
            captured_at: Utc::now(),
        }
    }
}

/// Read-only source of load figures
#[async_trait]
pub trait LoadMonitor: Send + Sync {
    async fn system_snapshot(&self) -> anyhow::Result<SystemSnapshot>;
}

/// Derives load figures from the agent directory's live counters
pub struct DirectoryLoadMonitor {
    directory: Arc<dyn AgentDirectory>,
}

impl DirectoryLoadMonitor {
    pub fn new(directory: Arc<dyn AgentDirectory>) -> Self {
        Self { directory }
    }
}

#[async_trait]
impl LoadMonitor for DirectoryLoadMonitor {
    async fn system_snapshot(&self) -> anyhow::Result<SystemSnapshot> {
        let agents = self.directory.get_active_agents().await?;
        if agents.is_empty() {
            return Ok(SystemSnapshot::empty());
        }

        let load_distribution: HashMap<AgentId, f64> = agents
            .iter()
            .map(|a| (a.id.clone(), a.performance.current_load.clamp(0.0, 1.0)))
            .collect();
        let average_load = load_distribution.values().sum::<f64>() / agents.len() as f64;
        let overall_health =
            agents.iter().map(|a| 1.0 - a.performance.error_rate.clamp(0.0, 1.0)).sum::<f64>()
                / agents.len() as f64;
        let active_agents = agents.iter().filter(|a| a.status == AgentStatus::Active).count();

        Ok(SystemSnapshot {
            total_agents: agents.len(),
            active_agents,
            average_load,
            overall_health,
            load_distribution,
            captured_at: Utc::now(),
        })
    }
}
