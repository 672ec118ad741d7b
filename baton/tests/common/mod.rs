//! Common test utilities for Baton tests
//!
//! Fakes for the agent directory and the context preservation provider,
//! plus builders for agents, requests and a wired coordinator.

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;

use baton::agents::{self, *};
use baton::config::{HandoffConfig, SelectionConfig};
use baton::context::{self, *};
use baton::events::{EventBus, HandoffEvent};
use baton::handoff::SeamlessHandoff;
use baton::selection::*;

// ============================================================================
// Directory
// ============================================================================

/// In-memory directory with injectable faults and a call log
pub struct ScriptedDirectory {
    inner: InMemoryAgentDirectory,
    hanging_notify: Mutex<HashSet<AgentId>>,
    acknowledge: AtomicBool,
    status_failures: AtomicU32,
    status_updates: Mutex<Vec<(AgentId, AgentStatus)>>,
    notify_calls: AtomicUsize,
    preload_calls: AtomicUsize,
}

impl ScriptedDirectory {
    pub fn new(agents: Vec<Agent>) -> Self {
        Self {
            inner: InMemoryAgentDirectory::with_agents(agents),
            hanging_notify: Mutex::new(HashSet::new()),
            acknowledge: AtomicBool::new(true),
            status_failures: AtomicU32::new(0),
            status_updates: Mutex::new(Vec::new()),
            notify_calls: AtomicUsize::new(0),
            preload_calls: AtomicUsize::new(0),
        }
    }

    /// Make handoff notices to `agent_id` never return
    pub fn hang_notify(&self, agent_id: &str) {
        self.hanging_notify.lock().insert(AgentId::from(agent_id));
    }

    pub fn set_acknowledge(&self, acknowledge: bool) {
        self.acknowledge.store(acknowledge, Ordering::SeqCst);
    }

    /// Fail the next `count` status updates
    pub fn fail_status_updates(&self, count: u32) {
        self.status_failures.store(count, Ordering::SeqCst);
    }

    pub fn status_updates(&self) -> Vec<(AgentId, AgentStatus)> {
        self.status_updates.lock().clone()
    }

    pub fn status_of(&self, agent_id: &str) -> Option<AgentStatus> {
        self.inner.status_of(&AgentId::from(agent_id))
    }

    pub fn notify_calls(&self) -> usize {
        self.notify_calls.load(Ordering::SeqCst)
    }

    pub fn preload_calls(&self) -> usize {
        self.preload_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AgentDirectory for ScriptedDirectory {
    async fn get_agent(&self, id: &AgentId) -> agents::Result<Option<Agent>> {
        self.inner.get_agent(id).await
    }

    async fn update_agent_status(&self, id: &AgentId, status: AgentStatus) -> agents::Result<()> {
        let injected = self
            .status_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(AgentError::CommunicationError(format!("status update for {} dropped", id)));
        }

        self.inner.update_agent_status(id, status).await?;
        self.status_updates.lock().push((id.clone(), status));
        Ok(())
    }

    async fn get_active_agents(&self) -> agents::Result<Vec<Agent>> {
        self.inner.get_active_agents().await
    }

    async fn notify_handoff(&self, target: &AgentId, _notice: &HandoffNotice) -> agents::Result<bool> {
        self.notify_calls.fetch_add(1, Ordering::SeqCst);
        let hang = self.hanging_notify.lock().contains(target);
        if hang {
            std::future::pending::<()>().await;
        }
        Ok(self.acknowledge.load(Ordering::SeqCst))
    }

    async fn preload_resources(&self, _target: &AgentId, _context_handle: Option<&str>) -> agents::Result<()> {
        self.preload_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// ============================================================================
// Context provider
// ============================================================================

/// Per-session behavior of the fake provider
#[derive(Debug, Clone, Copy, Default)]
pub struct SessionScript {
    pub fail_preservation: bool,
    pub fail_restore: bool,
    pub hang_restore: bool,
    pub delay: Option<Duration>,
}

#[derive(Default)]
pub struct ScriptedContextProvider {
    scripts: Mutex<std::collections::HashMap<String, SessionScript>>,
    restore_calls: AtomicUsize,
}

impl ScriptedContextProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(&self, session_id: &str, script: SessionScript) {
        self.scripts.lock().insert(session_id.to_string(), script);
    }

    pub fn restore_calls(&self) -> usize {
        self.restore_calls.load(Ordering::SeqCst)
    }

    fn script_for(&self, session_id: &str) -> SessionScript {
        self.scripts.lock().get(session_id).copied().unwrap_or_default()
    }
}

#[async_trait]
impl ContextPreservationProvider for ScriptedContextProvider {
    async fn preserve_context_for_handoff(
        &self,
        agent_id: &AgentId,
        session_id: &str,
        _policy: &ContextPreservationPolicy,
    ) -> context::Result<PreservationOutcome> {
        let script = self.script_for(session_id);
        if let Some(delay) = script.delay {
            tokio::time::sleep(delay).await;
        }
        if script.fail_preservation {
            return Ok(PreservationOutcome::failed(format!("snapshot store unavailable for {}", session_id)));
        }

        Ok(PreservationOutcome::succeeded(
            ContextHandle {
                id: format!("ctx-{}-{}", session_id, agent_id),
                source_agent_id: agent_id.clone(),
                session_id: session_id.to_string(),
                created_at: Utc::now(),
            },
            0.4,
        ))
    }

    async fn generate_handoff_summary(
        &self,
        handle: &ContextHandle,
        target_agent_id: &AgentId,
        _policy: &ContextPreservationPolicy,
    ) -> context::Result<HandoffSummary> {
        Ok(HandoffSummary {
            handle_id: handle.id.clone(),
            target_agent_id: target_agent_id.clone(),
            summary: format!("Continue work from {}", handle.source_agent_id),
            key_points: vec!["tests are green".to_string(), "review pending".to_string()],
            token_count: 128,
        })
    }

    async fn restore_context_for_agent(
        &self,
        handle: &ContextHandle,
        _target_agent_id: &AgentId,
        session_id: &str,
    ) -> context::Result<bool> {
        self.restore_calls.fetch_add(1, Ordering::SeqCst);
        let script = self.script_for(session_id);
        if script.hang_restore {
            std::future::pending::<()>().await;
        }
        if script.fail_restore {
            return Ok(false);
        }
        Ok(handle.session_id == session_id)
    }
}

// ============================================================================
// Builders
// ============================================================================

/// Create an idle test agent with specific capabilities
pub fn create_test_agent(id: &str, capabilities: &[&str]) -> Agent {
    Agent::new(
        id,
        AgentType::Developer,
        capabilities.iter().map(|c| c.to_string()).collect(),
    )
}

/// Create a test agent with explicit load and success rate
pub fn create_loaded_agent(id: &str, capabilities: &[&str], load: f64, success_rate: f64) -> Agent {
    create_test_agent(id, capabilities).with_performance(AgentPerformance {
        current_load: load,
        success_rate,
        ..Default::default()
    })
}

/// Switch request from `source` requiring `capabilities`
pub fn switch_request(id: &str, source: &str, session: &str, capabilities: &[&str]) -> SwitchRequest {
    SwitchRequest::new(format!("task-{}", id), AgentId::from(source), session, SwitchReason::Escalation)
        .with_id(id)
        .with_criteria(AgentSelectionCriteria::requiring(capabilities))
}

/// Coordinator wired to the fakes
pub struct Harness {
    pub coordinator: Arc<SeamlessHandoff>,
    pub directory: Arc<ScriptedDirectory>,
    pub provider: Arc<ScriptedContextProvider>,
    pub events: Arc<EventBus>,
}

impl Harness {
    pub fn new(agents: Vec<Agent>, config: HandoffConfig) -> Self {
        let directory = Arc::new(ScriptedDirectory::new(agents));
        let provider = Arc::new(ScriptedContextProvider::new());
        let events = Arc::new(EventBus::new(1024));
        let selector = Arc::new(SmartAgentSelection::new(
            directory.clone(),
            events.clone(),
            SelectionConfig::default(),
        ));
        let coordinator = Arc::new(SeamlessHandoff::new(
            directory.clone(),
            provider.clone(),
            selector,
            events.clone(),
            config,
        ));

        Self {
            coordinator,
            directory,
            provider,
            events,
        }
    }

    /// Source agent `source` (active, legacy skills) and one `rust` candidate `target`
    pub fn with_pair(config: HandoffConfig) -> Self {
        Self::new(
            vec![
                create_test_agent("source", &["legacy"]).with_status(AgentStatus::Active),
                create_test_agent("target", &["rust"]),
            ],
            config,
        )
    }

    /// Topics published for one request, in order
    pub fn topics_for(&self, request_id: &str) -> Vec<&'static str> {
        self.events
            .history_for(request_id)
            .iter()
            .map(HandoffEvent::topic)
            .collect()
    }

    /// Wait until an in-flight handoff reaches `phase`
    pub async fn wait_for_phase(&self, request_id: &str, phase: &str) {
        loop {
            if let Some(progress) = self.coordinator.get_handoff_progress(request_id) {
                if progress.current_phase == phase {
                    return;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}
