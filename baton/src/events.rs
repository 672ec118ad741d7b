//! Handoff notifications
//!
//! Every observable side effect of selection and handoff is published as a
//! [`HandoffEvent`] on one [`EventBus`].
//!
//! - A `tokio::sync::broadcast` channel fans events out to subscribers
//! - Events are appended to a bounded history in publish order, so tests and
//!   late subscribers see a deterministic sequence
//! - Per-topic counters are kept for diagnostics

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, trace};

use crate::agents::AgentId;

/// Default number of events kept in history
const DEFAULT_EVENT_HISTORY: usize = 256;

/// Notification emitted by the selection scorer or the handoff coordinator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "topic")]
pub enum HandoffEvent {
    #[serde(rename = "handoff.progress")]
    Progress {
        request_id: String,
        phase: String,
        completed_phases: usize,
        total_phases: usize,
        estimated_completion: DateTime<Utc>,
    },

    #[serde(rename = "handoff.completed")]
    Completed {
        request_id: String,
        success: bool,
        duration_ms: u64,
        new_agent_id: Option<AgentId>,
    },

    #[serde(rename = "handoff.cancelled")]
    Cancelled {
        request_id: String,
        reason: String,
        phase: String,
    },

    #[serde(rename = "handoff.rolled_back")]
    RolledBack {
        request_id: String,
        reason: String,
        rollback_point: String,
        retry_count: u32,
    },

    #[serde(rename = "agent.selected")]
    AgentSelected {
        request_id: String,
        agent_id: AgentId,
        confidence: f64,
        selection_time_ms: u64,
    },

    #[serde(rename = "learning.outcome_processed")]
    OutcomeProcessed {
        request_id: String,
        agent_id: AgentId,
        success: bool,
        satisfaction: Option<f64>,
    },
}

impl HandoffEvent {
    /// Topic string of this event
    pub fn topic(&self) -> &'static str {
        match self {
            HandoffEvent::Progress { .. } => "handoff.progress",
            HandoffEvent::Completed { .. } => "handoff.completed",
            HandoffEvent::Cancelled { .. } => "handoff.cancelled",
            HandoffEvent::RolledBack { .. } => "handoff.rolled_back",
            HandoffEvent::AgentSelected { .. } => "agent.selected",
            HandoffEvent::OutcomeProcessed { .. } => "learning.outcome_processed",
        }
    }

    /// Request this event belongs to
    pub fn request_id(&self) -> &str {
        match self {
            HandoffEvent::Progress { request_id, .. }
            | HandoffEvent::Completed { request_id, .. }
            | HandoffEvent::Cancelled { request_id, .. }
            | HandoffEvent::RolledBack { request_id, .. }
            | HandoffEvent::AgentSelected { request_id, .. }
            | HandoffEvent::OutcomeProcessed { request_id, .. } => request_id,
        }
    }
}

/// Publish/subscribe bus for [`HandoffEvent`]s
pub struct EventBus {
    sender: broadcast::Sender<HandoffEvent>,
    history: Mutex<VecDeque<HandoffEvent>>,
    max_history: usize,
    counts: DashMap<&'static str, u64>,
}

impl EventBus {
    pub fn new(max_history: usize) -> Self {
        let (sender, _) = broadcast::channel(1024);
        Self {
            sender,
            history: Mutex::new(VecDeque::with_capacity(max_history)),
            max_history,
            counts: DashMap::new(),
        }
    }

    /// Receive every event published after this call
    pub fn subscribe(&self) -> broadcast::Receiver<HandoffEvent> {
        self.sender.subscribe()
    }

    /// Publish an event
    pub fn publish(&self, event: HandoffEvent) {
        let topic = event.topic();
        debug!(topic, request_id = event.request_id(), "Publishing handoff event");

        *self.counts.entry(topic).or_insert(0) += 1;

        {
            let mut history = self.history.lock();
            history.push_back(event.clone());
            while history.len() > self.max_history {
                history.pop_front();
            }
        }

        if self.sender.send(event).is_err() {
            trace!(topic, "No active subscribers");
        }
    }

    /// Events in publish order, oldest first
    pub fn history(&self) -> Vec<HandoffEvent> {
        self.history.lock().iter().cloned().collect()
    }

    /// Events of one request, oldest first
    pub fn history_for(&self, request_id: &str) -> Vec<HandoffEvent> {
        self.history
            .lock()
            .iter()
            .filter(|e| e.request_id() == request_id)
            .cloned()
            .collect()
    }

    /// Published event count per topic
    pub fn counts(&self) -> HashMap<String, u64> {
        self.counts
            .iter()
            .map(|entry| (entry.key().to_string(), *entry.value()))
            .collect()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_HISTORY)
    }
}
