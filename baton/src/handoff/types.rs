//! Handoff state, progress and result shapes

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::agents::{AgentId, AgentStatus};
use crate::context::ContextHandle;

use super::phases::INITIATED;

/// Lifecycle of one handoff
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandoffStatus {
    Initiated,
    ContextPreserving,
    AgentSelecting,
    AgentPreparing,
    ContextTransferring,
    Finalizing,
    Completed,
    Failed,
    RollingBack,
    RolledBack,
}

impl HandoffStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            HandoffStatus::Completed | HandoffStatus::Failed | HandoffStatus::RolledBack
        )
    }
}

/// Category of a recorded handoff error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandoffErrorCode {
    /// No candidates, malformed criteria, duplicate request id
    Validation,
    Preservation,
    /// Scoring pipeline exhausted
    Selection,
    /// Target inactive, over capacity or not acknowledging
    Preparation,
    Transfer,
    /// Directory status flip after the context landed
    Finalization,
    Timeout,
    Rollback,
    Cancelled,
}

/// Structured error recorded in [`HandoffProgress::errors`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandoffErrorEntry {
    pub code: HandoffErrorCode,
    pub message: String,
    /// Caller may retry or intervene manually
    pub recoverable: bool,
    pub phase: String,
    pub timestamp: DateTime<Utc>,
}

impl HandoffErrorEntry {
    pub fn new(code: HandoffErrorCode, message: impl Into<String>, recoverable: bool, phase: &str) -> Self {
        Self {
            code,
            message: message.into(),
            recoverable,
            phase: phase.to_string(),
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandoffProgress {
    pub current_phase: String,
    pub total_phases: usize,
    pub completed_phases: usize,
    pub started_at: DateTime<Utc>,
    pub estimated_completion: DateTime<Utc>,
    pub errors: Vec<HandoffErrorEntry>,
    pub warnings: Vec<String>,
}

/// Agent state captured before the handoff touched anything
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollbackSnapshot {
    pub source_agent_id: AgentId,
    /// Source status read before the first phase, if it could be read
    pub source_status: Option<AgentStatus>,
    pub captured_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollbackInfo {
    /// Last completed phase that can still be undone, `initiated` before the first
    pub rollback_point: Option<String>,
    pub retry_count: u32,
    pub max_retries: u32,
    pub snapshot: RollbackSnapshot,
    /// Cleared for good once an irreversible phase starts
    pub can_rollback: bool,
}

impl RollbackInfo {
    pub fn new(source_agent_id: AgentId, max_retries: u32) -> Self {
        Self {
            rollback_point: Some(INITIATED.to_string()),
            retry_count: 0,
            max_retries,
            snapshot: RollbackSnapshot {
                source_agent_id,
                source_status: None,
                captured_at: Utc::now(),
            },
            can_rollback: true,
        }
    }

    pub fn can_retry(&self) -> bool {
        self.can_rollback && self.retry_count < self.max_retries
    }
}

/// Timings and quality figures; zero where not measured
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HandoffMetrics {
    pub preservation_time_ms: u64,
    pub selection_time_ms: u64,
    pub preparation_time_ms: u64,
    pub transfer_time_ms: u64,
    pub finalization_time_ms: u64,
    pub total_time_ms: u64,
    pub compression_ratio: f64,
    pub selection_confidence: f64,
    pub seamlessness_score: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandoffLogEntry {
    pub timestamp: DateTime<Utc>,
    pub phase: String,
    pub message: String,
}

/// Full record of one handoff while it is active
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandoffState {
    pub request_id: String,
    pub task_id: String,
    pub session_id: String,
    pub status: HandoffStatus,
    pub source_agent_id: AgentId,
    pub target_agent_id: Option<AgentId>,
    pub preserved_context: Option<ContextHandle>,
    pub progress: HandoffProgress,
    /// `None` when rollback is disabled
    pub rollback: Option<RollbackInfo>,
    pub metrics: HandoffMetrics,
    pub log: Vec<HandoffLogEntry>,
}

impl HandoffState {
    pub fn log(&mut self, phase: &str, message: impl Into<String>) {
        self.log.push(HandoffLogEntry {
            timestamp: Utc::now(),
            phase: phase.to_string(),
            message: message.into(),
        });
    }

    pub fn can_rollback(&self) -> bool {
        self.rollback
            .as_ref()
            .is_some_and(|r| r.can_rollback && r.rollback_point.is_some())
    }
}

/// What `initiate_handoff` hands back, success or not
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwitchResult {
    pub request_id: String,
    pub success: bool,
    pub status: HandoffStatus,
    pub previous_agent_id: AgentId,
    pub new_task_id: Option<String>,
    pub new_agent_id: Option<AgentId>,
    pub completed_phases: usize,
    pub total_phases: usize,
    pub metrics: HandoffMetrics,
    pub errors: Vec<HandoffErrorEntry>,
    pub warnings: Vec<String>,
    /// Phase log, empty unless detailed logs are retained
    pub log: Vec<HandoffLogEntry>,
    pub completed_at: DateTime<Utc>,
    pub duration_ms: u64,
}

// ============================================================================
// Statistics
// ============================================================================

/// Lifetime counters of a coordinator
pub struct StatisticsCollector {
    initiated: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    rolled_back: AtomicU64,
    cancelled: AtomicU64,
    timed_out: AtomicU64,
    total_duration_ms: AtomicU64,
    /// Seamlessness of completed handoffs, in thousandths
    total_seamlessness_milli: AtomicU64,
}

impl StatisticsCollector {
    pub fn new() -> Self {
        Self {
            initiated: AtomicU64::new(0),
            completed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            rolled_back: AtomicU64::new(0),
            cancelled: AtomicU64::new(0),
            timed_out: AtomicU64::new(0),
            total_duration_ms: AtomicU64::new(0),
            total_seamlessness_milli: AtomicU64::new(0),
        }
    }

    pub fn record_initiated(&self) {
        self.initiated.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cancelled(&self, timed_out: bool) {
        self.cancelled.fetch_add(1, Ordering::Relaxed);
        if timed_out {
            self.timed_out.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_result(&self, result: &SwitchResult) {
        self.total_duration_ms.fetch_add(result.duration_ms, Ordering::Relaxed);
        match result.status {
            HandoffStatus::Completed => {
                self.completed.fetch_add(1, Ordering::Relaxed);
                let milli = (result.metrics.seamlessness_score.clamp(0.0, 1.0) * 1000.0).round() as u64;
                self.total_seamlessness_milli.fetch_add(milli, Ordering::Relaxed);
            }
            HandoffStatus::RolledBack => {
                self.rolled_back.fetch_add(1, Ordering::Relaxed);
            }
            _ => {
                self.failed.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub fn snapshot(&self) -> HandoffStatistics {
        let completed = self.completed.load(Ordering::Relaxed);
        let finished = completed
            + self.failed.load(Ordering::Relaxed)
            + self.rolled_back.load(Ordering::Relaxed);

        HandoffStatistics {
            initiated: self.initiated.load(Ordering::Relaxed),
            completed,
            failed: self.failed.load(Ordering::Relaxed),
            rolled_back: self.rolled_back.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
            timed_out: self.timed_out.load(Ordering::Relaxed),
            average_duration_ms: if finished > 0 {
                self.total_duration_ms.load(Ordering::Relaxed) / finished
            } else {
                0
            },
            average_seamlessness: if completed > 0 {
                self.total_seamlessness_milli.load(Ordering::Relaxed) as f64 / 1000.0 / completed as f64
            } else {
                0.0
            },
            timestamp: Utc::now(),
        }
    }
}

impl Default for StatisticsCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandoffStatistics {
    pub initiated: u64,
    pub completed: u64,
    pub failed: u64,
    pub rolled_back: u64,
    pub cancelled: u64,
    pub timed_out: u64,
    pub average_duration_ms: u64,
    pub average_seamlessness: f64,
    pub timestamp: DateTime<Utc>,
}
