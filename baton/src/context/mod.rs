//! Context Preservation
//!
//! Snapshotting and re-materializing the conversational/task state that
//! travels with a handoff. Storage, indexing and compression live behind
//! [`ContextPreservationProvider`]; the handoff core only sequences the calls.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::agents::AgentId;

/// Result type for context preservation operations
pub type Result<T> = std::result::Result<T, ContextError>;

/// Context preservation errors
#[derive(Debug, thiserror::Error)]
pub enum ContextError {
    #[error("Context not found: {0}")]
    NotFound(String),

    #[error("Summary generation failed: {0}")]
    SummaryFailed(String),

    #[error("Context restore failed: {0}")]
    RestoreFailed(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// What parts of the current session must survive the handoff
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextPreservationPolicy {
    /// Carry the entire context rather than a digest
    pub preserve_full_context: bool,

    /// Carry the conversation transcript
    pub preserve_conversation_history: bool,

    /// Carry learned user preferences
    pub preserve_user_preferences: bool,

    /// Carry task progress markers
    pub preserve_task_progress: bool,

    /// Compression level requested from the provider (0 = none, 9 = max)
    pub compression_level: u8,
}

impl Default for ContextPreservationPolicy {
    fn default() -> Self {
        Self {
            preserve_full_context: false,
            preserve_conversation_history: true,
            preserve_user_preferences: true,
            preserve_task_progress: true,
            compression_level: 5,
        }
    }
}

impl ContextPreservationPolicy {
    /// Preserve everything, uncompressed
    pub fn full() -> Self {
        Self {
            preserve_full_context: true,
            preserve_conversation_history: true,
            preserve_user_preferences: true,
            preserve_task_progress: true,
            compression_level: 0,
        }
    }

    /// Relative cost of moving a context under this policy
    pub fn complexity_factor(&self) -> f64 {
        if self.preserve_full_context {
            1.5
        } else if self.preserve_conversation_history {
            1.2
        } else {
            1.0
        }
    }
}

/// Durable handle to a preserved snapshot
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContextHandle {
    pub id: String,
    pub source_agent_id: AgentId,
    pub session_id: String,
    pub created_at: DateTime<Utc>,
}

/// Outcome of a preservation call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreservationOutcome {
    pub success: bool,
    pub handle: Option<ContextHandle>,
    pub compression_ratio: f64,
    pub errors: Vec<String>,
}

impl PreservationOutcome {
    pub fn succeeded(handle: ContextHandle, compression_ratio: f64) -> Self {
        Self {
            success: true,
            handle: Some(handle),
            compression_ratio,
            errors: Vec::new(),
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            handle: None,
            compression_ratio: 0.0,
            errors: vec![error.into()],
        }
    }
}

/// Transferable digest of a preserved context
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandoffSummary {
    pub handle_id: String,
    pub target_agent_id: AgentId,
    pub summary: String,
    pub key_points: Vec<String>,
    pub token_count: usize,
}

/// External provider of context snapshots
#[async_trait]
pub trait ContextPreservationProvider: Send + Sync {
    /// Snapshot the current session of `agent_id`
    async fn preserve_context_for_handoff(
        &self,
        agent_id: &AgentId,
        session_id: &str,
        policy: &ContextPreservationPolicy,
    ) -> Result<PreservationOutcome>;

    /// Produce the digest the target agent starts from
    async fn generate_handoff_summary(
        &self,
        handle: &ContextHandle,
        target_agent_id: &AgentId,
        policy: &ContextPreservationPolicy,
    ) -> Result<HandoffSummary>;

    /// Materialize the snapshot for the target agent
    async fn restore_context_for_agent(
        &self,
        handle: &ContextHandle,
        target_agent_id: &AgentId,
        session_id: &str,
    ) -> Result<bool>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_complexity_factor() {
        assert_eq!(ContextPreservationPolicy::full().complexity_factor(), 1.5);
        assert_eq!(ContextPreservationPolicy::default().complexity_factor(), 1.2);

        let minimal = ContextPreservationPolicy {
            preserve_full_context: false,
            preserve_conversation_history: false,
            ..Default::default()
        };
        assert_eq!(minimal.complexity_factor(), 1.0);
    }

    #[test]
    fn test_failed_outcome_has_no_handle() {
        let outcome = PreservationOutcome::failed("disk full");
        assert!(!outcome.success);
        assert!(outcome.handle.is_none());
        assert_eq!(outcome.errors, vec!["disk full".to_string()]);
    }
}
