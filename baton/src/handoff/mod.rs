//! Seamless Handoff
//!
//! Moves an in-progress task from one agent to another through a fixed
//! sequence of phases, with rollback while the move is still reversible.
//!
//! # Features
//!
//! - Strictly ordered phases with per-phase timing and progress events
//! - Rollback to the last reversible phase, with bounded retries
//! - Explicit and timeout-driven cancellation through one code path
//! - Seamlessness scoring fed back into agent selection
//! - Bounded per-agent result history and lifetime statistics

pub mod types;
pub mod phases;
pub mod coordinator;

pub use types::*;
pub use phases::{Phase, TOTAL_PHASES, seamlessness_score};
pub use coordinator::*;

use crate::selection::SelectionError;

/// Result type for handoff operations
pub type Result<T> = std::result::Result<T, HandoffError>;

/// Handoff errors
#[derive(Debug, thiserror::Error)]
pub enum HandoffError {
    #[error("Handoff not found: {request_id}")]
    NotFound { request_id: String },

    #[error("Handoff already active: {request_id}")]
    AlreadyActive { request_id: String },

    #[error("Context preservation failed: {0}")]
    Preservation(String),

    #[error("Agent selection failed: {0}")]
    Selection(#[from] SelectionError),

    #[error("Agent preparation failed: {0}")]
    Preparation(String),

    #[error("Context transfer failed: {0}")]
    Transfer(String),

    #[error("Finalization failed: {0}")]
    Finalization(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl HandoffError {
    /// Recorded error code, `None` when only the failing phase can tell
    pub fn code(&self) -> Option<HandoffErrorCode> {
        let code = match self {
            HandoffError::NotFound { .. } | HandoffError::AlreadyActive { .. } => {
                HandoffErrorCode::Validation
            }
            HandoffError::Preservation(_) => HandoffErrorCode::Preservation,
            HandoffError::Selection(
                SelectionError::NoCandidates { .. } | SelectionError::InvalidCriteria(_),
            ) => HandoffErrorCode::Validation,
            HandoffError::Selection(_) => HandoffErrorCode::Selection,
            HandoffError::Preparation(_) => HandoffErrorCode::Preparation,
            HandoffError::Transfer(_) => HandoffErrorCode::Transfer,
            HandoffError::Finalization(_) => HandoffErrorCode::Finalization,
            HandoffError::Other(_) => return None,
        };
        Some(code)
    }
}
