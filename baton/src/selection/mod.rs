//! Agent Selection
//!
//! Ranks candidate agents for a task switch and learns from how switches
//! turn out.
//!
//! # Features
//!
//! - Criteria filtering (capabilities, types, exclusions, thresholds, load bucket)
//! - Pluggable weighted scoring algorithms with failure isolation
//! - Confidence, latency, benefit and risk estimation per recommendation
//! - Bounded weight tuning from observed switch outcomes
//! - Per-agent, per-session and case-based history

pub mod types;
pub mod context;
pub mod algorithms;
pub mod scorer;

pub use types::*;
pub use context::*;
pub use algorithms::{AgentEvaluator, AlgorithmRegistry, EnsembleScore, evaluator_fn};
pub use scorer::*;

use crate::agents::AgentError;

/// Result type for selection operations
pub type Result<T> = std::result::Result<T, SelectionError>;

/// Agent selection errors
#[derive(Debug, thiserror::Error)]
pub enum SelectionError {
    #[error("No agent satisfies the selection criteria for request {request_id}")]
    NoCandidates { request_id: String },

    #[error("Invalid selection criteria: {0}")]
    InvalidCriteria(String),

    #[error("No scoring algorithm could evaluate any candidate for request {request_id}")]
    Exhausted { request_id: String },

    #[error("Agent directory error: {0}")]
    Directory(#[from] AgentError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
