//! Agent Directory Types
//!
//! Identity, capability, status and live counters of the agents a handoff
//! moves work between. The directory itself is an external collaborator; the
//! handoff core consumes it through [`AgentDirectory`].

pub mod types;
pub mod directory;

pub use types::*;
pub use directory::*;

/// Result type for agent directory operations
pub type Result<T> = std::result::Result<T, AgentError>;

/// Agent directory errors
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("Agent not found: {0}")]
    NotFound(String),

    #[error("Communication error: {0}")]
    CommunicationError(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
