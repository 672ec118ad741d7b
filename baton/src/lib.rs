//! Baton - Agent Selection and Seamless Handoff
//!
//! Baton decides which agent should take over an in-progress task and moves
//! the task there without losing its context.
//!
//! # Architecture
//!
//! - `agents` - Agent identity, status and the directory interface
//! - `context` - Context preservation policy and provider interface
//! - `load` - Fleet load snapshots
//! - `selection` - Weighted, self-tuning agent selection
//! - `handoff` - Phased handoff coordinator with rollback and timeouts
//! - `events` - Notifications emitted by selection and handoff
//! - `config` - TOML-backed configuration
//! - `logging` - Tracing subscriber setup

pub mod agents;
pub mod context;
pub mod load;
pub mod selection;
pub mod handoff;
pub mod events;
pub mod config;
pub mod logging;

pub use agents::{Agent, AgentDirectory, AgentId, AgentStatus, AgentType};
pub use config::BatonConfig;
pub use context::{ContextPreservationPolicy, ContextPreservationProvider};
pub use events::{EventBus, HandoffEvent};
pub use handoff::{HandoffStatus, SeamlessHandoff, SwitchResult};
pub use selection::{SmartAgentSelection, SwitchRecommendation, SwitchRequest};

/// Baton version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
