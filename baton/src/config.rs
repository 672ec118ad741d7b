//! Configuration for selection and handoff
//!
//! Loaded from a TOML file with `[handoff]` and `[selection]` tables. Every
//! field has a default, so a partial file (or none at all) is valid.
//! Entries under `[selection.algorithm_weights]` override the built-in
//! weights one by one; algorithms not named keep their default weight.
//!
//! ```toml
//! [handoff]
//! enable_rollback = true
//! handoff_timeout_ms = 30000
//!
//! [selection.algorithm_weights]
//! capability_match = 40.0
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Deserializer, Serialize};

/// Configuration validation errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BatonConfig {
    pub handoff: HandoffConfig,
    pub selection: SelectionConfig,
}

impl BatonConfig {
    /// Load configuration from a TOML file
    pub fn load_from_path(path: &Path) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;

        Self::from_toml_str(&content)
            .with_context(|| format!("Failed to parse config from {}", path.display()))
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.handoff.validate()?;
        self.selection.validate()
    }
}

/// Handoff coordinator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HandoffConfig {
    /// Attempt rollback when a reversible phase fails or is cancelled
    pub enable_rollback: bool,

    /// Maximum attempts to restore the source agent during rollback
    pub max_rollback_retries: u32,

    /// Whole-handoff deadline enforced by the timeout monitor
    pub handoff_timeout_ms: u64,

    /// Timeout monitor tick
    pub monitor_interval_ms: u64,

    /// Notify and preload the target concurrently
    pub enable_parallel_preparation: bool,

    /// Target must acknowledge the handoff notice
    pub require_explicit_confirmation: bool,

    /// Keep the per-handoff phase log in the result
    pub retain_detailed_logs: bool,

    /// Preload target resources during preparation
    pub enable_performance_optimization: bool,

    /// Results kept per agent
    pub agent_history_limit: usize,
}

impl Default for HandoffConfig {
    fn default() -> Self {
        Self {
            enable_rollback: true,
            max_rollback_retries: 3,
            handoff_timeout_ms: 30_000,
            monitor_interval_ms: 5_000,
            enable_parallel_preparation: true,
            require_explicit_confirmation: false,
            retain_detailed_logs: true,
            enable_performance_optimization: true,
            agent_history_limit: 100,
        }
    }
}

impl HandoffConfig {
    pub fn handoff_timeout(&self) -> Duration {
        Duration::from_millis(self.handoff_timeout_ms)
    }

    pub fn monitor_interval(&self) -> Duration {
        Duration::from_millis(self.monitor_interval_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.handoff_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "handoff.handoff_timeout_ms",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.monitor_interval_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "handoff.monitor_interval_ms",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.agent_history_limit == 0 {
            return Err(ConfigError::InvalidValue {
                field: "handoff.agent_history_limit",
                reason: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}

/// Selection scorer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectionConfig {
    /// Initial weight per scoring algorithm
    #[serde(deserialize_with = "merge_algorithm_weights")]
    pub algorithm_weights: BTreeMap<String, f64>,

    /// Lower bound for learned weights
    pub min_weight: f64,

    /// Upper bound for learned weights
    pub max_weight: f64,

    /// Weight multiplier applied after a successful switch
    pub success_multiplier: f64,

    /// Weight multiplier applied after a failed switch
    pub failure_multiplier: f64,

    /// Prior switches needed before history earns a confidence bonus
    pub min_history_switches: u64,

    /// Load above which confidence is penalized
    pub high_load_threshold: f64,

    /// Success rate above which confidence gets a bonus
    pub high_reliability_threshold: f64,

    /// Response time that scores zero in the performance algorithm
    pub reference_response_time_ms: f64,

    /// Recommendations kept in history
    pub selection_history_limit: usize,

    /// Past switches kept for case-based scoring
    pub past_switch_limit: usize,

    /// Satisfaction points kept per session
    pub session_history_limit: usize,
}

fn default_algorithm_weights() -> BTreeMap<String, f64> {
    [
        ("performance", 25.0),
        ("capability_match", 30.0),
        ("user_preference", 20.0),
        ("load_balancing", 15.0),
        ("context_similarity", 10.0),
    ]
    .into_iter()
    .map(|(name, weight)| (name.to_string(), weight))
    .collect()
}

fn merge_algorithm_weights<'de, D>(deserializer: D) -> Result<BTreeMap<String, f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let overrides = BTreeMap::<String, f64>::deserialize(deserializer)?;
    let mut weights = default_algorithm_weights();
    weights.extend(overrides);
    Ok(weights)
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            algorithm_weights: default_algorithm_weights(),
            min_weight: 1.0,
            max_weight: 100.0,
            success_multiplier: 1.02,
            failure_multiplier: 0.98,
            min_history_switches: 5,
            high_load_threshold: 0.8,
            high_reliability_threshold: 0.9,
            reference_response_time_ms: 5_000.0,
            selection_history_limit: 1_000,
            past_switch_limit: 500,
            session_history_limit: 50,
        }
    }
}

impl SelectionConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.min_weight > 0.0 && self.min_weight <= self.max_weight) {
            return Err(ConfigError::InvalidValue {
                field: "selection.min_weight",
                reason: format!(
                    "expected 0 < min_weight <= max_weight, got {} and {}",
                    self.min_weight, self.max_weight
                ),
            });
        }
        if self.success_multiplier < 1.0 {
            return Err(ConfigError::InvalidValue {
                field: "selection.success_multiplier",
                reason: "must be at least 1.0".to_string(),
            });
        }
        if !(self.failure_multiplier > 0.0 && self.failure_multiplier <= 1.0) {
            return Err(ConfigError::InvalidValue {
                field: "selection.failure_multiplier",
                reason: "must be in (0, 1]".to_string(),
            });
        }
        if let Some((name, weight)) = self.algorithm_weights.iter().find(|(_, w)| **w < 0.0) {
            return Err(ConfigError::InvalidValue {
                field: "selection.algorithm_weights",
                reason: format!("weight for {} is negative ({})", name, weight),
            });
        }
        if self.reference_response_time_ms <= 0.0 {
            return Err(ConfigError::InvalidValue {
                field: "selection.reference_response_time_ms",
                reason: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}
