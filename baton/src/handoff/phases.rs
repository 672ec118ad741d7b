//! Ordered handoff phases and the seamlessness score

use serde::{Deserialize, Serialize};

use super::HandoffStatus;

/// Phase name of a handoff that has not started its first phase
pub const INITIATED: &str = "initiated";

/// One step of a handoff, executed strictly in declaration order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    ContextPreservation,
    AgentSelection,
    AgentPreparation,
    ContextTransfer,
    Finalization,
    Completed,
}

impl Phase {
    pub const ALL: [Phase; 6] = [
        Phase::ContextPreservation,
        Phase::AgentSelection,
        Phase::AgentPreparation,
        Phase::ContextTransfer,
        Phase::Finalization,
        Phase::Completed,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Phase::ContextPreservation => "context_preservation",
            Phase::AgentSelection => "agent_selection",
            Phase::AgentPreparation => "agent_preparation",
            Phase::ContextTransfer => "context_transfer",
            Phase::Finalization => "finalization",
            Phase::Completed => "completed",
        }
    }

    /// Status a handoff carries while this phase runs
    pub fn status(&self) -> HandoffStatus {
        match self {
            Phase::ContextPreservation => HandoffStatus::ContextPreserving,
            Phase::AgentSelection => HandoffStatus::AgentSelecting,
            Phase::AgentPreparation => HandoffStatus::AgentPreparing,
            Phase::ContextTransfer => HandoffStatus::ContextTransferring,
            Phase::Finalization => HandoffStatus::Finalizing,
            Phase::Completed => HandoffStatus::Completed,
        }
    }

    pub fn estimated_duration_ms(&self) -> u64 {
        match self {
            Phase::ContextPreservation => 2000,
            Phase::AgentSelection => 1000,
            Phase::AgentPreparation => 1500,
            Phase::ContextTransfer => 2500,
            Phase::Finalization => 500,
            Phase::Completed => 0,
        }
    }

    /// Whether external effects of this phase can still be undone
    pub fn rollback_possible(&self) -> bool {
        matches!(
            self,
            Phase::ContextPreservation | Phase::AgentSelection | Phase::AgentPreparation
        )
    }

    pub fn index(&self) -> usize {
        Phase::ALL.iter().position(|p| p == self).unwrap_or(0)
    }
}

pub const TOTAL_PHASES: usize = Phase::ALL.len();

/// Sum of all phase estimates
pub fn total_estimated_ms() -> u64 {
    Phase::ALL.iter().map(Phase::estimated_duration_ms).sum()
}

/// Sum of the estimates of phases not yet completed
pub fn remaining_estimated_ms(completed_phases: usize) -> u64 {
    Phase::ALL
        .iter()
        .skip(completed_phases)
        .map(Phase::estimated_duration_ms)
        .sum()
}

/// Quality of a completed handoff in [0, 1]
pub fn seamlessness_score(errors: usize, warnings: usize, duration_ms: u64) -> f64 {
    let estimate = total_estimated_ms() as f64;
    let duration = duration_ms as f64;

    let mut score = 1.0 - 0.2 * errors as f64 - 0.1 * warnings as f64;
    if duration > estimate * 1.5 {
        score -= 0.3;
    } else if duration < estimate * 0.8 {
        score += 0.1;
    }
    score.clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_table() {
        assert_eq!(TOTAL_PHASES, 6);
        assert_eq!(total_estimated_ms(), 7500);
        assert_eq!(remaining_estimated_ms(3), 3000);
        assert_eq!(Phase::ContextTransfer.index(), 3);

        let reversible: Vec<&str> = Phase::ALL
            .iter()
            .filter(|p| p.rollback_possible())
            .map(|p| p.name())
            .collect();
        assert_eq!(
            reversible,
            vec!["context_preservation", "agent_selection", "agent_preparation"]
        );
    }

    #[test]
    fn test_seamlessness() {
        // fast and clean: bonus is clamped away
        assert_eq!(seamlessness_score(0, 0, 100), 1.0);
        // within the estimate band
        assert!((seamlessness_score(0, 1, 7000) - 0.9).abs() < 1e-9);
        // slow with an error
        assert!((seamlessness_score(1, 0, 20_000) - 0.5).abs() < 1e-9);
        // fast with warnings earns the bonus back
        assert!((seamlessness_score(0, 2, 1000) - 0.9).abs() < 1e-9);
        assert_eq!(seamlessness_score(10, 10, 20_000), 0.0);
    }
}
