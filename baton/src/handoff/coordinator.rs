//! Handoff coordinator
//!
//! [`SeamlessHandoff`] owns the set of in-flight handoffs. Each handoff runs
//! its phases on the caller's task; cancellation (explicit or from the
//! timeout monitor) goes through `cancel_internal`.
//!
//! Whoever removes a handoff from the active set settles it. The phase
//! runner removes it when a phase fails or when it reaches `completed`; a
//! canceller removes it before stopping the phases. The loser waits on the
//! `settled` token and then reads the final state.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::agents::{AgentDirectory, AgentId, AgentStatus, HandoffNotice};
use crate::config::{BatonConfig, HandoffConfig};
use crate::context::{ContextHandle, ContextPreservationProvider, HandoffSummary};
use crate::events::{EventBus, HandoffEvent};
use crate::selection::{SmartAgentSelection, SwitchOutcome, SwitchRecommendation, SwitchRequest};

use super::phases::{self, Phase, TOTAL_PHASES};
use super::{
    HandoffError, HandoffErrorCode, HandoffErrorEntry, HandoffMetrics, HandoffProgress, HandoffState,
    HandoffStatistics, HandoffStatus, Result, RollbackInfo, StatisticsCollector, SwitchResult,
};

/// Cancellation reason used by the timeout monitor
pub const TIMEOUT_REASON: &str = "Timeout exceeded";

/// One in-flight handoff
struct ActiveHandoff {
    state: Mutex<HandoffState>,
    /// Stops the phase runner
    cancel: CancellationToken,
    /// Fired by a canceller once rollback and bookkeeping are done
    settled: CancellationToken,
    started: Instant,
}

/// Why the phase sequence stopped early
enum PhaseFailure {
    Cancelled,
    Failed { phase: Phase, error: HandoffError },
}

type PhaseResult<T> = std::result::Result<T, PhaseFailure>;

/// Target-side outcome of the preparation phase
struct PreparedTarget {
    acknowledged: bool,
}

/// Phased, cancellable agent handoff coordinator
pub struct SeamlessHandoff {
    directory: Arc<dyn AgentDirectory>,
    context_provider: Arc<dyn ContextPreservationProvider>,
    selector: Arc<SmartAgentSelection>,
    events: Arc<EventBus>,
    config: HandoffConfig,
    active: DashMap<String, Arc<ActiveHandoff>>,
    agent_history: DashMap<AgentId, VecDeque<SwitchResult>>,
    stats: StatisticsCollector,
    shutdown: CancellationToken,
}

impl SeamlessHandoff {
    pub fn new(
        directory: Arc<dyn AgentDirectory>,
        context_provider: Arc<dyn ContextPreservationProvider>,
        selector: Arc<SmartAgentSelection>,
        events: Arc<EventBus>,
        config: HandoffConfig,
    ) -> Self {
        info!(
            "Initializing handoff coordinator (timeout {:?}, rollback {})",
            config.handoff_timeout(),
            config.enable_rollback
        );

        Self {
            directory,
            context_provider,
            selector,
            events,
            config,
            active: DashMap::new(),
            agent_history: DashMap::new(),
            stats: StatisticsCollector::new(),
            shutdown: CancellationToken::new(),
        }
    }

    /// Wire a scorer and an event bus from one configuration
    pub fn from_config(
        directory: Arc<dyn AgentDirectory>,
        context_provider: Arc<dyn ContextPreservationProvider>,
        config: &BatonConfig,
    ) -> Self {
        let events = Arc::new(EventBus::default());
        let selector = Arc::new(SmartAgentSelection::new(
            directory.clone(),
            events.clone(),
            config.selection.clone(),
        ));
        Self::new(directory, context_provider, selector, events, config.handoff.clone())
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn selector(&self) -> &Arc<SmartAgentSelection> {
        &self.selector
    }

    // ========================================================================
    // Public operations
    // ========================================================================

    /// Run a handoff to completion, failure or rollback.
    ///
    /// Never returns an error: every outcome is described by the result.
    pub async fn initiate_handoff(&self, request: SwitchRequest) -> SwitchResult {
        let handoff = Arc::new(ActiveHandoff {
            state: Mutex::new(self.initial_state(&request)),
            cancel: CancellationToken::new(),
            settled: CancellationToken::new(),
            started: Instant::now(),
        });

        match self.active.entry(request.id.clone()) {
            Entry::Occupied(_) => {
                warn!("Rejecting handoff {}: request id already active", request.id);
                return self.rejected_result(&request, HandoffError::AlreadyActive {
                    request_id: request.id.clone(),
                });
            }
            Entry::Vacant(slot) => {
                slot.insert(handoff.clone());
            }
        }

        self.stats.record_initiated();
        info!(
            "Initiating handoff {} for task {} from agent {} ({:?})",
            request.id, request.current_task_id, request.current_agent_id, request.reason
        );

        let new_task_id = match self.run_phases(&request, &handoff).await {
            Ok(task_id) => Some(task_id),
            Err(PhaseFailure::Cancelled) => {
                debug!("Handoff {} stopped by cancellation", request.id);
                handoff.settled.cancelled().await;
                None
            }
            Err(PhaseFailure::Failed { phase, error }) => {
                self.fail(&request, &handoff, phase, error).await;
                None
            }
        };

        let result = self.build_result(&request, &handoff, new_task_id);
        self.finish(&request, &handoff, &result);
        result
    }

    /// Snapshot of an in-flight handoff's progress
    pub fn get_handoff_progress(&self, request_id: &str) -> Option<HandoffProgress> {
        let handoff = self.active.get(request_id)?.clone();
        let mut progress = handoff.state.lock().progress.clone();

        let elapsed_ms = handoff.started.elapsed().as_millis() as u64;
        let completed = progress.completed_phases;
        let remaining_ms = if completed == 0 {
            phases::remaining_estimated_ms(0)
        } else {
            let per_phase = elapsed_ms as f64 / completed as f64;
            (per_phase * TOTAL_PHASES.saturating_sub(completed) as f64).round() as u64
        };
        progress.estimated_completion = Utc::now() + chrono::Duration::milliseconds(remaining_ms as i64);

        Some(progress)
    }

    /// Full state of an in-flight handoff
    pub fn get_handoff_state(&self, request_id: &str) -> Option<HandoffState> {
        self.active
            .get(request_id)
            .map(|handoff| handoff.state.lock().clone())
    }

    /// Cancel an in-flight handoff.
    ///
    /// Returns `true` when the source agent was restored, `false` when the
    /// handoff was only stopped because it was past its rollback point.
    pub async fn cancel_handoff(&self, request_id: &str, reason: &str) -> Result<bool> {
        self.cancel_internal(request_id, reason, HandoffErrorCode::Cancelled)
            .await
    }

    /// Cancel every handoff older than the configured timeout
    pub async fn scan_timeouts(&self) -> usize {
        let timeout = self.config.handoff_timeout();
        let expired: Vec<String> = self
            .active
            .iter()
            .filter(|entry| entry.value().started.elapsed() > timeout)
            .map(|entry| entry.key().clone())
            .collect();

        let mut cancelled = 0;
        for request_id in expired {
            warn!("Handoff {} exceeded timeout of {:?}", request_id, timeout);
            match self
                .cancel_internal(&request_id, TIMEOUT_REASON, HandoffErrorCode::Timeout)
                .await
            {
                Ok(_) => cancelled += 1,
                // Settled on its own between the scan and the cancel
                Err(HandoffError::NotFound { .. }) => {}
                Err(e) => warn!("Failed to cancel timed out handoff {}: {}", request_id, e),
            }
        }
        cancelled
    }

    /// Spawn the background timeout scanner
    pub fn start_timeout_monitor(self: &Arc<Self>) -> JoinHandle<()> {
        let coordinator = Arc::clone(self);
        let shutdown = self.shutdown.clone();
        let interval = self.config.monitor_interval();

        tokio::spawn(async move {
            info!("Starting handoff timeout monitor with interval {:?}", interval);

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        debug!("Handoff timeout monitor stopped");
                        break;
                    }
                    _ = tokio::time::sleep(interval) => {
                        let cancelled = coordinator.scan_timeouts().await;
                        if cancelled > 0 {
                            info!("Timeout monitor cancelled {} handoffs", cancelled);
                        }
                    }
                }
            }
        })
    }

    /// Stop the timeout monitor; in-flight handoffs keep running
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Recent results involving an agent, oldest first
    pub fn agent_history(&self, agent_id: &AgentId) -> Vec<SwitchResult> {
        self.agent_history
            .get(agent_id)
            .map(|history| history.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Ids of handoffs currently in flight
    pub fn active_handoffs(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.active.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    pub fn statistics(&self) -> HandoffStatistics {
        self.stats.snapshot()
    }

    // ========================================================================
    // Phase sequence
    // ========================================================================

    async fn run_phases(&self, request: &SwitchRequest, handoff: &Arc<ActiveHandoff>) -> PhaseResult<String> {
        // 0. rollback snapshot
        if self.config.enable_rollback {
            let source_status = tokio::select! {
                biased;
                _ = handoff.cancel.cancelled() => return Err(PhaseFailure::Cancelled),
                status = self.read_source_status(&request.current_agent_id) => status,
            };
            self.update(handoff, |state| {
                if let Some(rollback) = state.rollback.as_mut() {
                    rollback.snapshot.source_status = source_status;
                    rollback.snapshot.captured_at = Utc::now();
                }
            })?;
        }

        // 1. context preservation
        let started = Instant::now();
        let (context, compression_ratio) = self
            .run_phase(handoff, Phase::ContextPreservation, self.preserve_context(request))
            .await?;
        self.update(handoff, |state| {
            state.metrics.preservation_time_ms = started.elapsed().as_millis() as u64;
            state.metrics.compression_ratio = compression_ratio;
            state.log(
                Phase::ContextPreservation.name(),
                format!("Preserved context {} (compression {:.2})", context.id, compression_ratio),
            );
            state.preserved_context = Some(context.clone());
        })?;
        self.complete_phase(handoff, Phase::ContextPreservation)?;

        // 2. agent selection
        let started = Instant::now();
        let recommendation = self
            .run_phase(handoff, Phase::AgentSelection, self.select_agent(request))
            .await?;
        let target = recommendation.recommended_agent.agent_id.clone();
        self.update(handoff, |state| {
            let confidence = recommendation.recommended_agent.confidence_level;
            state.metrics.selection_time_ms = started.elapsed().as_millis() as u64;
            state.metrics.selection_confidence = confidence;
            state.target_agent_id = Some(target.clone());
            if confidence < 0.5 {
                state
                    .progress
                    .warnings
                    .push(format!("Low selection confidence ({:.2}) for agent {}", confidence, target));
            }
            state.log(
                Phase::AgentSelection.name(),
                format!("Selected agent {} (confidence {:.2})", target, confidence),
            );
        })?;
        self.complete_phase(handoff, Phase::AgentSelection)?;

        // 3. agent preparation
        let started = Instant::now();
        let prepared = self
            .run_phase(
                handoff,
                Phase::AgentPreparation,
                self.prepare_agent(request, &target, &context),
            )
            .await?;
        self.update(handoff, |state| {
            state.metrics.preparation_time_ms = started.elapsed().as_millis() as u64;
            if !prepared.acknowledged {
                state
                    .progress
                    .warnings
                    .push(format!("Agent {} did not acknowledge the handoff notice", target));
            }
            state.log(Phase::AgentPreparation.name(), format!("Prepared agent {}", target));
        })?;
        self.complete_phase(handoff, Phase::AgentPreparation)?;

        // 4. context transfer, irreversible from here on
        let started = Instant::now();
        let summary = self
            .run_phase(
                handoff,
                Phase::ContextTransfer,
                self.transfer_context(request, &target, &context),
            )
            .await?;
        self.update(handoff, |state| {
            state.metrics.transfer_time_ms = started.elapsed().as_millis() as u64;
            state.log(
                Phase::ContextTransfer.name(),
                format!(
                    "Transferred context to {} ({} key points, {} tokens)",
                    target,
                    summary.key_points.len(),
                    summary.token_count
                ),
            );
        })?;
        self.complete_phase(handoff, Phase::ContextTransfer)?;

        // 5. finalization
        let started = Instant::now();
        self.run_phase(
            handoff,
            Phase::Finalization,
            self.finalize(&request.current_agent_id, &target),
        )
        .await?;
        self.update(handoff, |state| {
            state.metrics.finalization_time_ms = started.elapsed().as_millis() as u64;
            state.log(
                Phase::Finalization.name(),
                format!("Agent {} idle, agent {} active", request.current_agent_id, target),
            );
        })?;
        self.complete_phase(handoff, Phase::Finalization)?;

        // 6. completed
        if !self.claim(&request.id, handoff) {
            return Err(PhaseFailure::Cancelled);
        }
        self.begin_phase(handoff, Phase::Completed)?;

        let duration_ms = handoff.started.elapsed().as_millis() as u64;
        let new_task_id = Uuid::new_v4().to_string();
        self.update(handoff, |state| {
            state.status = HandoffStatus::Completed;
            state.progress.completed_phases = TOTAL_PHASES;
            state.metrics.total_time_ms = duration_ms;
            state.metrics.seamlessness_score = phases::seamlessness_score(
                state.progress.errors.len(),
                state.progress.warnings.len(),
                duration_ms,
            );
            let seamlessness = state.metrics.seamlessness_score;
            state.log(
                Phase::Completed.name(),
                format!("Handoff completed in {}ms (seamlessness {:.2})", duration_ms, seamlessness),
            );
        })?;

        Ok(new_task_id)
    }

    /// Enter a phase and race its body against cancellation
    async fn run_phase<T, F>(&self, handoff: &ActiveHandoff, phase: Phase, body: F) -> PhaseResult<T>
    where
        F: Future<Output = Result<T>>,
    {
        self.begin_phase(handoff, phase)?;

        let outcome = tokio::select! {
            biased;
            _ = handoff.cancel.cancelled() => return Err(PhaseFailure::Cancelled),
            outcome = body => outcome,
        };

        outcome.map_err(|error| PhaseFailure::Failed { phase, error })
    }

    fn begin_phase(&self, handoff: &ActiveHandoff, phase: Phase) -> PhaseResult<()> {
        let (request_id, completed_phases) = self.update(handoff, |state| {
            state.status = phase.status();
            state.progress.current_phase = phase.name().to_string();
            if !phase.rollback_possible() {
                if let Some(rollback) = state.rollback.as_mut() {
                    rollback.can_rollback = false;
                }
            }
            state.log(phase.name(), "Phase started");
            (state.request_id.clone(), state.progress.completed_phases)
        })?;

        debug!("Handoff {} entering phase {}", request_id, phase.name());

        let remaining_ms = phases::remaining_estimated_ms(completed_phases);
        self.events.publish(HandoffEvent::Progress {
            request_id,
            phase: phase.name().to_string(),
            completed_phases,
            total_phases: TOTAL_PHASES,
            estimated_completion: Utc::now() + chrono::Duration::milliseconds(remaining_ms as i64),
        });
        Ok(())
    }

    fn complete_phase(&self, handoff: &ActiveHandoff, phase: Phase) -> PhaseResult<()> {
        self.update(handoff, |state| {
            state.progress.completed_phases = (phase.index() + 1).min(TOTAL_PHASES);
            if phase.rollback_possible() {
                if let Some(rollback) = state.rollback.as_mut() {
                    rollback.rollback_point = Some(phase.name().to_string());
                }
            }
        })
    }

    /// Mutate state on the phase path, unless a canceller got there first
    fn update<R>(&self, handoff: &ActiveHandoff, f: impl FnOnce(&mut HandoffState) -> R) -> PhaseResult<R> {
        let mut state = handoff.state.lock();
        if handoff.cancel.is_cancelled() {
            return Err(PhaseFailure::Cancelled);
        }
        Ok(f(&mut state))
    }

    /// Take settlement ownership by removing this exact handoff from the active set
    fn claim(&self, request_id: &str, handoff: &Arc<ActiveHandoff>) -> bool {
        self.active
            .remove_if(request_id, |_, active| Arc::ptr_eq(active, handoff))
            .is_some()
    }

    // ========================================================================
    // Phase bodies
    // ========================================================================

    async fn preserve_context(&self, request: &SwitchRequest) -> Result<(ContextHandle, f64)> {
        let outcome = self
            .context_provider
            .preserve_context_for_handoff(
                &request.current_agent_id,
                &request.session_id,
                &request.preservation_policy,
            )
            .await
            .map_err(|e| HandoffError::Preservation(e.to_string()))?;

        match outcome.handle {
            Some(handle) if outcome.success => Ok((handle, outcome.compression_ratio)),
            _ => {
                let reason = if outcome.errors.is_empty() {
                    "provider reported failure".to_string()
                } else {
                    outcome.errors.join("; ")
                };
                Err(HandoffError::Preservation(reason))
            }
        }
    }

    async fn read_source_status(&self, source: &AgentId) -> Option<AgentStatus> {
        match self.directory.get_agent(source).await {
            Ok(agent) => agent.map(|a| a.status),
            Err(e) => {
                warn!("Could not read source agent {}: {}", source, e);
                None
            }
        }
    }

    async fn select_agent(&self, request: &SwitchRequest) -> Result<SwitchRecommendation> {
        Ok(self.selector.select_best_agent(request).await?)
    }

    async fn prepare_agent(
        &self,
        request: &SwitchRequest,
        target: &AgentId,
        context: &ContextHandle,
    ) -> Result<PreparedTarget> {
        let agent = self
            .directory
            .get_agent(target)
            .await
            .map_err(|e| HandoffError::Preparation(e.to_string()))?
            .ok_or_else(|| HandoffError::Preparation(format!("Target agent {} not found", target)))?;

        if !agent.status.accepts_handoff() {
            return Err(HandoffError::Preparation(format!(
                "Target agent {} is not available ({:?})",
                target, agent.status
            )));
        }
        if agent.performance.is_at_capacity() && !request.criteria.allow_capacity_override {
            return Err(HandoffError::Preparation(format!(
                "Target agent {} is at capacity ({}/{})",
                target, agent.performance.current_tasks, agent.performance.max_concurrent_tasks
            )));
        }

        let notice = HandoffNotice {
            request_id: request.id.clone(),
            task_id: request.current_task_id.clone(),
            session_id: request.session_id.clone(),
            source_agent_id: request.current_agent_id.clone(),
            context_handle: Some(context.id.clone()),
        };
        let notify = self.directory.notify_handoff(target, &notice);
        let preload = async {
            if self.config.enable_performance_optimization {
                self.directory.preload_resources(target, Some(&context.id)).await
            } else {
                Ok(())
            }
        };

        let acknowledged = if self.config.enable_parallel_preparation {
            let (acknowledged, ()) = futures::try_join!(notify, preload)
                .map_err(|e| HandoffError::Preparation(e.to_string()))?;
            acknowledged
        } else {
            let acknowledged = notify.await.map_err(|e| HandoffError::Preparation(e.to_string()))?;
            preload.await.map_err(|e| HandoffError::Preparation(e.to_string()))?;
            acknowledged
        };

        if !acknowledged && self.config.require_explicit_confirmation {
            return Err(HandoffError::Preparation(format!(
                "Target agent {} did not confirm the handoff",
                target
            )));
        }

        Ok(PreparedTarget { acknowledged })
    }

    async fn transfer_context(
        &self,
        request: &SwitchRequest,
        target: &AgentId,
        context: &ContextHandle,
    ) -> Result<HandoffSummary> {
        let summary = self
            .context_provider
            .generate_handoff_summary(context, target, &request.preservation_policy)
            .await
            .map_err(|e| HandoffError::Transfer(e.to_string()))?;

        let restored = self
            .context_provider
            .restore_context_for_agent(context, target, &request.session_id)
            .await
            .map_err(|e| HandoffError::Transfer(e.to_string()))?;
        if !restored {
            return Err(HandoffError::Transfer(format!(
                "Context restore reported failure for agent {}",
                target
            )));
        }

        Ok(summary)
    }

    async fn finalize(&self, source: &AgentId, target: &AgentId) -> Result<()> {
        self.directory
            .update_agent_status(source, AgentStatus::Idle)
            .await
            .map_err(|e| HandoffError::Finalization(e.to_string()))?;
        self.directory
            .update_agent_status(target, AgentStatus::Active)
            .await
            .map_err(|e| HandoffError::Finalization(e.to_string()))?;
        debug!("Switched {} -> {}", source, target);
        Ok(())
    }

    // ========================================================================
    // Failure, cancellation and rollback
    // ========================================================================

    async fn fail(&self, request: &SwitchRequest, handoff: &Arc<ActiveHandoff>, phase: Phase, error: HandoffError) {
        if !self.claim(&request.id, handoff) {
            // A canceller owns the outcome
            handoff.settled.cancelled().await;
            return;
        }

        error!("Handoff {} failed in phase {}: {}", request.id, phase.name(), error);

        let code = error.code().unwrap_or_else(|| default_code(phase));
        let message = error.to_string();
        let attempt_rollback = {
            let mut state = handoff.state.lock();
            state.progress.errors.push(HandoffErrorEntry::new(
                code,
                message.clone(),
                !phase.rollback_possible(),
                phase.name(),
            ));
            state.log(phase.name(), format!("Failed: {}", message));

            // A first phase that failed on its own has touched no agent
            let attempt = self.config.enable_rollback
                && state.can_rollback()
                && state.progress.completed_phases > 0;
            if !attempt {
                state.status = HandoffStatus::Failed;
            }
            attempt
        };

        if attempt_rollback {
            self.rollback(handoff, &message).await;
        }
    }

    async fn cancel_internal(&self, request_id: &str, reason: &str, code: HandoffErrorCode) -> Result<bool> {
        let Some((_, handoff)) = self.active.remove(request_id) else {
            return Err(HandoffError::NotFound {
                request_id: request_id.to_string(),
            });
        };

        handoff.cancel.cancel();

        let (attempt_rollback, phase) = {
            let mut state = handoff.state.lock();
            let attempt = self.config.enable_rollback && state.can_rollback();
            let phase = state.progress.current_phase.clone();
            state.progress.errors.push(HandoffErrorEntry::new(
                code,
                format!("Handoff cancelled: {}", reason),
                !attempt,
                &phase,
            ));
            state.log(&phase, format!("Cancelled: {}", reason));
            if !attempt {
                state.status = HandoffStatus::Failed;
            }
            (attempt, phase)
        };

        info!("Cancelling handoff {} in phase {}: {}", request_id, phase, reason);
        self.stats.record_cancelled(code == HandoffErrorCode::Timeout);

        let restored = if attempt_rollback {
            self.rollback(&handoff, reason).await
        } else {
            false
        };

        self.events.publish(HandoffEvent::Cancelled {
            request_id: request_id.to_string(),
            reason: reason.to_string(),
            phase,
        });

        handoff.settled.cancel();
        Ok(restored)
    }

    /// Restore the source agent, retrying up to the configured limit
    async fn rollback(&self, handoff: &ActiveHandoff, reason: &str) -> bool {
        let (request_id, source, rollback_point, source_status) = {
            let mut state = handoff.state.lock();
            state.status = HandoffStatus::RollingBack;
            let (point, source_status) = state
                .rollback
                .as_ref()
                .map(|r| (r.rollback_point.clone().unwrap_or_default(), r.snapshot.source_status))
                .unwrap_or_default();
            state.log(&point, format!("Rolling back: {}", reason));
            (state.request_id.clone(), state.source_agent_id.clone(), point, source_status)
        };

        match source_status {
            Some(status) => warn!(
                "Rolling back handoff {} to {} (source {} was {:?}): {}",
                request_id, rollback_point, source, status, reason
            ),
            None => warn!("Rolling back handoff {} to {}: {}", request_id, rollback_point, reason),
        }

        let mut last_error = String::new();
        loop {
            let attempt = {
                let mut state = handoff.state.lock();
                match state.rollback.as_mut() {
                    Some(rollback) if rollback.can_retry() => {
                        rollback.retry_count += 1;
                        Some(rollback.retry_count)
                    }
                    _ => None,
                }
            };
            let Some(attempt) = attempt else {
                break;
            };

            match self.directory.update_agent_status(&source, AgentStatus::Active).await {
                Ok(()) => {
                    {
                        let mut state = handoff.state.lock();
                        state.status = HandoffStatus::RolledBack;
                        let restored = match source_status {
                            Some(status) => format!("Agent {} restored to active (was {:?})", source, status),
                            None => format!("Agent {} restored to active", source),
                        };
                        state.log(&rollback_point, restored);
                    }
                    info!("Handoff {} rolled back after {} attempt(s)", request_id, attempt);
                    self.events.publish(HandoffEvent::RolledBack {
                        request_id,
                        reason: reason.to_string(),
                        rollback_point,
                        retry_count: attempt,
                    });
                    return true;
                }
                Err(e) => {
                    warn!("Rollback attempt {} for handoff {} failed: {}", attempt, request_id, e);
                    last_error = e.to_string();
                }
            }
        }

        error!("Rollback of handoff {} exhausted its retries", request_id);
        let mut state = handoff.state.lock();
        state.progress.errors.push(HandoffErrorEntry::new(
            HandoffErrorCode::Rollback,
            format!("Rollback failed: {}", last_error),
            true,
            &rollback_point,
        ));
        state.status = HandoffStatus::Failed;
        false
    }

    // ========================================================================
    // Results and bookkeeping
    // ========================================================================

    fn initial_state(&self, request: &SwitchRequest) -> HandoffState {
        let now = Utc::now();
        HandoffState {
            request_id: request.id.clone(),
            task_id: request.current_task_id.clone(),
            session_id: request.session_id.clone(),
            status: HandoffStatus::Initiated,
            source_agent_id: request.current_agent_id.clone(),
            target_agent_id: None,
            preserved_context: None,
            progress: HandoffProgress {
                current_phase: phases::INITIATED.to_string(),
                total_phases: TOTAL_PHASES,
                completed_phases: 0,
                started_at: now,
                estimated_completion: now
                    + chrono::Duration::milliseconds(phases::total_estimated_ms() as i64),
                errors: Vec::new(),
                warnings: Vec::new(),
            },
            rollback: self.config.enable_rollback.then(|| {
                RollbackInfo::new(request.current_agent_id.clone(), self.config.max_rollback_retries)
            }),
            metrics: HandoffMetrics::default(),
            log: Vec::new(),
        }
    }

    fn build_result(
        &self,
        request: &SwitchRequest,
        handoff: &ActiveHandoff,
        new_task_id: Option<String>,
    ) -> SwitchResult {
        let duration_ms = handoff.started.elapsed().as_millis() as u64;
        let state = handoff.state.lock();
        let success = state.status == HandoffStatus::Completed;

        let mut metrics = state.metrics.clone();
        metrics.total_time_ms = duration_ms;

        SwitchResult {
            request_id: request.id.clone(),
            success,
            status: state.status,
            previous_agent_id: state.source_agent_id.clone(),
            new_task_id: if success { new_task_id } else { None },
            new_agent_id: if success { state.target_agent_id.clone() } else { None },
            completed_phases: state.progress.completed_phases,
            total_phases: state.progress.total_phases,
            metrics,
            errors: state.progress.errors.clone(),
            warnings: state.progress.warnings.clone(),
            log: if self.config.retain_detailed_logs {
                state.log.clone()
            } else {
                Vec::new()
            },
            completed_at: Utc::now(),
            duration_ms,
        }
    }

    fn rejected_result(&self, request: &SwitchRequest, error: HandoffError) -> SwitchResult {
        SwitchResult {
            request_id: request.id.clone(),
            success: false,
            status: HandoffStatus::Failed,
            previous_agent_id: request.current_agent_id.clone(),
            new_task_id: None,
            new_agent_id: None,
            completed_phases: 0,
            total_phases: TOTAL_PHASES,
            metrics: HandoffMetrics::default(),
            errors: vec![HandoffErrorEntry::new(
                HandoffErrorCode::Validation,
                error.to_string(),
                false,
                phases::INITIATED,
            )],
            warnings: Vec::new(),
            log: Vec::new(),
            completed_at: Utc::now(),
            duration_ms: 0,
        }
    }

    fn finish(&self, request: &SwitchRequest, handoff: &ActiveHandoff, result: &SwitchResult) {
        let target = handoff.state.lock().target_agent_id.clone();

        self.stats.record_result(result);
        self.record_history(&result.previous_agent_id, result);
        if let Some(target) = target.as_ref().filter(|t| *t != &result.previous_agent_id) {
            self.record_history(target, result);
        }

        if result.success {
            info!(
                "Handoff {} completed in {}ms (seamlessness {:.2})",
                request.id, result.duration_ms, result.metrics.seamlessness_score
            );
        } else {
            warn!(
                "Handoff {} ended {:?} after {}ms with {} errors",
                request.id,
                result.status,
                result.duration_ms,
                result.errors.len()
            );
        }

        self.events.publish(HandoffEvent::Completed {
            request_id: request.id.clone(),
            success: result.success,
            duration_ms: result.duration_ms,
            new_agent_id: result.new_agent_id.clone(),
        });

        if let Some(target) = target {
            self.selector.learn_from_switch_outcome(
                &request.id,
                &target,
                &SwitchOutcome {
                    success: result.success,
                    switch_duration_ms: result.duration_ms,
                    user_satisfaction: result.success.then_some(result.metrics.seamlessness_score),
                },
            );
        }
    }

    fn record_history(&self, agent_id: &AgentId, result: &SwitchResult) {
        let mut history = self.agent_history.entry(agent_id.clone()).or_default();
        history.push_back(result.clone());
        while history.len() > self.config.agent_history_limit {
            history.pop_front();
        }
    }
}

/// Error code for failures that carry no code of their own
fn default_code(phase: Phase) -> HandoffErrorCode {
    match phase {
        Phase::ContextPreservation => HandoffErrorCode::Preservation,
        Phase::AgentSelection => HandoffErrorCode::Selection,
        Phase::AgentPreparation => HandoffErrorCode::Preparation,
        Phase::ContextTransfer => HandoffErrorCode::Transfer,
        Phase::Finalization | Phase::Completed => HandoffErrorCode::Finalization,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::{Agent, AgentType, InMemoryAgentDirectory};
    use crate::config::SelectionConfig;
    use crate::context::{ContextPreservationPolicy, PreservationOutcome};
    use crate::selection::{AgentSelectionCriteria, SwitchReason};
    use async_trait::async_trait;

    /// Provider that always succeeds
    struct StaticProvider;

    #[async_trait]
    impl ContextPreservationProvider for StaticProvider {
        async fn preserve_context_for_handoff(
            &self,
            agent_id: &AgentId,
            session_id: &str,
            _policy: &ContextPreservationPolicy,
        ) -> crate::context::Result<PreservationOutcome> {
            Ok(PreservationOutcome::succeeded(
                ContextHandle {
                    id: format!("ctx-{}", session_id),
                    source_agent_id: agent_id.clone(),
                    session_id: session_id.to_string(),
                    created_at: Utc::now(),
                },
                0.5,
            ))
        }

        async fn generate_handoff_summary(
            &self,
            handle: &ContextHandle,
            target_agent_id: &AgentId,
            _policy: &ContextPreservationPolicy,
        ) -> crate::context::Result<HandoffSummary> {
            Ok(HandoffSummary {
                handle_id: handle.id.clone(),
                target_agent_id: target_agent_id.clone(),
                summary: "summary".to_string(),
                key_points: vec!["point".to_string()],
                token_count: 42,
            })
        }

        async fn restore_context_for_agent(
            &self,
            _handle: &ContextHandle,
            _target_agent_id: &AgentId,
            _session_id: &str,
        ) -> crate::context::Result<bool> {
            Ok(true)
        }
    }

    fn coordinator(agents: Vec<Agent>, config: HandoffConfig) -> (SeamlessHandoff, Arc<InMemoryAgentDirectory>) {
        let directory = Arc::new(InMemoryAgentDirectory::with_agents(agents));
        let events = Arc::new(EventBus::default());
        let selector = Arc::new(SmartAgentSelection::new(
            directory.clone(),
            events.clone(),
            SelectionConfig::default(),
        ));
        let coordinator = SeamlessHandoff::new(
            directory.clone(),
            Arc::new(StaticProvider),
            selector,
            events,
            config,
        );
        (coordinator, directory)
    }

    fn fleet() -> Vec<Agent> {
        vec![
            Agent::new("source", AgentType::Developer, vec!["rust".to_string()]).with_status(AgentStatus::Active),
            Agent::new("target", AgentType::Developer, vec!["rust".to_string()]),
        ]
    }

    fn request(id: &str) -> SwitchRequest {
        SwitchRequest::new("task-1", AgentId::from("source"), "session-1", SwitchReason::Escalation)
            .with_id(id)
            .with_criteria(AgentSelectionCriteria::requiring(&["rust"]))
    }

    #[tokio::test]
    async fn test_successful_handoff_flips_statuses() {
        let (coordinator, directory) = coordinator(fleet(), HandoffConfig::default());

        let result = coordinator.initiate_handoff(request("r-1")).await;

        assert!(result.success, "errors: {:?}", result.errors);
        assert_eq!(result.status, HandoffStatus::Completed);
        assert_eq!(result.new_agent_id, Some(AgentId::from("target")));
        assert!(result.new_task_id.is_some());
        assert!(!result.log.is_empty());
        assert_eq!(directory.status_of(&AgentId::from("source")), Some(AgentStatus::Idle));
        assert_eq!(directory.status_of(&AgentId::from("target")), Some(AgentStatus::Active));
        assert!(coordinator.active_handoffs().is_empty());
        assert_eq!(coordinator.agent_history(&AgentId::from("source")).len(), 1);
        assert_eq!(coordinator.agent_history(&AgentId::from("target")).len(), 1);
    }

    #[tokio::test]
    async fn test_no_candidates_rolls_back_with_validation_error() {
        let agents = vec![
            Agent::new("source", AgentType::Developer, vec!["rust".to_string()]).with_status(AgentStatus::Busy),
        ];
        let (coordinator, directory) = coordinator(agents, HandoffConfig::default());

        let result = coordinator.initiate_handoff(request("r-1")).await;

        assert!(!result.success);
        assert_eq!(result.status, HandoffStatus::RolledBack);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].code, HandoffErrorCode::Validation);
        assert!(!result.errors[0].recoverable);
        assert_eq!(directory.status_of(&AgentId::from("source")), Some(AgentStatus::Active));
    }

    #[tokio::test]
    async fn test_failure_without_rollback_ends_failed() {
        let agents = vec![
            Agent::new("source", AgentType::Developer, vec!["rust".to_string()]).with_status(AgentStatus::Busy),
        ];
        let config = HandoffConfig {
            enable_rollback: false,
            ..Default::default()
        };
        let (coordinator, directory) = coordinator(agents, config);

        let result = coordinator.initiate_handoff(request("r-1")).await;

        assert_eq!(result.status, HandoffStatus::Failed);
        assert_eq!(directory.status_of(&AgentId::from("source")), Some(AgentStatus::Busy));
    }

    #[tokio::test]
    async fn test_detailed_log_can_be_dropped() {
        let config = HandoffConfig {
            retain_detailed_logs: false,
            ..Default::default()
        };
        let (coordinator, _) = coordinator(fleet(), config);

        let result = coordinator.initiate_handoff(request("r-1")).await;
        assert!(result.success);
        assert!(result.log.is_empty());
    }

    #[tokio::test]
    async fn test_agent_history_is_bounded() {
        let config = HandoffConfig {
            agent_history_limit: 2,
            ..Default::default()
        };
        let (coordinator, _) = coordinator(fleet(), config);

        for i in 0..3 {
            // Alternate direction so the current agent always has a peer
            let source = if i % 2 == 0 { "source" } else { "target" };
            let req = SwitchRequest::new("task", AgentId::from(source), "s", SwitchReason::LoadBalancing)
                .with_id(format!("r-{}", i));
            coordinator.initiate_handoff(req).await;
        }

        let history = coordinator.agent_history(&AgentId::from("source"));
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].request_id, "r-1");
        assert_eq!(coordinator.statistics().initiated, 3);
    }

    #[tokio::test]
    async fn test_cancel_unknown_handoff() {
        let (coordinator, _) = coordinator(fleet(), HandoffConfig::default());
        let err = coordinator.cancel_handoff("missing", "no reason").await.unwrap_err();
        assert!(matches!(err, HandoffError::NotFound { .. }));
        assert!(coordinator.get_handoff_progress("missing").is_none());
    }
}
