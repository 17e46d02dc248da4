//! Plan cycle controller - drives a remote-agent plan to a terminal state.
//!
//! Each cycle calls the act operation, records one immutable [`CycleEntry`],
//! classifies the response and dispatches it to a state handler. The loop
//! ends on completion, failure, or the cycle cap, and every exit goes through
//! the finalizer so a [`FinalReport`] is always produced.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use futures::FutureExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::collaborators::{ActOperation, Collaborators, ReplanOperation};
use crate::config::{LoopConfig, PilotConfig};
use crate::models::{
    ActResult, CycleEntry, FailureKind, FinalReport, PlanParams, Progress, ReplanRequest,
    ResponseVariant,
};

use super::classifier::{classify, is_session_save_signal};
use super::escalation::EscalationDispatcher;
use super::finalizer::finalize;
use super::guardrails::Guardrails;
use super::session::{SessionLifecycleHandler, SessionSaveOutcome};
use super::state::{PendingWait, RunState, RunStatus, WaitKind};
use super::timer::DurableTimer;

/// Failure reason for an instance paused while waiting for manual instructions
pub const PAUSED_FOR_INSTRUCTIONS_REASON: &str =
    "Remote instance is paused and waiting for manual instructions";

/// What the loop does after a handler ran.
#[derive(Debug)]
enum Flow {
    Continue,
    Stop(RunStatus),
}

/// Flags and overrides derived from one act result, before the entry is recorded.
#[derive(Debug)]
struct CycleAssessment {
    variant: ResponseVariant,
    progress: Progress,
    plan_completed: bool,
    plan_failed: bool,
    failure_reason: Option<String>,
    /// Set when the remote instance can no longer make progress
    blocked: Option<String>,
    session_save_signal: bool,
}

impl CycleAssessment {
    fn new(result: &ActResult) -> Self {
        let data = &result.data;
        let classified = classify(data);
        let progress = Progress::from_reported(data.plan_progress.as_ref());

        // A structured `success: false` is a declared failure, not a transport one
        let raw_failed = data.plan_failed.unwrap_or(false) || !result.success;
        let mut plan_failed =
            raw_failed || matches!(classified, ResponseVariant::PlanFailed { .. });
        let mut plan_completed = result.plan_completed.unwrap_or(false);

        let mut failure_reason = data
            .failure_reason
            .clone()
            .filter(|r| !r.trim().is_empty())
            .or_else(|| result.error.clone().filter(|e| !e.trim().is_empty()))
            .or_else(|| match &classified {
                ResponseVariant::PlanFailed { reason } => Some(reason.clone()),
                _ => None,
            });

        let stopped = data
            .instance_status
            .as_deref()
            .is_some_and(|s| s.trim().eq_ignore_ascii_case("stopped"));
        let paused = data.instance_paused.unwrap_or(false)
            || data
                .instance_status
                .as_deref()
                .is_some_and(|s| s.trim().eq_ignore_ascii_case("paused"));
        let waiting = data.waiting_for_instructions.unwrap_or(false);

        let mut blocked = None;
        if raw_failed && stopped {
            blocked = Some(
                failure_reason
                    .clone()
                    .unwrap_or_else(|| "Remote instance stopped".to_string()),
            );
        } else if paused && waiting {
            plan_failed = true;
            failure_reason = Some(PAUSED_FOR_INSTRUCTIONS_REASON.to_string());
            blocked = failure_reason.clone();
        }

        // Explicit failure always wins over the completion heuristic
        let variant = if plan_failed {
            ResponseVariant::PlanFailed {
                reason: failure_reason
                    .clone()
                    .unwrap_or_else(|| "plan failed without a reason".to_string()),
            }
        } else {
            classified
        };

        if plan_failed {
            plan_completed = false;
        } else if !plan_completed
            && matches!(variant, ResponseVariant::StepCompleted { .. })
            && progress.is_complete()
        {
            debug!("Step completed at 100% without plan_completed; treating plan as complete");
            plan_completed = true;
        }

        Self {
            session_save_signal: is_session_save_signal(data),
            variant,
            progress,
            plan_completed,
            plan_failed,
            failure_reason,
            blocked,
        }
    }

    fn to_entry(&self, cycle: u32, result: &ActResult) -> CycleEntry {
        let data = &result.data;
        let message = data
            .message
            .clone()
            .or_else(|| {
                data.agent_response.as_ref().map(|r| match r {
                    serde_json::Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
            })
            .or_else(|| result.error.clone())
            .unwrap_or_default();

        CycleEntry {
            cycle,
            step: data.step.clone(),
            progress: self.progress,
            message,
            execution_time_ms: data.execution_time_ms.unwrap_or(0),
            token_usage: data.token_usage.unwrap_or_default(),
            remote_instance_id: data.remote_instance_id.clone(),
            plan_completed: self.plan_completed,
            plan_failed: self.plan_failed,
            failure_reason: self.failure_reason.clone(),
            instance_status: data.instance_status.clone(),
            instance_paused: data.instance_paused,
            waiting_for_instructions: data.waiting_for_instructions,
            response_type: self.variant.response_type(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// Drives one plan run per call to [`PlanCycleController::run`].
pub struct PlanCycleController {
    act: Arc<dyn ActOperation>,
    replan: Arc<dyn ReplanOperation>,
    sessions: SessionLifecycleHandler,
    escalations: EscalationDispatcher,
    timer: Arc<dyn DurableTimer>,
    guardrails: Guardrails,
    config: LoopConfig,
    /// Root for per-instance checkpoints; None disables checkpointing
    runs_dir: Option<PathBuf>,
    cancel: CancellationToken,
}

impl PlanCycleController {
    pub fn new(
        collaborators: Collaborators,
        timer: Arc<dyn DurableTimer>,
        config: &PilotConfig,
    ) -> Self {
        Self {
            act: collaborators.act,
            replan: collaborators.replan,
            sessions: SessionLifecycleHandler::new(collaborators.session_save),
            escalations: EscalationDispatcher::new(
                collaborators.escalation,
                config.escalation.clone(),
            ),
            timer,
            guardrails: Guardrails::from_config(&config.loop_config),
            config: config.loop_config.clone(),
            runs_dir: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Checkpoint runs under `runs_dir` and resume interrupted ones from it.
    pub fn with_checkpoints(mut self, runs_dir: PathBuf) -> Self {
        self.runs_dir = Some(runs_dir);
        self
    }

    /// Token observed at the inter-cycle pause.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Run a plan to a terminal state. Never fails: every error, and any panic
    /// in the loop, ends up in the returned report.
    pub async fn run(&self, params: PlanParams) -> FinalReport {
        let mut state = self.restore_or_start(params);

        info!(
            "Starting plan run for instance {} (site {}, activity {})",
            state.params.instance_id, state.params.site_id, state.params.activity
        );

        let outcome = AssertUnwindSafe(self.drive(&mut state)).catch_unwind().await;
        let status = match outcome {
            Ok(Ok(status)) => status,
            Ok(Err(e)) => {
                error!("Plan run aborted: {:#}", e);
                RunStatus::failed(FailureKind::Internal, format!("{:#}", e))
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!("Plan run panicked: {}", message);
                RunStatus::failed(FailureKind::Internal, format!("panic: {}", message))
            }
        };

        state.finish(status);
        self.checkpoint(&state);

        let report = finalize(&state);
        info!(
            "Plan run finished after {} cycles. Success: {}",
            report.total_cycles, report.success
        );
        report
    }

    /// Let detached escalations finish before the process exits.
    pub async fn drain_escalations(&self, grace: Duration) -> bool {
        self.escalations.drain(grace).await
    }

    fn restore_or_start(&self, params: PlanParams) -> RunState {
        let Some(runs_dir) = &self.runs_dir else {
            return RunState::new(params);
        };

        let run_dir = RunState::run_dir(runs_dir, &params.instance_id);
        match RunState::load(&run_dir) {
            Ok(Some(state)) if state.can_resume() && state.params.same_target(&params) => {
                info!(
                    "Resuming run for instance {} at cycle {}",
                    params.instance_id, state.cycle
                );
                state
            }
            Ok(_) => RunState::new(params),
            Err(e) => {
                warn!("Ignoring unreadable checkpoint in {:?}: {:#}", run_dir, e);
                RunState::new(params)
            }
        }
    }

    /// Persist the run state. Failures are logged; the run goes on.
    fn checkpoint(&self, state: &RunState) {
        if let Some(runs_dir) = &self.runs_dir {
            let run_dir = RunState::run_dir(runs_dir, &state.params.instance_id);
            if let Err(e) = state.save(&run_dir) {
                warn!("Failed to persist checkpoint: {:#}", e);
            }
        }
    }

    async fn drive(&self, state: &mut RunState) -> Result<RunStatus> {
        // A restarted run first finishes the suspension it was in
        if let Some(wait) = state.pending_wait.clone() {
            info!(
                "Resuming {} wait from cycle {}",
                wait.kind.label(),
                wait.cycle
            );
            if let Some(status) = self.complete_wait(state, wait).await? {
                return Ok(status);
            }
        }

        loop {
            if let Err(stop) = self.guardrails.check_cycle_cap(state.cycle) {
                warn!("{}", stop);
                return Ok(RunStatus::failed(FailureKind::CapExceeded, stop.to_string()));
            }

            let cycle = state.next_cycle();
            info!("=== Cycle {} of at most {} ===", cycle, self.guardrails.max_cycles);

            if let Flow::Stop(status) = self.run_cycle(state).await? {
                return Ok(status);
            }

            if let Err(stop) = self.guardrails.check_cycle_cap(state.cycle) {
                warn!("{}", stop);
                return Ok(RunStatus::failed(FailureKind::CapExceeded, stop.to_string()));
            }

            let pause = state.wait_for(WaitKind::InterCycle, cycle);
            if let Some(status) = self.suspend(state, pause).await? {
                return Ok(status);
            }
        }
    }

    async fn run_cycle(&self, state: &mut RunState) -> Result<Flow> {
        let cycle = state.cycle;

        let result = match self.act.act(&state.params).await {
            Ok(result) => result,
            Err(e) => {
                let reason = format!("act call failed: {}", e);
                warn!("Cycle {}: {}", cycle, reason);
                state.record(CycleEntry::transport_failure(cycle, &reason));
                return Ok(Flow::Stop(RunStatus::failed(
                    FailureKind::TransportFailure,
                    reason,
                )));
            }
        };

        if let Some(plan_id) = result.instance_plan_id.as_deref().filter(|id| !id.is_empty())
            && state.params.instance_plan_id.as_deref() != Some(plan_id)
        {
            info!("Cycle {}: remote plan is now {}", cycle, plan_id);
            state.params.instance_plan_id = Some(plan_id.to_string());
        }

        let assessment = CycleAssessment::new(&result);
        state.record(assessment.to_entry(cycle, &result));

        info!(
            "Cycle {}: {} ({:.0}% complete)",
            cycle,
            assessment.variant.response_type(),
            assessment.progress.percentage
        );

        if assessment.variant.is_step_outcome() {
            state.reset_attention_retries();
        }

        if let Some(reason) = assessment.blocked.clone() {
            warn!("Cycle {}: instance blocked, halting: {}", cycle, reason);
            return Ok(Flow::Stop(RunStatus::failed(
                FailureKind::BlockedInstance,
                reason,
            )));
        }

        if assessment.plan_completed {
            if let ResponseVariant::StepCompleted { .. } = assessment.variant {
                self.handle_step_completed(state, assessment.session_save_signal)
                    .await;
            }
            info!("Cycle {}: plan completed", cycle);
            return Ok(Flow::Stop(RunStatus::Completed));
        }

        self.dispatch(state, assessment).await
    }

    /// State handler table.
    async fn dispatch(&self, state: &mut RunState, assessment: CycleAssessment) -> Result<Flow> {
        let cycle = state.cycle;

        let flow = match assessment.variant {
            ResponseVariant::PlanFailed { reason } => {
                warn!("Cycle {}: plan failed: {}", cycle, reason);
                self.escalate(state, &reason);
                Flow::Stop(RunStatus::failed(FailureKind::DeclaredFailure, reason))
            }
            ResponseVariant::NewPlan => self.handle_new_plan(state).await,
            ResponseVariant::NewSession { platform, domain } => {
                self.sessions
                    .on_new_session(cycle, platform.as_deref(), domain.as_deref());
                Flow::Continue
            }
            ResponseVariant::SessionNeeded { platform, domain } => {
                warn!(
                    "Cycle {}: session needed for {}, waiting {:?}",
                    cycle,
                    platform.as_deref().unwrap_or("unknown platform"),
                    self.config.attention_wait()
                );
                let wait = state.wait_for(WaitKind::SessionNeeded { platform, domain }, cycle);
                self.suspend_then(state, wait).await?
            }
            ResponseVariant::UserAttention {
                explanation,
                is_auth_step: true,
            } => {
                warn!(
                    "Cycle {}: authentication step needs attention, waiting {:?}: {}",
                    cycle,
                    self.config.attention_wait(),
                    explanation
                );
                let wait = state.wait_for(WaitKind::AuthAttention { explanation }, cycle);
                self.suspend_then(state, wait).await?
            }
            ResponseVariant::UserAttention {
                explanation,
                is_auth_step: false,
            } => {
                if self.guardrails.attention_retry_allowed(state.attention_retries) {
                    warn!(
                        "Cycle {}: user attention needed, waiting {:?} before retrying: {}",
                        cycle,
                        self.config.attention_wait(),
                        explanation
                    );
                    let wait = state.wait_for(WaitKind::AttentionRetry { explanation }, cycle);
                    self.suspend_then(state, wait).await?
                } else {
                    let reason = format!("User attention timeout: {}", explanation);
                    warn!("Cycle {}: attention retries exhausted", cycle);
                    self.escalate(state, &reason);
                    Flow::Stop(RunStatus::failed(FailureKind::AttentionTimeout, reason))
                }
            }
            ResponseVariant::StepCompleted { .. } => {
                self.handle_step_completed(state, assessment.session_save_signal)
                    .await;
                Flow::Continue
            }
            ResponseVariant::StepFailed { step_number }
            | ResponseVariant::StepCanceled { step_number } => {
                debug!("Cycle {}: step {:?} did not complete", cycle, step_number);
                Flow::Continue
            }
            ResponseVariant::Unclassified => {
                debug!("Cycle {}: unclassified response, continuing", cycle);
                Flow::Continue
            }
        };

        Ok(flow)
    }

    async fn handle_step_completed(&self, state: &RunState, session_save_signal: bool) {
        if !session_save_signal {
            return;
        }

        let Some(entry) = state.last_entry() else {
            return;
        };

        // Best-effort: no outcome fails the plan
        match self.sessions.save_session(entry, &state.params.site_id).await {
            SessionSaveOutcome::Saved => {
                debug!("Cycle {}: session saved", state.cycle);
            }
            SessionSaveOutcome::Skipped => {
                debug!("Cycle {}: session save skipped", state.cycle);
            }
            SessionSaveOutcome::Failed(error) => {
                debug!("Cycle {}: continuing without a saved session: {}", state.cycle, error);
            }
        }
    }

    async fn handle_new_plan(&self, state: &mut RunState) -> Flow {
        let cycle = state.cycle;
        let request = ReplanRequest {
            params: state.params.clone(),
            error_context: state
                .recent_entries(self.config.replan_context_cycles)
                .to_vec(),
        };

        info!(
            "Cycle {}: new plan required, replacing plan {}",
            cycle,
            state.params.instance_plan_id.as_deref().unwrap_or("none")
        );

        let failure = match self.replan.replan(&request).await {
            Ok(result) if result.success => {
                match result.instance_plan_id.filter(|id| !id.is_empty()) {
                    Some(plan_id) => {
                        info!("Cycle {}: replacement plan {} created", cycle, plan_id);
                        state.params.instance_plan_id = Some(plan_id);
                    }
                    None => warn!(
                        "Cycle {}: replan succeeded without a plan id, keeping the current one",
                        cycle
                    ),
                }
                state.reset_attention_retries();
                return Flow::Continue;
            }
            Ok(result) => result
                .error
                .unwrap_or_else(|| "replan reported failure".to_string()),
            Err(e) => e.to_string(),
        };

        let reason = format!("replan failed: {}", failure);
        warn!("Cycle {}: {}", cycle, reason);
        Flow::Stop(RunStatus::failed(FailureKind::ReplanFailure, reason))
    }

    fn escalate(&self, state: &mut RunState, reason: &str) {
        let record = self
            .escalations
            .dispatch(&state.params, reason, state.cycle);
        state.escalations.push(record);
    }

    async fn suspend_then(&self, state: &mut RunState, wait: PendingWait) -> Result<Flow> {
        Ok(match self.suspend(state, wait).await? {
            Some(status) => Flow::Stop(status),
            None => Flow::Continue,
        })
    }

    /// Checkpoint, then wait. Returns a terminal status when the wait ends the run.
    async fn suspend(&self, state: &mut RunState, wait: PendingWait) -> Result<Option<RunStatus>> {
        state.pending_wait = Some(wait.clone());
        self.checkpoint(state);
        self.complete_wait(state, wait).await
    }

    /// Wait out `wait` on the durable timer and apply its post-wait action.
    async fn complete_wait(
        &self,
        state: &mut RunState,
        wait: PendingWait,
    ) -> Result<Option<RunStatus>> {
        let duration = wait.kind.duration(&self.config);

        if let WaitKind::InterCycle = wait.kind {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    info!("Run cancelled after cycle {}", wait.cycle);
                    state.pending_wait = None;
                    return Ok(Some(RunStatus::failed(
                        FailureKind::Cancelled,
                        format!("run cancelled after cycle {}", wait.cycle),
                    )));
                }
                slept = self.timer.sleep(&wait.key, duration) => slept?,
            }
        } else {
            self.timer.sleep(&wait.key, duration).await?;
        }

        state.pending_wait = None;

        let minutes = duration.as_secs() / 60;
        let status = match wait.kind {
            WaitKind::InterCycle => None,
            WaitKind::AttentionRetry { .. } => {
                state.attention_retries += 1;
                info!(
                    "Attention wait {} elapsed, retrying ({} of {})",
                    wait.key, state.attention_retries, self.guardrails.attention_retry_limit
                );
                None
            }
            WaitKind::SessionNeeded { platform, domain } => {
                let target = match (platform, domain) {
                    (Some(p), Some(d)) => format!("{} ({})", p, d),
                    (Some(p), None) => p,
                    (None, Some(d)) => d,
                    (None, None) => "the requested platform".to_string(),
                };
                let reason = format!(
                    "Session timeout: no session supplied for {} within {} minutes",
                    target, minutes
                );
                self.escalate(state, &reason);
                Some(RunStatus::failed(FailureKind::AttentionTimeout, reason))
            }
            WaitKind::AuthAttention { explanation } => {
                let reason = format!(
                    "Authentication timeout after {} minutes: {}",
                    minutes, explanation
                );
                self.escalate(state, &reason);
                Some(RunStatus::failed(FailureKind::AttentionTimeout, reason))
            }
        };

        Ok(status)
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
