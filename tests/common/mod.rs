//! Scripted collaborators and an instant timer shared by the integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use plan_pilot::collaborators::{
    ActOperation, Collaborators, EscalationTask, ReplanOperation, SessionSaveOperation,
};
use plan_pilot::models::{
    ActResult, EscalationRequest, PlanParams, ReplanRequest, ReplanResult, SessionSaveRequest,
    SessionSaveResult,
};
use plan_pilot::orchestrator::DurableTimer;
use plan_pilot::{CallError, PilotConfig, PlanCycleController};

pub fn act(value: Value) -> ActResult {
    serde_json::from_value(value).expect("valid act result fixture")
}

pub fn step_completed(number: u32, completed: u32, total: u32) -> ActResult {
    act(serde_json::json!({
        "success": true,
        "data": {
            "message": format!("Step {} completed", number),
            "step": { "number": number, "status": "completed" },
            "plan_progress": { "completed_steps": completed, "total_steps": total },
            "execution_time_ms": 1000,
            "token_usage": { "input": 100, "output": 10 },
            "remote_instance_id": "remote-1"
        }
    }))
}

pub fn user_attention(explanation: &str) -> ActResult {
    act(serde_json::json!({
        "success": true,
        "data": {
            "message": explanation,
            "user_attention_required": true,
            "step": { "number": 2, "status": "in_progress", "type": "form_fill" }
        }
    }))
}

pub fn params() -> PlanParams {
    PlanParams::new("site-1", "lead outreach", "inst-1")
        .with_plan_id("plan-1")
        .with_user_id("user-1")
}

// ============================================================================
// Act
// ============================================================================

/// Plays back a script of act results, then repeats the fallback.
pub struct ScriptedAct {
    script: Mutex<VecDeque<Result<ActResult, CallError>>>,
    fallback: Option<ActResult>,
    calls: AtomicU32,
    seen_plan_ids: Mutex<Vec<Option<String>>>,
}

impl ScriptedAct {
    pub fn new(script: Vec<Result<ActResult, CallError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            fallback: None,
            calls: AtomicU32::new(0),
            seen_plan_ids: Mutex::new(Vec::new()),
        }
    }

    pub fn ok(results: Vec<ActResult>) -> Self {
        Self::new(results.into_iter().map(Ok).collect())
    }

    pub fn with_fallback(mut self, fallback: ActResult) -> Self {
        self.fallback = Some(fallback);
        self
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn seen_plan_ids(&self) -> Vec<Option<String>> {
        self.seen_plan_ids.lock().unwrap().clone()
    }
}

#[async_trait]
impl ActOperation for ScriptedAct {
    async fn act(&self, params: &PlanParams) -> Result<ActResult, CallError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen_plan_ids
            .lock()
            .unwrap()
            .push(params.instance_plan_id.clone());

        let next = self.script.lock().unwrap().pop_front();
        match (next, &self.fallback) {
            (Some(result), _) => result,
            (None, Some(fallback)) => Ok(fallback.clone()),
            (None, None) => Err(CallError::Other("act script exhausted".to_string())),
        }
    }
}

// ============================================================================
// Replan / Session Save / Escalation
// ============================================================================

pub struct StubReplan {
    result: Result<ReplanResult, CallError>,
    requests: Mutex<Vec<ReplanRequest>>,
}

impl StubReplan {
    pub fn succeeding(plan_id: &str) -> Self {
        Self::new(Ok(ReplanResult {
            success: true,
            instance_plan_id: Some(plan_id.to_string()),
            error: None,
        }))
    }

    pub fn new(result: Result<ReplanResult, CallError>) -> Self {
        Self {
            result,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<ReplanRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ReplanOperation for StubReplan {
    async fn replan(&self, request: &ReplanRequest) -> Result<ReplanResult, CallError> {
        self.requests.lock().unwrap().push(request.clone());
        self.result.clone()
    }
}

#[derive(Default)]
pub struct StubSessionSave {
    requests: Mutex<Vec<SessionSaveRequest>>,
    failure: Option<CallError>,
}

impl StubSessionSave {
    pub fn failing(error: CallError) -> Self {
        Self {
            requests: Mutex::new(Vec::new()),
            failure: Some(error),
        }
    }

    pub fn requests(&self) -> Vec<SessionSaveRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl SessionSaveOperation for StubSessionSave {
    async fn save_session(
        &self,
        request: &SessionSaveRequest,
    ) -> Result<SessionSaveResult, CallError> {
        self.requests.lock().unwrap().push(request.clone());
        match &self.failure {
            Some(error) => Err(error.clone()),
            None => Ok(SessionSaveResult {
                success: true,
                error: None,
            }),
        }
    }
}

#[derive(Default)]
pub struct RecordingEscalation {
    requests: Mutex<Vec<EscalationRequest>>,
}

impl RecordingEscalation {
    pub fn requests(&self) -> Vec<EscalationRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl EscalationTask for RecordingEscalation {
    async fn escalate(&self, request: EscalationRequest) -> Result<(), CallError> {
        self.requests.lock().unwrap().push(request);
        Ok(())
    }
}

// ============================================================================
// Timer
// ============================================================================

/// Drops the run id segment from a timer key: `inst-1-<run>-c1-pause`
/// becomes `inst-1-c1-pause`.
pub fn without_run_id(key: &str) -> String {
    let mut parts: Vec<&str> = key.split('-').collect();
    assert!(parts.len() >= 4, "unexpected timer key {key}");
    parts.remove(parts.len() - 3);
    parts.join("-")
}

/// Returns immediately and remembers every wait it was asked for.
#[derive(Default)]
pub struct RecordingTimer {
    waits: Mutex<Vec<(String, Duration)>>,
}

impl RecordingTimer {
    /// Keys exactly as the controller passed them.
    pub fn raw_keys(&self) -> Vec<String> {
        self.waits.lock().unwrap().iter().map(|(k, _)| k.clone()).collect()
    }

    /// Waits with the run id stripped from their keys.
    pub fn waits(&self) -> Vec<(String, Duration)> {
        self.waits
            .lock()
            .unwrap()
            .iter()
            .map(|(k, d)| (without_run_id(k), *d))
            .collect()
    }

    /// Waits longer than the inter-cycle pause.
    pub fn long_waits(&self) -> Vec<(String, Duration)> {
        self.waits()
            .into_iter()
            .filter(|(_, d)| *d > Duration::from_secs(3))
            .collect()
    }
}

#[async_trait]
impl DurableTimer for RecordingTimer {
    async fn sleep(&self, key: &str, duration: Duration) -> anyhow::Result<()> {
        self.waits.lock().unwrap().push((key.to_string(), duration));
        Ok(())
    }
}

// ============================================================================
// Harness
// ============================================================================

pub struct Harness {
    pub act: Arc<ScriptedAct>,
    pub replan: Arc<StubReplan>,
    pub sessions: Arc<StubSessionSave>,
    pub escalations: Arc<RecordingEscalation>,
    pub timer: Arc<RecordingTimer>,
    pub config: PilotConfig,
}

impl Harness {
    pub fn new(act: ScriptedAct) -> Self {
        Self {
            act: Arc::new(act),
            replan: Arc::new(StubReplan::succeeding("plan-2")),
            sessions: Arc::new(StubSessionSave::default()),
            escalations: Arc::new(RecordingEscalation::default()),
            timer: Arc::new(RecordingTimer::default()),
            config: PilotConfig::default(),
        }
    }

    pub fn with_replan(mut self, replan: StubReplan) -> Self {
        self.replan = Arc::new(replan);
        self
    }

    pub fn with_session_save(mut self, sessions: StubSessionSave) -> Self {
        self.sessions = Arc::new(sessions);
        self
    }

    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            act: self.act.clone(),
            replan: self.replan.clone(),
            session_save: self.sessions.clone(),
            escalation: self.escalations.clone(),
        }
    }

    pub fn controller(&self) -> PlanCycleController {
        PlanCycleController::new(self.collaborators(), self.timer.clone(), &self.config)
    }
}
