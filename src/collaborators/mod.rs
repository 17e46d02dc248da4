//! Contracts for the operations the plan controller depends on.
//!
//! Transport, authentication and per-call retries belong to the implementations;
//! the controller only sees the final result of each call.

mod http;

pub use http::{HttpCollaborators, RetryPolicy};

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::CallError;
use crate::models::{
    ActResult, EscalationRequest, PlanParams, ReplanRequest, ReplanResult, SessionSaveRequest,
    SessionSaveResult,
};

/// The per-cycle call that lets the remote agent execute its next step.
#[async_trait]
pub trait ActOperation: Send + Sync {
    async fn act(&self, params: &PlanParams) -> Result<ActResult, CallError>;
}

/// Requests a replacement plan.
#[async_trait]
pub trait ReplanOperation: Send + Sync {
    async fn replan(&self, request: &ReplanRequest) -> Result<ReplanResult, CallError>;
}

/// Persists an authentication session acquired by the remote agent.
#[async_trait]
pub trait SessionSaveOperation: Send + Sync {
    async fn save_session(
        &self,
        request: &SessionSaveRequest,
    ) -> Result<SessionSaveResult, CallError>;
}

/// Human-intervention task. Runs detached; its result is only logged.
#[async_trait]
pub trait EscalationTask: Send + Sync {
    async fn escalate(&self, request: EscalationRequest) -> Result<(), CallError>;
}

/// The full set of collaborators a controller needs.
#[derive(Clone)]
pub struct Collaborators {
    pub act: Arc<dyn ActOperation>,
    pub replan: Arc<dyn ReplanOperation>,
    pub session_save: Arc<dyn SessionSaveOperation>,
    pub escalation: Arc<dyn EscalationTask>,
}

impl Collaborators {
    /// Use one implementation for every operation.
    pub fn uniform<T>(shared: Arc<T>) -> Self
    where
        T: ActOperation + ReplanOperation + SessionSaveOperation + EscalationTask + 'static,
    {
        Self {
            act: shared.clone(),
            replan: shared.clone(),
            session_save: shared.clone(),
            escalation: shared,
        }
    }
}
