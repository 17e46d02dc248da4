use serde::{Deserialize, Serialize};

use super::act::TokenUsage;
use super::cycle::{CycleEntry, Progress};

/// How a failed run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The act call itself errored
    TransportFailure,
    /// The remote side declared the plan failed
    DeclaredFailure,
    /// Remote instance stopped, or paused awaiting manual instructions
    BlockedInstance,
    /// A session / authentication / attention wait ran out
    AttentionTimeout,
    /// A replacement plan could not be created
    ReplanFailure,
    /// The cycle cap was reached without a completion or failure signal
    CapExceeded,
    /// Cancelled between cycles
    Cancelled,
    /// Error or panic outside the per-cycle handling
    Internal,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            FailureKind::TransportFailure => "transport_failure",
            FailureKind::DeclaredFailure => "declared_failure",
            FailureKind::BlockedInstance => "blocked_instance",
            FailureKind::AttentionTimeout => "attention_timeout",
            FailureKind::ReplanFailure => "replan_failure",
            FailureKind::CapExceeded => "cap_exceeded",
            FailureKind::Cancelled => "cancelled",
            FailureKind::Internal => "internal",
        };
        write!(f, "{}", label)
    }
}

/// One escalation dispatched during a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscalationRecord {
    pub cycle: u32,
    pub conversation_id: String,
    pub reason: String,
    /// False when the detached task could not be spawned
    pub spawned: bool,
}

/// Final outcome of a run, produced exactly once at its single exit point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalReport {
    pub success: bool,
    pub instance_id: String,
    pub instance_plan_id: Option<String>,
    pub cycles: Vec<CycleEntry>,
    pub total_cycles: u32,
    pub final_progress: Progress,
    pub total_execution_time_ms: u64,
    pub total_token_usage: TokenUsage,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_kind: Option<FailureKind>,
    #[serde(default)]
    pub escalations: Vec<EscalationRecord>,
}
