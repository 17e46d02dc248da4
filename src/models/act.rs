//! Wire shapes exchanged with the collaborator operations.
//!
//! Every optional field defaults when absent so partially populated agent
//! responses still deserialize.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::cycle::CycleEntry;
use super::params::PlanParams;

// ============================================================================
// Act Operation
// ============================================================================

/// Result of one act call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActResult {
    pub success: bool,
    #[serde(default)]
    pub plan_completed: Option<bool>,
    #[serde(default)]
    pub instance_plan_id: Option<String>,
    #[serde(default)]
    pub data: ActData,
    #[serde(default)]
    pub error: Option<String>,
}

/// Payload attached to an act result.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActData {
    /// Free-form text or a partially structured object from the remote agent
    #[serde(default)]
    pub agent_response: Option<Value>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub step: Option<StepInfo>,
    #[serde(default)]
    pub plan_progress: Option<PlanProgress>,
    #[serde(default)]
    pub execution_time_ms: Option<u64>,
    #[serde(default)]
    pub steps_executed: Option<u32>,
    #[serde(default)]
    pub token_usage: Option<TokenUsage>,
    #[serde(default)]
    pub remote_instance_id: Option<String>,
    #[serde(default)]
    pub instance_status: Option<String>,
    #[serde(default)]
    pub plan_failed: Option<bool>,
    #[serde(default)]
    pub failure_reason: Option<String>,
    #[serde(default)]
    pub new_plan_required: Option<bool>,
    /// `true` or an object naming `platform` / `domain`
    #[serde(default)]
    pub new_session: Option<Value>,
    /// `true` or an object naming `platform` / `domain`
    #[serde(default)]
    pub session_needed: Option<Value>,
    #[serde(default)]
    pub session_saved: Option<bool>,
    #[serde(default)]
    pub user_attention_required: Option<bool>,
    #[serde(default)]
    pub instance_paused: Option<bool>,
    #[serde(default)]
    pub waiting_for_instructions: Option<bool>,
}

/// The plan step the remote agent reported on.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepInfo {
    #[serde(default, alias = "step_number")]
    pub number: Option<u32>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    /// Declared step type (e.g. `session_save`, `authentication`)
    #[serde(default, rename = "type", alias = "step_type")]
    pub step_type: Option<String>,
}

impl StepInfo {
    /// Declared type, lowercased and trimmed.
    pub fn declared_type(&self) -> Option<String> {
        self.step_type
            .as_deref()
            .map(|t| t.trim().to_lowercase())
            .filter(|t| !t.is_empty())
    }
}

/// Progress as reported by the remote side. Any field may be missing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlanProgress {
    #[serde(default)]
    pub completed_steps: Option<u32>,
    #[serde(default)]
    pub total_steps: Option<u32>,
    #[serde(default)]
    pub percentage: Option<f64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    #[serde(default, alias = "input_tokens")]
    pub input: u64,
    #[serde(default, alias = "output_tokens")]
    pub output: u64,
}

impl TokenUsage {
    pub fn new(input: u64, output: u64) -> Self {
        Self { input, output }
    }

    pub fn add(&mut self, other: &TokenUsage) {
        self.input = self.input.saturating_add(other.input);
        self.output = self.output.saturating_add(other.output);
    }

    pub fn total(&self) -> u64 {
        self.input.saturating_add(self.output)
    }
}

// ============================================================================
// Replan / Session Save / Escalation
// ============================================================================

/// Request for a replacement plan, carrying recent cycles as failure context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplanRequest {
    #[serde(flatten)]
    pub params: PlanParams,
    pub error_context: Vec<CycleEntry>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReplanResult {
    pub success: bool,
    #[serde(default)]
    pub instance_plan_id: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSaveRequest {
    pub remote_instance_id: String,
    pub site_id: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionSaveResult {
    pub success: bool,
    #[serde(default)]
    pub error: Option<String>,
}

/// Payload for a detached human-intervention task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscalationRequest {
    #[serde(rename = "conversationId")]
    pub conversation_id: String,
    pub message: String,
    pub user_id: Option<String>,
    #[serde(rename = "agentId")]
    pub agent_id: String,
    pub conversation_title: String,
    pub site_id: String,
    pub origin: String,
}
