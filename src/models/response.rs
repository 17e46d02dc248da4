use serde::{Deserialize, Serialize};

/// Classified outcome of one agent response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponseVariant {
    /// The remote side declared the plan failed
    PlanFailed { reason: String },
    /// A replacement plan must be created before continuing
    NewPlan,
    /// The agent acquired a new authentication session
    NewSession {
        platform: Option<String>,
        domain: Option<String>,
    },
    /// The agent needs a session the caller must supply
    SessionNeeded {
        platform: Option<String>,
        domain: Option<String>,
    },
    /// A human has to look at something
    UserAttention {
        explanation: String,
        is_auth_step: bool,
    },
    StepCompleted { step_number: Option<u32> },
    StepFailed { step_number: Option<u32> },
    StepCanceled { step_number: Option<u32> },
    /// Nothing recognizable; never halts the loop on its own
    Unclassified,
}

impl ResponseVariant {
    pub fn response_type(&self) -> ResponseType {
        match self {
            ResponseVariant::PlanFailed { .. } => ResponseType::PlanFailed,
            ResponseVariant::NewPlan => ResponseType::NewPlan,
            ResponseVariant::NewSession { .. } => ResponseType::NewSession,
            ResponseVariant::SessionNeeded { .. } => ResponseType::SessionNeeded,
            ResponseVariant::UserAttention { .. } => ResponseType::UserAttention,
            ResponseVariant::StepCompleted { .. } => ResponseType::StepCompleted,
            ResponseVariant::StepFailed { .. } => ResponseType::StepFailed,
            ResponseVariant::StepCanceled { .. } => ResponseType::StepCanceled,
            ResponseVariant::Unclassified => ResponseType::Unclassified,
        }
    }

    /// Step outcomes reset the user-attention retry counter.
    pub fn is_step_outcome(&self) -> bool {
        matches!(
            self,
            ResponseVariant::StepCompleted { .. }
                | ResponseVariant::StepFailed { .. }
                | ResponseVariant::StepCanceled { .. }
        )
    }
}

/// Payload-free label of a [`ResponseVariant`], recorded on each cycle entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseType {
    PlanFailed,
    NewPlan,
    NewSession,
    SessionNeeded,
    UserAttention,
    StepCompleted,
    StepFailed,
    StepCanceled,
    Unclassified,
}

impl std::fmt::Display for ResponseType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            ResponseType::PlanFailed => "plan_failed",
            ResponseType::NewPlan => "new_plan",
            ResponseType::NewSession => "new_session",
            ResponseType::SessionNeeded => "session_needed",
            ResponseType::UserAttention => "user_attention",
            ResponseType::StepCompleted => "step_completed",
            ResponseType::StepFailed => "step_failed",
            ResponseType::StepCanceled => "step_canceled",
            ResponseType::Unclassified => "unclassified",
        };
        write!(f, "{}", label)
    }
}
