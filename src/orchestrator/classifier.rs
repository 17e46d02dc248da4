//! Response classifier - maps a raw agent response onto a [`ResponseVariant`].
//!
//! Pure and deterministic. Recognition order, first match wins:
//! 1. Structured flags on the act data (`plan_failed`, `new_plan_required`, ...)
//! 2. A structured `agent_response` object carrying a `type` discriminator
//! 3. The reported `step.status`, when it is a terminal step outcome
//! 4. Free-text directives in the response text
//! 5. Free-text step outcomes ("step 3 completed")
//!
//! Anything else is `Unclassified`.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde_json::Value;

use crate::models::{ActData, ResponseVariant, StepInfo};

/// Declared step types that count as authentication steps
pub const AUTH_STEP_TYPES: &[&str] = &["authentication", "auth", "login", "session_acquisition"];

/// Declared step type that asks the caller to persist the acquired session
pub const SESSION_SAVE_STEP_TYPE: &str = "session_save";

static PLAN_FAILED_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)\bplan[\s_-]*(?:has[\s_-]+)?failed\b[\s:.\-]*(?P<reason>.*)")
        .expect("Invalid regex pattern")
});

static NEW_PLAN_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\bnew_plan\b|\bnew[\s-]+plan[\s_-]+(?:is[\s_-]+)?(?:required|needed)\b")
        .expect("Invalid regex pattern")
});

static NEW_SESSION_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\bnew[\s_-]*session(?:[\s_-]+(?:acquired|created|detected|established))?\b(?:\s+(?:on|for|with)\s+(?P<platform>[\w.-]+))?(?:\s*\((?P<domain>[^)\s]+)\))?",
    )
    .expect("Invalid regex pattern")
});

static SESSION_NEEDED_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\bsession[\s_-]*(?:is[\s_-]+)?(?:needed|required)\b(?:\s+(?:on|for|with)\s+(?P<platform>[\w.-]+))?(?:\s*\((?P<domain>[^)\s]+)\))?",
    )
    .expect("Invalid regex pattern")
});

static USER_ATTENTION_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)\buser[\s_-]*attention(?:[\s_-]*(?:is[\s_-]+)?(?:required|needed))?\b[\s:.\-]*(?P<explanation>.*)")
        .expect("Invalid regex pattern")
});

static STEP_OUTCOME_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\bstep[\s_#-]*(?P<number>\d+)?[\s:_-]*(?:(?:is|was|has been|has)\s+)?(?P<status>completed|complete|failed|canceled|cancelled)\b",
    )
    .expect("Invalid regex pattern")
});

/// Classify the payload of one act result.
pub fn classify(data: &ActData) -> ResponseVariant {
    classify_flags(data)
        .or_else(|| {
            data.agent_response
                .as_ref()
                .and_then(|response| classify_object(response, data))
        })
        .or_else(|| data.step.as_ref().and_then(classify_step_status))
        .or_else(|| response_text(data).and_then(|text| classify_directive_text(&text, data)))
        .or_else(|| response_text(data).and_then(|text| classify_step_text(&text, data)))
        .unwrap_or(ResponseVariant::Unclassified)
}

/// Whether the current step is an authentication step.
pub fn is_auth_step(data: &ActData, payload: Option<&Value>) -> bool {
    if let Some(flag) = payload
        .and_then(|p| p.get("is_auth_step"))
        .and_then(Value::as_bool)
    {
        return flag;
    }

    data.step
        .as_ref()
        .and_then(StepInfo::declared_type)
        .is_some_and(|t| AUTH_STEP_TYPES.contains(&t.as_str()))
}

/// Whether a completed step asks for the acquired session to be persisted.
pub fn is_session_save_signal(data: &ActData) -> bool {
    let declared = data
        .step
        .as_ref()
        .and_then(StepInfo::declared_type)
        .is_some_and(|t| t == SESSION_SAVE_STEP_TYPE);

    declared || data.session_saved.unwrap_or(false)
}

// ============================================================================
// Structured flags
// ============================================================================

fn classify_flags(data: &ActData) -> Option<ResponseVariant> {
    if data.plan_failed.unwrap_or(false) {
        let reason = data
            .failure_reason
            .clone()
            .filter(|r| !r.trim().is_empty())
            .or_else(|| response_text(data))
            .unwrap_or_else(|| "plan failed without a reason".to_string());
        return Some(ResponseVariant::PlanFailed { reason });
    }

    if data.new_plan_required.unwrap_or(false) {
        return Some(ResponseVariant::NewPlan);
    }

    if let Some(session) = data.new_session.as_ref().filter(|v| flag_set(v)) {
        return Some(ResponseVariant::NewSession {
            platform: str_field(session, "platform"),
            domain: str_field(session, "domain"),
        });
    }

    if let Some(session) = data.session_needed.as_ref().filter(|v| flag_set(v)) {
        return Some(ResponseVariant::SessionNeeded {
            platform: str_field(session, "platform"),
            domain: str_field(session, "domain"),
        });
    }

    if data.user_attention_required.unwrap_or(false) {
        let payload = data.agent_response.as_ref();
        let explanation = payload
            .and_then(|p| str_field(p, "explanation"))
            .or_else(|| response_text(data))
            .unwrap_or_else(|| "user attention required".to_string());
        return Some(ResponseVariant::UserAttention {
            explanation,
            is_auth_step: is_auth_step(data, payload),
        });
    }

    None
}

/// `true`, a non-empty object, or a truthy string.
fn flag_set(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Object(map) => !map.is_empty(),
        Value::String(s) => {
            let s = s.trim();
            !s.is_empty() && !s.eq_ignore_ascii_case("false")
        }
        _ => false,
    }
}

fn str_field(value: &Value, key: &str) -> Option<String> {
    value
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
}

fn u32_field(value: &Value, key: &str) -> Option<u32> {
    let field = value.get(key)?;
    field
        .as_u64()
        .and_then(|n| u32::try_from(n).ok())
        .or_else(|| field.as_str().and_then(|s| s.trim().parse().ok()))
}

// ============================================================================
// Structured agent_response object
// ============================================================================

fn classify_object(response: &Value, data: &ActData) -> Option<ResponseVariant> {
    let object = response.as_object()?;
    let discriminator = ["type", "response_type", "status"]
        .iter()
        .find_map(|key| object.get(*key).and_then(Value::as_str))?
        .trim()
        .to_lowercase();

    let step_number = u32_field(response, "step_number")
        .or_else(|| u32_field(response, "step"))
        .or_else(|| data.step.as_ref().and_then(|s| s.number));

    let variant = match discriminator.as_str() {
        "plan_failed" | "failed_plan" => ResponseVariant::PlanFailed {
            reason: str_field(response, "reason")
                .or_else(|| str_field(response, "message"))
                .unwrap_or_else(|| "plan failed without a reason".to_string()),
        },
        "new_plan" | "new_plan_required" | "replan" => ResponseVariant::NewPlan,
        "new_session" | "session_acquired" => ResponseVariant::NewSession {
            platform: str_field(response, "platform"),
            domain: str_field(response, "domain"),
        },
        "session_needed" | "session_required" => ResponseVariant::SessionNeeded {
            platform: str_field(response, "platform"),
            domain: str_field(response, "domain"),
        },
        "user_attention" | "user_attention_required" => ResponseVariant::UserAttention {
            explanation: str_field(response, "explanation")
                .or_else(|| str_field(response, "message"))
                .unwrap_or_else(|| "user attention required".to_string()),
            is_auth_step: is_auth_step(data, Some(response)),
        },
        "step_completed" | "completed" => ResponseVariant::StepCompleted { step_number },
        "step_failed" | "failed" => ResponseVariant::StepFailed { step_number },
        "step_canceled" | "step_cancelled" | "canceled" | "cancelled" => {
            ResponseVariant::StepCanceled { step_number }
        }
        _ => return None,
    };

    Some(variant)
}

// ============================================================================
// Free text
// ============================================================================

/// Text to scan: a string response, the text field of an object response,
/// or the top-level message.
fn response_text(data: &ActData) -> Option<String> {
    let from_response = data.agent_response.as_ref().and_then(|response| match response {
        Value::String(s) => Some(s.clone()),
        Value::Object(_) => ["message", "text", "content"]
            .iter()
            .find_map(|key| str_field(response, key)),
        _ => None,
    });

    from_response
        .or_else(|| data.message.clone())
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
}

fn named(caps: &Captures<'_>, name: &str) -> Option<String> {
    caps.name(name)
        .map(|m| m.as_str().trim().to_string())
        .filter(|s| !s.is_empty())
}

fn classify_directive_text(text: &str, data: &ActData) -> Option<ResponseVariant> {
    if let Some(caps) = PLAN_FAILED_RE.captures(text) {
        let reason = named(&caps, "reason").unwrap_or_else(|| text.to_string());
        return Some(ResponseVariant::PlanFailed { reason });
    }

    if NEW_PLAN_RE.is_match(text) {
        return Some(ResponseVariant::NewPlan);
    }

    if let Some(caps) = NEW_SESSION_RE.captures(text) {
        return Some(ResponseVariant::NewSession {
            platform: named(&caps, "platform"),
            domain: named(&caps, "domain"),
        });
    }

    if let Some(caps) = SESSION_NEEDED_RE.captures(text) {
        return Some(ResponseVariant::SessionNeeded {
            platform: named(&caps, "platform"),
            domain: named(&caps, "domain"),
        });
    }

    if let Some(caps) = USER_ATTENTION_RE.captures(text) {
        let explanation = named(&caps, "explanation").unwrap_or_else(|| text.to_string());
        return Some(ResponseVariant::UserAttention {
            explanation,
            is_auth_step: is_auth_step(data, data.agent_response.as_ref()),
        });
    }

    None
}

fn classify_step_text(text: &str, data: &ActData) -> Option<ResponseVariant> {
    let caps = STEP_OUTCOME_RE.captures(text)?;
    let step_number = caps
        .name("number")
        .and_then(|m| m.as_str().parse().ok())
        .or_else(|| data.step.as_ref().and_then(|s| s.number));
    let status = caps.name("status")?.as_str().to_lowercase();
    step_variant(&status, step_number)
}

fn classify_step_status(step: &StepInfo) -> Option<ResponseVariant> {
    let status = step.status.as_deref()?.trim().to_lowercase();
    step_variant(&status, step.number)
}

fn step_variant(status: &str, step_number: Option<u32>) -> Option<ResponseVariant> {
    match status {
        "completed" | "complete" | "done" | "success" | "succeeded" => {
            Some(ResponseVariant::StepCompleted { step_number })
        }
        "failed" | "error" => Some(ResponseVariant::StepFailed { step_number }),
        "canceled" | "cancelled" | "skipped" => Some(ResponseVariant::StepCanceled { step_number }),
        _ => None,
    }
}
