//! Guardrails - hard limits on a plan run.
//!
//! The cycle cap bounds every run no matter what the remote agent reports,
//! and the attention retry limit bounds how long a non-authentication
//! attention event can keep the run alive.

use serde::{Deserialize, Serialize};

use crate::config::LoopConfig;

/// Reason text used for cap-exceeded failures
pub const CAP_EXCEEDED_REASON: &str = "cap exceeded";

/// Hard stops that terminate the run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum GuardrailHardStop {
    /// Maximum cycles reached without a completion or failure signal
    CycleCapExceeded { cycle: u32, limit: u32 },
}

impl std::fmt::Display for GuardrailHardStop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GuardrailHardStop::CycleCapExceeded { cycle, limit } => write!(
                f,
                "{}: no completion or failure signal after {} cycles (limit {})",
                CAP_EXCEEDED_REASON, cycle, limit
            ),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Guardrails {
    /// Maximum act calls per run
    pub max_cycles: u32,
    /// Extra attempts for non-authentication attention events
    pub attention_retry_limit: u32,
}

impl Default for Guardrails {
    fn default() -> Self {
        Self::from_config(&LoopConfig::default())
    }
}

impl Guardrails {
    pub fn from_config(config: &LoopConfig) -> Self {
        Self {
            max_cycles: config.max_cycles,
            attention_retry_limit: config.attention_retry_limit,
        }
    }

    /// Err once `cycle` has reached the cap.
    pub fn check_cycle_cap(&self, cycle: u32) -> Result<(), GuardrailHardStop> {
        if cycle >= self.max_cycles {
            return Err(GuardrailHardStop::CycleCapExceeded {
                cycle,
                limit: self.max_cycles,
            });
        }
        Ok(())
    }

    /// Whether another attention wait is allowed after `retries` earlier ones.
    pub fn attention_retry_allowed(&self, retries: u32) -> bool {
        retries < self.attention_retry_limit
    }
}
