use serde::{Deserialize, Serialize};

use super::act::{PlanProgress, StepInfo, TokenUsage};
use super::response::ResponseType;

/// Normalized plan progress recorded on every cycle entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Progress {
    pub completed_steps: u32,
    pub total_steps: u32,
    pub percentage: f64,
}

impl Progress {
    /// Normalize reported progress, deriving the percentage from step counts
    /// when the remote side left it out.
    pub fn from_reported(reported: Option<&PlanProgress>) -> Self {
        let Some(reported) = reported else {
            return Self::default();
        };

        let completed_steps = reported.completed_steps.unwrap_or(0);
        let total_steps = reported.total_steps.unwrap_or(0);
        let percentage = match reported.percentage {
            Some(p) if p.is_finite() => p,
            _ if total_steps > 0 => (completed_steps as f64 / total_steps as f64) * 100.0,
            _ => 0.0,
        };

        Self {
            completed_steps,
            total_steps,
            percentage,
        }
    }

    /// Exactly 100%.
    pub fn is_complete(&self) -> bool {
        (self.percentage - 100.0).abs() < f64::EPSILON
    }
}

/// Immutable record of one act round-trip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleEntry {
    /// 1-indexed, strictly increasing
    pub cycle: u32,
    pub step: Option<StepInfo>,
    pub progress: Progress,
    pub message: String,
    pub execution_time_ms: u64,
    pub token_usage: TokenUsage,
    pub remote_instance_id: Option<String>,
    pub plan_completed: bool,
    pub plan_failed: bool,
    pub failure_reason: Option<String>,
    pub instance_status: Option<String>,
    pub instance_paused: Option<bool>,
    pub waiting_for_instructions: Option<bool>,
    pub response_type: ResponseType,
    /// RFC 3339
    pub timestamp: String,
}

impl CycleEntry {
    /// Synthetic entry for an act call that never produced a result.
    pub fn transport_failure(cycle: u32, reason: &str) -> Self {
        Self {
            cycle,
            step: None,
            progress: Progress::default(),
            message: reason.to_string(),
            execution_time_ms: 0,
            token_usage: TokenUsage::default(),
            remote_instance_id: None,
            plan_completed: false,
            plan_failed: true,
            failure_reason: Some(reason.to_string()),
            instance_status: None,
            instance_paused: None,
            waiting_for_instructions: None,
            response_type: ResponseType::StepFailed,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_derives_percentage_from_steps() {
        let progress = Progress::from_reported(Some(&PlanProgress {
            completed_steps: Some(3),
            total_steps: Some(3),
            percentage: None,
        }));
        assert!(progress.is_complete());

        let progress = Progress::from_reported(Some(&PlanProgress {
            completed_steps: Some(1),
            total_steps: Some(4),
            percentage: None,
        }));
        assert_eq!(progress.percentage, 25.0);
        assert!(!progress.is_complete());
    }

    #[test]
    fn test_progress_prefers_reported_percentage() {
        let progress = Progress::from_reported(Some(&PlanProgress {
            completed_steps: Some(1),
            total_steps: Some(4),
            percentage: Some(100.0),
        }));
        assert!(progress.is_complete());
    }

    #[test]
    fn test_progress_missing_is_zero() {
        let progress = Progress::from_reported(None);
        assert_eq!(progress, Progress::default());

        let progress = Progress::from_reported(Some(&PlanProgress {
            completed_steps: None,
            total_steps: None,
            percentage: Some(f64::NAN),
        }));
        assert_eq!(progress.percentage, 0.0);
    }

    #[test]
    fn test_transport_failure_entry() {
        let entry = CycleEntry::transport_failure(1, "act call failed: connection refused");
        assert_eq!(entry.cycle, 1);
        assert!(entry.plan_failed);
        assert!(!entry.plan_completed);
        assert_eq!(entry.response_type, ResponseType::StepFailed);
    }
}
