//! Execution finalizer - turns a finished run into its [`FinalReport`].
//!
//! Pure aggregation: the same inputs always give the same report, and no
//! input (empty log, odd numbers, a run still marked running) makes it panic.

use crate::models::{
    CycleEntry, EscalationRecord, FailureKind, FinalReport, PlanParams, Progress, TokenUsage,
};

use super::state::{RunState, RunStatus};

/// Build the report for a run state.
pub fn finalize(state: &RunState) -> FinalReport {
    build_report(
        &state.params,
        state.entries(),
        &state.status,
        &state.escalations,
    )
}

/// Aggregate an ordered cycle log into a report.
pub fn build_report(
    params: &PlanParams,
    entries: &[CycleEntry],
    status: &RunStatus,
    escalations: &[EscalationRecord],
) -> FinalReport {
    let mut total_execution_time_ms: u64 = 0;
    let mut total_token_usage = TokenUsage::default();
    for entry in entries {
        total_execution_time_ms = total_execution_time_ms.saturating_add(entry.execution_time_ms);
        total_token_usage.add(&entry.token_usage);
    }

    let final_progress = entries
        .last()
        .map(|e| sanitize_progress(e.progress))
        .unwrap_or_default();

    let (success, error, failure_kind) = match status {
        RunStatus::Completed => (true, None, None),
        RunStatus::Failed { kind, reason } => (false, Some(reason.clone()), Some(*kind)),
        RunStatus::Running => (
            false,
            Some("run ended without reaching a terminal state".to_string()),
            Some(FailureKind::Internal),
        ),
    };

    FinalReport {
        success,
        instance_id: params.instance_id.clone(),
        instance_plan_id: params.instance_plan_id.clone(),
        cycles: entries.to_vec(),
        total_cycles: u32::try_from(entries.len()).unwrap_or(u32::MAX),
        final_progress,
        total_execution_time_ms,
        total_token_usage,
        error,
        failure_kind,
        escalations: escalations.to_vec(),
    }
}

fn sanitize_progress(progress: Progress) -> Progress {
    Progress {
        percentage: if progress.percentage.is_finite() {
            progress.percentage
        } else {
            0.0
        },
        ..progress
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ResponseType;

    fn entry(cycle: u32, percentage: f64, time_ms: u64, tokens: (u64, u64)) -> CycleEntry {
        CycleEntry {
            cycle,
            step: None,
            progress: Progress {
                completed_steps: cycle,
                total_steps: 4,
                percentage,
            },
            message: format!("cycle {}", cycle),
            execution_time_ms: time_ms,
            token_usage: TokenUsage::new(tokens.0, tokens.1),
            remote_instance_id: None,
            plan_completed: false,
            plan_failed: false,
            failure_reason: None,
            instance_status: None,
            instance_paused: None,
            waiting_for_instructions: None,
            response_type: ResponseType::StepCompleted,
            timestamp: "2026-01-01T00:00:00+00:00".to_string(),
        }
    }

    fn params() -> PlanParams {
        PlanParams::new("site", "outreach", "inst-1").with_plan_id("plan-1")
    }

    #[test]
    fn test_sums_and_final_progress() {
        let entries = vec![entry(1, 25.0, 1_000, (100, 20)), entry(2, 50.0, 1_500, (200, 40))];
        let report = build_report(&params(), &entries, &RunStatus::Completed, &[]);

        assert!(report.success);
        assert_eq!(report.total_cycles, 2);
        assert_eq!(report.total_execution_time_ms, 2_500);
        assert_eq!(report.total_token_usage, TokenUsage::new(300, 60));
        assert_eq!(report.final_progress.percentage, 50.0);
        assert_eq!(report.instance_plan_id.as_deref(), Some("plan-1"));
        assert!(report.error.is_none());
    }

    #[test]
    fn test_empty_log() {
        let status = RunStatus::failed(FailureKind::Internal, "checkpoint unreadable");
        let report = build_report(&params(), &[], &status, &[]);

        assert!(!report.success);
        assert_eq!(report.total_cycles, 0);
        assert_eq!(report.final_progress, Progress::default());
        assert_eq!(report.total_execution_time_ms, 0);
        assert_eq!(report.error.as_deref(), Some("checkpoint unreadable"));
        assert_eq!(report.failure_kind, Some(FailureKind::Internal));
    }

    #[test]
    fn test_malformed_values_do_not_panic() {
        let entries = vec![
            entry(1, f64::NAN, u64::MAX, (u64::MAX, 1)),
            entry(2, f64::INFINITY, 10, (10, u64::MAX)),
        ];
        let report = build_report(&params(), &entries, &RunStatus::Running, &[]);

        assert_eq!(report.total_execution_time_ms, u64::MAX);
        assert_eq!(report.total_token_usage, TokenUsage::new(u64::MAX, u64::MAX));
        assert_eq!(report.final_progress.percentage, 0.0);
        assert_eq!(report.failure_kind, Some(FailureKind::Internal));
    }

    #[test]
    fn test_finalizer_is_pure() {
        let entries = vec![entry(1, 25.0, 1_000, (100, 20)), entry(2, 100.0, 900, (50, 5))];
        let status = RunStatus::failed(FailureKind::CapExceeded, "cap exceeded");
        let escalations = vec![EscalationRecord {
            cycle: 2,
            conversation_id: "plan-inst-1-x-c2".to_string(),
            reason: "x".to_string(),
            spawned: true,
        }];

        let first = build_report(&params(), &entries, &status, &escalations);
        let second = build_report(&params(), &entries, &status, &escalations);
        assert_eq!(first, second);
    }
}
