//! Run state - everything a plan run carries across cycles.
//!
//! The state is checkpointed to disk before every suspension so that a
//! restarted process can resume the run at the same logical point.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::config::LoopConfig;
use crate::models::{CycleEntry, EscalationRecord, FailureKind, PlanParams};
use crate::slug::file_slug;

/// Current schema version for checkpoint files.
/// Bump when adding/removing/modifying fields.
pub const SCHEMA_VERSION: u32 = 2;

const CHECKPOINT_FILE: &str = "checkpoint.json";

/// Distinguishes runs started within the same millisecond
static RUN_SEQ: AtomicU32 = AtomicU32::new(0);

// ============================================================================
// Run Status
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum RunStatus {
    Running,
    Completed,
    Failed { kind: FailureKind, reason: String },
}

impl RunStatus {
    pub fn failed(kind: FailureKind, reason: impl Into<String>) -> Self {
        RunStatus::Failed {
            kind,
            reason: reason.into(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunStatus::Running)
    }
}

// ============================================================================
// Pending Waits
// ============================================================================

/// What a suspension is waiting for, and therefore what happens after it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WaitKind {
    /// Pause between two cycles
    InterCycle,
    /// Waiting for a session to be supplied; escalates afterwards
    SessionNeeded {
        platform: Option<String>,
        domain: Option<String>,
    },
    /// Waiting on an authentication step; escalates afterwards
    AuthAttention { explanation: String },
    /// Giving a non-authentication attention event one more chance
    AttentionRetry { explanation: String },
}

impl WaitKind {
    pub fn label(&self) -> &'static str {
        match self {
            WaitKind::InterCycle => "pause",
            WaitKind::SessionNeeded { .. } => "session",
            WaitKind::AuthAttention { .. } => "auth",
            WaitKind::AttentionRetry { .. } => "attention",
        }
    }

    pub fn duration(&self, config: &LoopConfig) -> Duration {
        match self {
            WaitKind::InterCycle => config.inter_cycle_delay(),
            _ => config.attention_wait(),
        }
    }
}

/// A suspension in progress. Its key addresses the durable timer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PendingWait {
    pub kind: WaitKind,
    pub cycle: u32,
    pub key: String,
}

impl PendingWait {
    /// `scope` is the run's [`RunState::timer_scope`]; keys from different
    /// runs of the same instance never coincide.
    pub fn new(kind: WaitKind, scope: &str, cycle: u32) -> Self {
        let key = format!("{}-c{}-{}", scope, cycle, kind.label());
        Self { kind, cycle, key }
    }
}

// ============================================================================
// Run State
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunState {
    /// Schema version for migration support
    pub schema_version: u32,
    /// Identifies this run among all runs of the same instance
    #[serde(default)]
    pub run_id: String,
    /// Plan parameters; only `instance_plan_id` changes during a run
    pub params: PlanParams,
    /// Index of the last started cycle (0 before the first)
    pub cycle: u32,
    /// Attention waits used since the last step outcome
    pub attention_retries: u32,
    /// Append-only cycle log
    entries: Vec<CycleEntry>,
    /// Escalations dispatched so far
    pub escalations: Vec<EscalationRecord>,
    pub status: RunStatus,
    /// Suspension in progress, if any
    pub pending_wait: Option<PendingWait>,
    /// Run start time in ISO8601 format
    pub started_at: String,
}

impl RunState {
    pub fn new(params: PlanParams) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            run_id: new_run_id(),
            params,
            cycle: 0,
            attention_retries: 0,
            entries: Vec::new(),
            escalations: Vec::new(),
            status: RunStatus::Running,
            pending_wait: None,
            started_at: chrono::Utc::now().to_rfc3339(),
        }
    }

    /// Prefix for this run's durable timer keys.
    pub fn timer_scope(&self) -> String {
        format!("{}-{}", self.params.instance_id, self.run_id)
    }

    /// A wait at `cycle` keyed to this run.
    pub fn wait_for(&self, kind: WaitKind, cycle: u32) -> PendingWait {
        PendingWait::new(kind, &self.timer_scope(), cycle)
    }

    /// Start the next cycle and return its index.
    pub fn next_cycle(&mut self) -> u32 {
        self.cycle += 1;
        self.cycle
    }

    /// Append a cycle entry. Entries are never modified once recorded.
    pub fn record(&mut self, entry: CycleEntry) {
        debug_assert!(
            self.entries.last().is_none_or(|last| last.cycle < entry.cycle),
            "cycle indices must be strictly increasing"
        );
        self.entries.push(entry);
    }

    pub fn entries(&self) -> &[CycleEntry] {
        &self.entries
    }

    pub fn last_entry(&self) -> Option<&CycleEntry> {
        self.entries.last()
    }

    /// The last `n` entries, oldest first.
    pub fn recent_entries(&self, n: usize) -> &[CycleEntry] {
        let start = self.entries.len().saturating_sub(n);
        &self.entries[start..]
    }

    pub fn reset_attention_retries(&mut self) {
        self.attention_retries = 0;
    }

    pub fn finish(&mut self, status: RunStatus) {
        self.pending_wait = None;
        self.status = status;
    }

    /// Checkpoint directory for an instance under `runs_dir`.
    pub fn run_dir(runs_dir: &Path, instance_id: &str) -> PathBuf {
        runs_dir.join(file_slug(instance_id))
    }

    /// Save state to a JSON file using atomic write pattern.
    pub fn save(&self, run_dir: &Path) -> Result<()> {
        fs::create_dir_all(run_dir).context("Failed to create run directory")?;

        let state_file = run_dir.join(CHECKPOINT_FILE);
        let temp_file = run_dir.join(format!(".{}.tmp", CHECKPOINT_FILE));

        let json = serde_json::to_string_pretty(self).context("Failed to serialize run state")?;

        fs::write(&temp_file, &json).context("Failed to write temp checkpoint file")?;
        fs::rename(&temp_file, &state_file).context("Failed to rename checkpoint file")?;

        Ok(())
    }

    /// Load state from a run directory.
    /// Returns None if no checkpoint exists or it was written by another schema.
    pub fn load(run_dir: &Path) -> Result<Option<Self>> {
        let state_file = run_dir.join(CHECKPOINT_FILE);

        if !state_file.exists() {
            return Ok(None);
        }

        let json = fs::read_to_string(&state_file).context("Failed to read checkpoint file")?;
        let state: Self = serde_json::from_str(&json).context("Failed to parse checkpoint file")?;

        if state.schema_version != SCHEMA_VERSION {
            tracing::warn!(
                "Checkpoint schema version mismatch: {} vs {}. Starting fresh.",
                state.schema_version,
                SCHEMA_VERSION
            );
            return Ok(None);
        }

        Ok(Some(state))
    }

    /// Whether this checkpoint describes a run that can be picked up again.
    pub fn can_resume(&self) -> bool {
        !self.status.is_terminal()
    }
}

fn new_run_id() -> String {
    let seq = RUN_SEQ.fetch_add(1, Ordering::Relaxed);
    format!("{}n{}", chrono::Utc::now().format("%Y%m%d%H%M%S%3f"), seq)
}
