pub mod collaborators;
pub mod config;
pub mod error;
pub mod models;
pub mod orchestrator;
pub mod output;
pub mod slug;

// Re-export main types
pub use collaborators::{
    ActOperation, Collaborators, EscalationTask, HttpCollaborators, ReplanOperation,
    SessionSaveOperation,
};
pub use config::PilotConfig;
pub use error::CallError;
pub use models::{ActResult, CycleEntry, FailureKind, FinalReport, PlanParams, ResponseVariant};
pub use orchestrator::{DurableTimer, FileTimer, PlanCycleController, RunState};
pub use output::{FileReportWriter, ReportWriter};

// Re-export slug utilities
pub use slug::{slugify, slugify_truncate};
