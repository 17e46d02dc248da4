pub mod classifier;
pub mod controller;
pub mod escalation;
pub mod finalizer;
pub mod guardrails;
pub mod session;
pub mod state;
pub mod timer;

pub use classifier::{classify, is_auth_step, is_session_save_signal};
pub use controller::{PAUSED_FOR_INSTRUCTIONS_REASON, PlanCycleController};
pub use escalation::{EscalationDispatcher, conversation_id};
pub use finalizer::{build_report, finalize};
pub use guardrails::{CAP_EXCEEDED_REASON, GuardrailHardStop, Guardrails};
pub use session::{SessionLifecycleHandler, SessionSaveOutcome};
pub use state::{PendingWait, RunState, RunStatus, SCHEMA_VERSION, WaitKind};
pub use timer::{DurableTimer, FileTimer};
