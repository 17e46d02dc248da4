//! Session lifecycle handler.
//!
//! The remote agent may acquire an authentication session mid-plan and then
//! run a `session_save` step. Saving is best-effort persistence: nothing here
//! can fail the plan.

use std::sync::Arc;

use tracing::{info, warn};

use crate::collaborators::SessionSaveOperation;
use crate::models::{CycleEntry, SessionSaveRequest};

/// What happened to a session-save request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionSaveOutcome {
    Saved,
    /// No remote instance id on the cycle entry
    Skipped,
    Failed(String),
}

pub struct SessionLifecycleHandler {
    save: Arc<dyn SessionSaveOperation>,
}

impl SessionLifecycleHandler {
    pub fn new(save: Arc<dyn SessionSaveOperation>) -> Self {
        Self { save }
    }

    /// New sessions are only logged; the plan follows up with a save step.
    pub fn on_new_session(&self, cycle: u32, platform: Option<&str>, domain: Option<&str>) {
        info!(
            "Cycle {}: new session acquired (platform: {}, domain: {})",
            cycle,
            platform.unwrap_or("unknown"),
            domain.unwrap_or("unknown")
        );
    }

    /// Persist the session acquired by the instance named on `entry`.
    pub async fn save_session(&self, entry: &CycleEntry, site_id: &str) -> SessionSaveOutcome {
        let Some(remote_instance_id) = entry
            .remote_instance_id
            .as_deref()
            .filter(|id| !id.trim().is_empty())
        else {
            warn!(
                "Cycle {}: session save step completed without a remote instance id, skipping save",
                entry.cycle
            );
            return SessionSaveOutcome::Skipped;
        };

        let request = SessionSaveRequest {
            remote_instance_id: remote_instance_id.to_string(),
            site_id: site_id.to_string(),
        };

        match self.save.save_session(&request).await {
            Ok(result) if result.success => {
                info!(
                    "Cycle {}: session saved for remote instance {}",
                    entry.cycle, remote_instance_id
                );
                SessionSaveOutcome::Saved
            }
            Ok(result) => {
                let reason = result
                    .error
                    .unwrap_or_else(|| "session save reported failure".to_string());
                warn!("Cycle {}: session save failed: {}", entry.cycle, reason);
                SessionSaveOutcome::Failed(reason)
            }
            Err(e) => {
                warn!("Cycle {}: session save call failed: {}", entry.cycle, e);
                SessionSaveOutcome::Failed(e.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CallError;
    use crate::models::{SessionSaveResult, StepInfo};
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct FakeSave {
        requests: Mutex<Vec<SessionSaveRequest>>,
        response: Result<SessionSaveResult, CallError>,
    }

    #[async_trait]
    impl SessionSaveOperation for FakeSave {
        async fn save_session(
            &self,
            request: &SessionSaveRequest,
        ) -> Result<SessionSaveResult, CallError> {
            self.requests.lock().unwrap().push(request.clone());
            self.response.clone()
        }
    }

    fn save_entry(remote_instance_id: Option<&str>) -> CycleEntry {
        let mut entry = CycleEntry::transport_failure(4, "unused");
        entry.plan_failed = false;
        entry.remote_instance_id = remote_instance_id.map(String::from);
        entry.step = Some(StepInfo {
            number: Some(4),
            status: Some("completed".to_string()),
            step_type: Some("session_save".to_string()),
            ..Default::default()
        });
        entry
    }

    fn make_handler(response: Result<SessionSaveResult, CallError>) -> (SessionLifecycleHandler, Arc<FakeSave>) {
        let fake = Arc::new(FakeSave {
            requests: Mutex::new(Vec::new()),
            response,
        });
        (SessionLifecycleHandler::new(fake.clone()), fake)
    }

    #[tokio::test]
    async fn test_save_uses_remote_instance_and_site() {
        let (handler, fake) = make_handler(Ok(SessionSaveResult {
            success: true,
            error: None,
        }));

        let outcome = handler.save_session(&save_entry(Some("remote-1")), "site-9").await;
        assert_eq!(outcome, SessionSaveOutcome::Saved);

        let requests = fake.requests.lock().unwrap();
        assert_eq!(
            requests.as_slice(),
            &[SessionSaveRequest {
                remote_instance_id: "remote-1".to_string(),
                site_id: "site-9".to_string()
            }]
        );
    }

    #[tokio::test]
    async fn test_missing_remote_instance_is_skipped() {
        let (handler, fake) = make_handler(Ok(SessionSaveResult::default()));

        let outcome = handler.save_session(&save_entry(None), "site-9").await;
        assert_eq!(outcome, SessionSaveOutcome::Skipped);
        assert!(fake.requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failures_are_reported_not_raised() {
        let (handler, _) = make_handler(Ok(SessionSaveResult {
            success: false,
            error: Some("vault unavailable".to_string()),
        }));
        let outcome = handler.save_session(&save_entry(Some("remote-1")), "site-9").await;
        assert_eq!(outcome, SessionSaveOutcome::Failed("vault unavailable".to_string()));

        let (handler, _) = make_handler(Err(CallError::Transport("reset".to_string())));
        let outcome = handler.save_session(&save_entry(Some("remote-1")), "site-9").await;
        assert!(matches!(outcome, SessionSaveOutcome::Failed(_)));
    }
}
