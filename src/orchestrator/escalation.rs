//! Escalation dispatcher - hands a run over to a human.
//!
//! Dispatch is fire-and-forget: the request is spawned as a detached tokio task
//! and the caller gets control back immediately. Neither a spawn failure nor a
//! failed delivery changes the outcome the controller already decided.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::task::TaskTracker;
use tracing::{error, info, warn};

use crate::collaborators::EscalationTask;
use crate::config::EscalationConfig;
use crate::models::{EscalationRecord, EscalationRequest, PlanParams};
use crate::slug::slugify_truncate;

pub struct EscalationDispatcher {
    task: Arc<dyn EscalationTask>,
    config: EscalationConfig,
    in_flight: TaskTracker,
}

impl EscalationDispatcher {
    pub fn new(task: Arc<dyn EscalationTask>, config: EscalationConfig) -> Self {
        Self {
            task,
            config,
            in_flight: TaskTracker::new(),
        }
    }

    /// Build the escalation payload for a run at `cycle`.
    pub fn build_request(&self, params: &PlanParams, reason: &str, cycle: u32) -> EscalationRequest {
        EscalationRequest {
            conversation_id: conversation_id(&params.instance_id, reason, cycle),
            message: escalation_message(params, reason, cycle),
            user_id: params.user_id.clone(),
            agent_id: self.config.agent_id.clone(),
            conversation_title: format!("{}: {}", self.config.title_prefix, params.activity),
            site_id: params.site_id.clone(),
            origin: self.config.origin.clone(),
        }
    }

    /// Spawn the escalation task without awaiting it.
    pub fn dispatch(&self, params: &PlanParams, reason: &str, cycle: u32) -> EscalationRecord {
        let request = self.build_request(params, reason, cycle);
        let conversation_id = request.conversation_id.clone();

        let spawned = match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let task = Arc::clone(&self.task);
                let id = conversation_id.clone();
                self.in_flight.spawn_on(
                    async move {
                        match task.escalate(request).await {
                            Ok(()) => info!("Escalation {} delivered", id),
                            Err(e) => warn!("Escalation {} failed: {}", id, e),
                        }
                    },
                    &handle,
                );
                info!("Escalation {} dispatched: {}", conversation_id, reason);
                true
            }
            Err(e) => {
                error!("Could not spawn escalation {}: {}", conversation_id, e);
                false
            }
        };

        EscalationRecord {
            cycle,
            conversation_id,
            reason: reason.to_string(),
            spawned,
        }
    }

    /// Give in-flight escalations up to `grace` to finish. Returns false if
    /// some were still running when the grace period ran out.
    pub async fn drain(&self, grace: Duration) -> bool {
        self.in_flight.close();
        let drained = tokio::time::timeout(grace, self.in_flight.wait())
            .await
            .is_ok();
        self.in_flight.reopen();
        if !drained {
            warn!(
                "{} escalation(s) still in flight after {:?}",
                self.in_flight.len(),
                grace
            );
        }
        drained
    }
}

/// `plan-<instance>-<reason-slug>-c<cycle>`
pub fn conversation_id(instance_id: &str, reason: &str, cycle: u32) -> String {
    let reason_slug = slugify_truncate(reason);
    let reason_slug = if reason_slug.is_empty() {
        "escalation".to_string()
    } else {
        reason_slug
    };
    format!("plan-{}-{}-c{}", instance_id, reason_slug, cycle)
}

fn escalation_message(params: &PlanParams, reason: &str, cycle: u32) -> String {
    format!(
        "The automation plan for activity \"{}\" needs human help.\n\
         Instance: {}\n\
         Site: {}\n\
         Plan: {}\n\
         Cycle: {}\n\
         Reason: {}",
        params.activity,
        params.instance_id,
        params.site_id,
        params.instance_plan_id.as_deref().unwrap_or("none"),
        cycle,
        reason
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CallError;
    use async_trait::async_trait;
    use tokio::sync::mpsc;

    struct ChannelTask {
        tx: mpsc::UnboundedSender<EscalationRequest>,
        fail: bool,
    }

    #[async_trait]
    impl EscalationTask for ChannelTask {
        async fn escalate(&self, request: EscalationRequest) -> Result<(), CallError> {
            let _ = self.tx.send(request);
            if self.fail {
                Err(CallError::Other("delivery refused".to_string()))
            } else {
                Ok(())
            }
        }
    }

    fn params() -> PlanParams {
        PlanParams::new("site-9", "lead outreach", "inst-42")
            .with_plan_id("plan-7")
            .with_user_id("user-3")
    }

    #[test]
    fn test_conversation_id_format() {
        assert_eq!(
            conversation_id("inst-42", "User attention timeout: fill form", 4),
            "plan-inst-42-user-attention-timeout-fill-c4"
        );
        assert_eq!(conversation_id("inst-42", "!!!", 1), "plan-inst-42-escalation-c1");
    }

    #[test]
    fn test_build_request_embeds_run_identifiers() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let dispatcher = EscalationDispatcher::new(
            Arc::new(ChannelTask { tx, fail: false }),
            EscalationConfig::default(),
        );

        let request = dispatcher.build_request(&params(), "captcha wall", 3);
        assert!(request.message.contains("inst-42"));
        assert!(request.message.contains("site-9"));
        assert!(request.message.contains("lead outreach"));
        assert!(request.message.contains("captcha wall"));
        assert_eq!(request.user_id.as_deref(), Some("user-3"));
        assert_eq!(request.site_id, "site-9");
        assert_eq!(request.origin, "whatsapp");
        assert_eq!(request.conversation_title, "Plan escalation: lead outreach");
    }

    #[tokio::test]
    async fn test_dispatch_is_detached_and_delivers() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let dispatcher = EscalationDispatcher::new(
            Arc::new(ChannelTask { tx, fail: false }),
            EscalationConfig::default(),
        );

        let record = dispatcher.dispatch(&params(), "captcha wall", 3);
        assert!(record.spawned);
        assert_eq!(record.cycle, 3);

        let delivered = tokio::time::timeout(std::time::Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(delivered.conversation_id, record.conversation_id);
    }

    #[tokio::test]
    async fn test_dispatch_failure_is_swallowed() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let dispatcher = EscalationDispatcher::new(
            Arc::new(ChannelTask { tx, fail: true }),
            EscalationConfig::default(),
        );

        let record = dispatcher.dispatch(&params(), "session timeout", 8);
        assert!(record.spawned);
        assert!(rx.recv().await.is_some());
    }

    #[test]
    fn test_dispatch_without_runtime_is_logged_not_raised() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let dispatcher = EscalationDispatcher::new(
            Arc::new(ChannelTask { tx, fail: false }),
            EscalationConfig::default(),
        );

        let record = dispatcher.dispatch(&params(), "captcha wall", 2);
        assert!(!record.spawned);
    }

    #[tokio::test]
    async fn test_drain_waits_for_in_flight_escalations() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let dispatcher = EscalationDispatcher::new(
            Arc::new(ChannelTask { tx, fail: false }),
            EscalationConfig::default(),
        );

        dispatcher.dispatch(&params(), "captcha wall", 5);
        assert!(dispatcher.drain(std::time::Duration::from_secs(5)).await);
        assert!(rx.try_recv().is_ok());
    }
}
