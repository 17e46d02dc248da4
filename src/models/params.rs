use serde::{Deserialize, Serialize};

/// Identifies one plan run against a remote instance.
///
/// Only `instance_plan_id` changes during a run: it is replaced whenever the
/// remote side creates or re-creates the plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanParams {
    pub site_id: String,
    pub activity: String,
    pub instance_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_plan_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

impl PlanParams {
    pub fn new(
        site_id: impl Into<String>,
        activity: impl Into<String>,
        instance_id: impl Into<String>,
    ) -> Self {
        Self {
            site_id: site_id.into(),
            activity: activity.into(),
            instance_id: instance_id.into(),
            instance_plan_id: None,
            user_id: None,
        }
    }

    pub fn with_plan_id(mut self, plan_id: impl Into<String>) -> Self {
        self.instance_plan_id = Some(plan_id.into());
        self
    }

    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Whether a checkpoint written for `other` belongs to the same run target.
    pub fn same_target(&self, other: &PlanParams) -> bool {
        self.site_id == other.site_id
            && self.activity == other.activity
            && self.instance_id == other.instance_id
    }
}
