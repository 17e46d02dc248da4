//! HTTP implementation of the collaborator operations.
//!
//! This is the call harness: bounded attempts with exponential backoff live
//! here, so the controller never retries a call itself.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use super::{ActOperation, EscalationTask, ReplanOperation, SessionSaveOperation};
use crate::config::ApiConfig;
use crate::error::CallError;
use crate::models::{
    ActResult, EscalationRequest, PlanParams, ReplanRequest, ReplanResult, SessionSaveRequest,
    SessionSaveResult,
};

/// Bounded retry with exponential backoff.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts per call, including the first (at least 1)
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&ApiConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(config: &ApiConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.backoff_base_ms),
            max_delay: Duration::from_millis(config.backoff_max_ms),
        }
    }

    /// Delay before retry number `retry` (0-based): base * 2^retry, capped.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let multiplier = 2u32.saturating_pow(retry);
        self.base_delay
            .checked_mul(multiplier)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

/// Talks to the collaborator API over HTTP.
pub struct HttpCollaborators {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    retry: RetryPolicy,
}

impl HttpCollaborators {
    pub fn new(config: &ApiConfig) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.resolved_api_key(),
            retry: RetryPolicy::from_config(config),
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// One POST, no retries. Non-success statuses become `CallError::Status`.
    async fn send_once<B>(&self, url: &str, body: &B) -> Result<String, CallError>
    where
        B: Serialize + ?Sized + Sync,
    {
        let mut request = self.client.post(url).json(body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            return Err(CallError::Status {
                status: status.as_u16(),
                body: text,
            });
        }

        Ok(text)
    }

    /// POST with bounded retries; returns the raw response body.
    async fn post_with_retry<B>(&self, path: &str, body: &B) -> Result<String, CallError>
    where
        B: Serialize + ?Sized + Sync,
    {
        let url = self.endpoint(path);
        let mut attempt = 1;

        loop {
            match self.send_once(&url, body).await {
                Ok(text) => {
                    if attempt > 1 {
                        debug!("POST {} succeeded on attempt {}", url, attempt);
                    }
                    return Ok(text);
                }
                Err(error) if error.is_retryable() && attempt < self.retry.max_attempts => {
                    let delay = self.retry.delay_for(attempt - 1);
                    warn!(
                        "POST {} attempt {}/{} failed, retrying in {:?}: {}",
                        url, attempt, self.retry.max_attempts, delay, error
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(error) => return Err(error),
            }
        }
    }

    async fn post_json<B, R>(&self, path: &str, body: &B) -> Result<R, CallError>
    where
        B: Serialize + ?Sized + Sync,
        R: DeserializeOwned,
    {
        let text = self.post_with_retry(path, body).await?;
        serde_json::from_str(&text).map_err(|e| CallError::Decode(e.to_string()))
    }
}

#[async_trait]
impl ActOperation for HttpCollaborators {
    async fn act(&self, params: &PlanParams) -> Result<ActResult, CallError> {
        self.post_json("act", params).await
    }
}

#[async_trait]
impl ReplanOperation for HttpCollaborators {
    async fn replan(&self, request: &ReplanRequest) -> Result<ReplanResult, CallError> {
        self.post_json("replan", request).await
    }
}

#[async_trait]
impl SessionSaveOperation for HttpCollaborators {
    async fn save_session(
        &self,
        request: &SessionSaveRequest,
    ) -> Result<SessionSaveResult, CallError> {
        self.post_json("sessions/save", request).await
    }
}

#[async_trait]
impl EscalationTask for HttpCollaborators {
    async fn escalate(&self, request: EscalationRequest) -> Result<(), CallError> {
        // Body is not needed; any 2xx counts as delivered
        self.post_with_retry("escalations", &request).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_millis(3_000),
        };

        assert_eq!(policy.delay_for(0), Duration::from_millis(500));
        assert_eq!(policy.delay_for(1), Duration::from_millis(1_000));
        assert_eq!(policy.delay_for(2), Duration::from_millis(2_000));
        assert_eq!(policy.delay_for(3), Duration::from_millis(3_000));
        assert_eq!(policy.delay_for(40), Duration::from_millis(3_000));
    }

    #[test]
    fn test_policy_always_allows_one_attempt() {
        let config = ApiConfig {
            max_attempts: 0,
            ..Default::default()
        };
        assert_eq!(RetryPolicy::from_config(&config).max_attempts, 1);
    }

    #[test]
    fn test_endpoint_joins_paths() {
        let config = ApiConfig {
            base_url: "https://agents.example.com/api/".to_string(),
            ..Default::default()
        };
        let http = HttpCollaborators::new(&config).unwrap();
        assert_eq!(http.endpoint("act"), "https://agents.example.com/api/act");
        assert_eq!(
            http.endpoint("/sessions/save"),
            "https://agents.example.com/api/sessions/save"
        );
    }
}
