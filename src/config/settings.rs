use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Environment variable consulted when `api.api_key` is not set
pub const API_KEY_ENV: &str = "PLAN_PILOT_API_KEY";

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PilotConfig {
    pub loop_config: LoopConfig,
    pub escalation: EscalationConfig,
    pub api: ApiConfig,
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopConfig {
    /// Pause between cycles
    pub inter_cycle_delay_secs: u64,
    /// Wait applied to session, authentication and attention events
    pub attention_wait_secs: u64,
    /// Safety cap on the number of act calls per run
    pub max_cycles: u32,
    /// Extra attempts allowed for non-authentication attention events
    pub attention_retry_limit: u32,
    /// Number of recent cycle entries passed to the replan operation
    pub replan_context_cycles: usize,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            inter_cycle_delay_secs: 3,
            attention_wait_secs: 300,
            max_cycles: 100,
            attention_retry_limit: 1,
            replan_context_cycles: 3,
        }
    }
}

impl LoopConfig {
    pub fn inter_cycle_delay(&self) -> Duration {
        Duration::from_secs(self.inter_cycle_delay_secs)
    }

    pub fn attention_wait(&self) -> Duration {
        Duration::from_secs(self.attention_wait_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EscalationConfig {
    /// Agent that picks up escalated conversations
    pub agent_id: String,
    /// Fixed delivery channel for escalations
    pub origin: String,
    /// Prefix for the conversation title
    pub title_prefix: String,
}

impl Default for EscalationConfig {
    fn default() -> Self {
        Self {
            agent_id: "default-agent".to_string(),
            origin: "whatsapp".to_string(),
            title_prefix: "Plan escalation".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Base URL of the collaborator API (act, replan, sessions, escalations)
    pub base_url: String,
    /// Bearer token; falls back to $PLAN_PILOT_API_KEY
    pub api_key: Option<String>,
    /// Per-request timeout
    pub timeout_secs: u64,
    /// Attempts per call, including the first
    pub max_attempts: u32,
    /// First retry delay, doubled on every further attempt
    pub backoff_base_ms: u64,
    /// Upper bound for a single retry delay
    pub backoff_max_ms: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3000/api/agents".to_string(),
            api_key: None,
            timeout_secs: 120,
            max_attempts: 3,
            backoff_base_ms: 500,
            backoff_max_ms: 8_000,
        }
    }
}

impl ApiConfig {
    /// Configured key, or the environment fallback.
    pub fn resolved_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .or_else(|| std::env::var(API_KEY_ENV).ok())
            .filter(|k| !k.trim().is_empty())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root for checkpoints, durable timers and reports.
    /// Defaults to the platform data dir, e.g. ~/.local/share/plan-pilot
    pub state_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            state_dir: dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("plan-pilot"),
        }
    }
}

impl StorageConfig {
    pub fn runs_dir(&self) -> PathBuf {
        self.state_dir.join("runs")
    }

    pub fn timers_dir(&self) -> PathBuf {
        self.state_dir.join("timers")
    }

    pub fn reports_dir(&self) -> PathBuf {
        self.state_dir.join("reports")
    }
}

impl PilotConfig {
    /// Load configuration from a YAML file
    pub fn from_file(path: &PathBuf) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: PilotConfig = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Load configuration, falling back to defaults if file doesn't exist
    pub fn load_or_default(path: Option<&PathBuf>) -> anyhow::Result<Self> {
        match path {
            Some(p) if p.exists() => Self::from_file(p),
            _ => Ok(Self::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults_match_loop_contract() {
        let config = PilotConfig::default();
        assert_eq!(config.loop_config.inter_cycle_delay(), Duration::from_secs(3));
        assert_eq!(config.loop_config.attention_wait(), Duration::from_secs(300));
        assert_eq!(config.loop_config.max_cycles, 100);
        assert_eq!(config.loop_config.attention_retry_limit, 1);
        assert_eq!(config.loop_config.replan_context_cycles, 3);
        assert_eq!(config.escalation.origin, "whatsapp");
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("pilot.yaml");
        std::fs::write(
            &path,
            "loop_config:\n  max_cycles: 20\napi:\n  base_url: https://agents.example.com\n",
        )
        .unwrap();

        let config = PilotConfig::load_or_default(Some(&path)).unwrap();
        assert_eq!(config.loop_config.max_cycles, 20);
        assert_eq!(config.loop_config.attention_wait_secs, 300);
        assert_eq!(config.api.base_url, "https://agents.example.com");
        assert_eq!(config.api.max_attempts, 3);
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let path = PathBuf::from("/definitely/not/here/pilot.yaml");
        let config = PilotConfig::load_or_default(Some(&path)).unwrap();
        assert_eq!(config.loop_config.max_cycles, 100);
    }
}
