//! Durable timers.
//!
//! The controller never sleeps in memory. Every suspension goes through a
//! [`DurableTimer`] keyed by the logical point it belongs to, so a restarted
//! process that asks for the same key only waits for what is left.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::debug;

use crate::slug::file_slug;

#[async_trait]
pub trait DurableTimer: Send + Sync {
    /// Suspend until the deadline for `key` has passed. The deadline is
    /// `now + duration` unless one was already recorded for `key`.
    async fn sleep(&self, key: &str, duration: Duration) -> Result<()>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct TimerRecord {
    key: String,
    /// RFC 3339
    wake_at: String,
}

/// Timer whose deadlines live in JSON files under one directory.
pub struct FileTimer {
    dir: PathBuf,
}

impl FileTimer {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn record_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", file_slug(key)))
    }

    /// Deadline recorded for `key`, if any.
    pub async fn pending_deadline(&self, key: &str) -> Result<Option<DateTime<Utc>>> {
        let path = self.record_path(key);
        if !fs::try_exists(&path).await.unwrap_or(false) {
            return Ok(None);
        }

        let json = fs::read_to_string(&path)
            .await
            .context("Failed to read timer record")?;
        let record: TimerRecord =
            serde_json::from_str(&json).context("Failed to parse timer record")?;
        let wake_at = DateTime::parse_from_rfc3339(&record.wake_at)
            .context("Invalid timer deadline")?
            .with_timezone(&Utc);

        Ok(Some(wake_at))
    }

    async fn record_deadline(&self, key: &str, wake_at: DateTime<Utc>) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .await
            .context("Failed to create timer directory")?;

        let record = TimerRecord {
            key: key.to_string(),
            wake_at: wake_at.to_rfc3339(),
        };
        let json = serde_json::to_string_pretty(&record).context("Failed to serialize timer")?;

        let path = self.record_path(key);
        let temp = path.with_extension("json.tmp");
        fs::write(&temp, json)
            .await
            .context("Failed to write temp timer file")?;
        fs::rename(&temp, &path)
            .await
            .context("Failed to rename timer file")?;
        Ok(())
    }

    async fn clear(&self, key: &str) -> Result<()> {
        match fs::remove_file(self.record_path(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).context("Failed to remove timer file"),
        }
    }
}

#[async_trait]
impl DurableTimer for FileTimer {
    async fn sleep(&self, key: &str, duration: Duration) -> Result<()> {
        let wake_at = match self.pending_deadline(key).await? {
            Some(existing) => {
                debug!("Timer {} resumed, deadline {}", key, existing);
                existing
            }
            None => {
                let wake_at = Utc::now()
                    + chrono::Duration::from_std(duration).context("Timer duration too large")?;
                self.record_deadline(key, wake_at).await?;
                wake_at
            }
        };

        let remaining = (wake_at - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        if !remaining.is_zero() {
            tokio::time::sleep(remaining).await;
        }

        self.clear(key).await
    }
}
