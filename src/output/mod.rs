pub mod files;

pub use files::*;

use std::path::PathBuf;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::FinalReport;

/// Trait for persisting final run reports
#[async_trait]
pub trait ReportWriter: Send + Sync {
    /// Write the report and return where it landed
    async fn write_report(&self, report: &FinalReport) -> Result<PathBuf>;
}
