use std::path::PathBuf;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::fs;
use tracing::info;

use crate::models::FinalReport;
use crate::slug::file_slug;

use super::ReportWriter;

/// Writes each report as pretty JSON under one reports directory
pub struct FileReportWriter {
    reports_dir: PathBuf,
}

impl FileReportWriter {
    pub fn new(reports_dir: impl Into<PathBuf>) -> Self {
        Self {
            reports_dir: reports_dir.into(),
        }
    }

    async fn ensure_reports_dir(&self) -> Result<()> {
        fs::create_dir_all(&self.reports_dir)
            .await
            .context("Failed to create reports directory")
    }

    fn report_path(&self, report: &FinalReport) -> PathBuf {
        let stamp = chrono::Utc::now().format("%Y%m%dT%H%M%S%3fZ");
        self.reports_dir
            .join(format!("{}-{}.json", file_slug(&report.instance_id), stamp))
    }
}

#[async_trait]
impl ReportWriter for FileReportWriter {
    async fn write_report(&self, report: &FinalReport) -> Result<PathBuf> {
        self.ensure_reports_dir().await?;

        let path = self.report_path(report);
        let json = serde_json::to_string_pretty(report)?;
        fs::write(&path, json)
            .await
            .context("Failed to write report")?;

        info!("Wrote report to {:?}", path);
        Ok(path)
    }
}

/// Human-readable summary of a report, printed by the CLI.
pub fn render_summary(report: &FinalReport) -> String {
    let mut out = String::new();

    let status = if report.success { "SUCCESS" } else { "FAILED" };
    out.push_str(&format!("Plan run for {}: {}\n", report.instance_id, status));
    if let Some(plan_id) = &report.instance_plan_id {
        out.push_str(&format!("  Plan:        {}\n", plan_id));
    }
    out.push_str(&format!("  Cycles:      {}\n", report.total_cycles));
    out.push_str(&format!(
        "  Progress:    {}/{} steps ({:.0}%)\n",
        report.final_progress.completed_steps,
        report.final_progress.total_steps,
        report.final_progress.percentage
    ));
    out.push_str(&format!(
        "  Exec time:   {:.1}s\n",
        report.total_execution_time_ms as f64 / 1000.0
    ));
    out.push_str(&format!(
        "  Tokens:      {} ({} in / {} out)\n",
        report.total_token_usage.total(),
        report.total_token_usage.input,
        report.total_token_usage.output
    ));

    if let Some(error) = &report.error {
        match report.failure_kind {
            Some(kind) => out.push_str(&format!("  Error:       [{}] {}\n", kind, error)),
            None => out.push_str(&format!("  Error:       {}\n", error)),
        }
    }

    for escalation in &report.escalations {
        out.push_str(&format!(
            "  Escalated:   cycle {} -> {}\n",
            escalation.cycle, escalation.conversation_id
        ));
    }

    out
}
