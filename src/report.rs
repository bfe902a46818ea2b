//! Compile report
//!
//! Every compiled test case leaves one JSON-lines record in
//! `<output>/report.jsonl`, so a batch run can be audited after the fact
//! without scraping log output.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

/// File name of the report inside the output directory
pub const REPORT_FILE: &str = "report.jsonl";

/// Types of reported events
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    CompileSucceeded,
    CompileFailed,
}

/// A single report entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportEvent {
    /// When the event occurred (UTC)
    pub timestamp: chrono::DateTime<chrono::Utc>,

    pub event_type: EventType,

    pub testcase: String,

    /// Counts for successes, error kind for failures
    pub details: serde_json::Value,

    /// Error message if compilation failed
    pub error: Option<String>,
}

impl ReportEvent {
    pub fn new(
        event_type: EventType,
        testcase: impl Into<String>,
        details: serde_json::Value,
        error: Option<String>,
    ) -> Self {
        Self {
            timestamp: chrono::Utc::now(),
            event_type,
            testcase: testcase.into(),
            details,
            error,
        }
    }
}

/// Report writer
#[derive(Debug, Clone)]
pub struct CompileReport {
    path: PathBuf,
}

impl CompileReport {
    pub fn new(output_dir: &Path) -> Self {
        Self {
            path: output_dir.join(REPORT_FILE),
        }
    }

    /// Appends an event as one JSON line
    ///
    /// # Errors
    ///
    /// Returns `Err` if the file cannot be opened or written
    pub async fn log(&self, event: &ReportEvent) -> std::io::Result<()> {
        let mut line = serde_json::to_string(event)?;
        line.push('\n');

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;

        // One write per line keeps concurrent appends from interleaving
        file.write_all(line.as_bytes()).await?;
        file.sync_all().await?;

        Ok(())
    }

    /// Reads the most recent events, newest first
    ///
    /// # Errors
    ///
    /// Returns `Err` if the file cannot be read
    pub async fn read_recent(&self, count: usize) -> std::io::Result<Vec<ReportEvent>> {
        let content = tokio::fs::read_to_string(&self.path).await?;

        let events: Vec<ReportEvent> = content
            .lines()
            .rev()
            .take(count)
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect();

        Ok(events)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn log_or_warn(&self, event: ReportEvent) {
        if let Err(e) = self.log(&event).await {
            tracing::warn!("Failed to write compile report: {}", e);
        }
    }
}

/// Records a successful compilation
pub async fn log_success(
    report: &CompileReport,
    testcase: &str,
    routers: usize,
    flows: usize,
    rules: usize,
) {
    report
        .log_or_warn(ReportEvent::new(
            EventType::CompileSucceeded,
            testcase,
            serde_json::json!({
                "routers": routers,
                "flows": flows,
                "rules": rules,
            }),
            None,
        ))
        .await;
}

/// Records a failed compilation
pub async fn log_failure(report: &CompileReport, testcase: &str, error: &crate::Error) {
    report
        .log_or_warn(ReportEvent::new(
            EventType::CompileFailed,
            testcase,
            serde_json::json!({ "kind": error.kind() }),
            Some(error.to_string()),
        ))
        .await;
}
