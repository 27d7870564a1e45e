//! Run summary reporting
//!
//! A completed run always reports, per stage, how many items succeeded,
//! were skipped and failed, together with the identifiers of the failed
//! items so they can be retried out-of-band.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use tracing::{info, warn};
use uuid::Uuid;

use crate::runner::BatchResult;

/// Counts for one stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageSummary {
    pub stage: String,
    pub total: usize,
    pub succeeded: usize,
    pub skipped: usize,
    pub failed: usize,
    pub not_started: usize,
}

/// One failed item, with enough detail to retry it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedItem {
    pub stage: String,
    pub item: String,
    pub error: String,
}

/// Outcome of a whole pipeline run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub listed: usize,
    pub stages: Vec<StageSummary>,
    pub failures: Vec<FailedItem>,
    /// Key read back from the store after persistence, if it was found
    pub verified: Option<String>,
    pub cancelled: bool,
}

impl RunSummary {
    pub fn start() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            finished_at: None,
            listed: 0,
            stages: Vec::new(),
            failures: Vec::new(),
            verified: None,
            cancelled: false,
        }
    }

    /// Fold a stage result into the summary.
    pub fn record<O, E: fmt::Display>(&mut self, result: &BatchResult<O, E>) {
        self.failures
            .extend(result.failures.iter().map(|failure| FailedItem {
                stage: result.stage.clone(),
                item: failure.item.clone(),
                error: failure.error.to_string(),
            }));
        if !result.is_complete() {
            self.cancelled = true;
        }
        self.stages.push(result.summary());
    }

    pub fn finish(mut self) -> Self {
        self.finished_at = Some(Utc::now());
        self
    }

    pub fn stage(&self, name: &str) -> Option<&StageSummary> {
        self.stages.iter().find(|s| s.stage == name)
    }

    pub fn failures_for<'a>(&'a self, stage: &'a str) -> impl Iterator<Item = &'a FailedItem> {
        self.failures.iter().filter(move |f| f.stage == stage)
    }

    pub fn total_failed(&self) -> usize {
        self.failures.len()
    }

    /// Emit the summary through `tracing`.
    pub fn log(&self) {
        for stage in &self.stages {
            info!(
                run_id = %self.run_id,
                stage = %stage.stage,
                total = stage.total,
                succeeded = stage.succeeded,
                skipped = stage.skipped,
                failed = stage.failed,
                not_started = stage.not_started,
                "Stage summary"
            );
        }
        for failure in &self.failures {
            warn!(
                run_id = %self.run_id,
                stage = %failure.stage,
                item = %failure.item,
                error = %failure.error,
                "Failed item"
            );
        }
        info!(
            run_id = %self.run_id,
            listed = self.listed,
            failed = self.failures.len(),
            verified = self.verified.as_deref().unwrap_or("-"),
            cancelled = self.cancelled,
            "Run finished"
        );
    }

    pub fn write_json(&self, path: &Path) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        info!("Run summary saved to {}", path.display());
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::runner::{BatchRunner, RunnerConfig};

    #[tokio::test]
    async fn test_record_collects_counts_and_failures() {
        let runner = BatchRunner::new("download", RunnerConfig::default()).unwrap();
        let result = runner
            .run(vec!["a.jpg", "bad.jpg"], |item: &str| async move {
                if item.starts_with("bad") {
                    Err("404 Not Found")
                } else {
                    Ok(item)
                }
            })
            .await;

        let mut summary = RunSummary::start();
        summary.record(&result);

        let stage = summary.stage("download").unwrap();
        assert_eq!((stage.succeeded, stage.failed), (1, 1));
        assert_eq!(
            summary.failures_for("download").collect::<Vec<_>>(),
            vec![&FailedItem {
                stage: "download".into(),
                item: "bad.jpg".into(),
                error: "404 Not Found".into(),
            }]
        );
        assert!(!summary.cancelled);
    }

    #[test]
    fn test_write_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("summary.json");

        let summary = RunSummary::start().finish();
        summary.write_json(&path).unwrap();

        let value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["run_id"], summary.run_id.to_string());
        assert!(value["finished_at"].is_string());
        assert_eq!(value["cancelled"], false);
    }
}
