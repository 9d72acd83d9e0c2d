//! RunHistory - persistent record of reconciliation runs
//!
//! Features:
//! - One record per deployment attempt, appended after every run
//! - Per-branch statistics (attempts, successes, last published release)
//! - JSON storage written atomically through a temp file and rename

use crate::core::error::MirrorError;
use crate::orchestration::branch_orchestrator::RunReport;
use crate::pipeline::DeploymentOutcome;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

const HISTORY_VERSION: &str = "1.0";

/// One deployment attempt or branch-level failure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HistoryRecord {
    pub run_id: String,
    pub branch: String,
    /// Empty for branch-level failures
    pub release: String,
    pub outcome: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: i64,
    pub timestamp: DateTime<Utc>,
}

/// Per-branch statistics
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BranchStatistics {
    pub branch: String,
    pub attempts: usize,
    pub successes: usize,
    pub failures: usize,
    pub success_rate: f64,
    pub average_duration_ms: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_published: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_published_at: Option<DateTime<Utc>>,
}

/// Overall statistics
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HistoryStatistics {
    pub runs: usize,
    pub total_attempts: usize,
    pub success_count: usize,
    pub failure_count: usize,
    pub by_branch: BTreeMap<String, BranchStatistics>,
}

/// Data file structure
#[derive(Debug, Serialize, Deserialize)]
struct HistoryDataFile {
    version: String,
    records: Vec<HistoryRecord>,
    last_updated: String,
}

/// RunHistory - append-only run log with statistics
pub struct RunHistory {
    records: Vec<HistoryRecord>,
    data_file_path: PathBuf,
}

impl RunHistory {
    /// Load the history at `path`; a missing file is an empty history
    pub async fn load<P: Into<PathBuf>>(path: P) -> Result<Self, MirrorError> {
        let data_file_path = path.into();

        let records = match fs::read_to_string(&data_file_path).await {
            Ok(data) => {
                let parsed: HistoryDataFile = serde_json::from_str(&data).map_err(|e| {
                    MirrorError::HistoryCorrupted(format!("{}: {}", data_file_path.display(), e))
                })?;
                parsed.records
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };

        Ok(Self {
            records,
            data_file_path,
        })
    }

    pub fn records(&self) -> &[HistoryRecord] {
        &self.records
    }

    pub fn path(&self) -> &Path {
        &self.data_file_path
    }

    /// Append the run's outcomes and persist
    pub async fn record_run(&mut self, report: &RunReport) -> Result<(), MirrorError> {
        let records = Self::records_for(report);
        if records.is_empty() {
            debug!(run_id = %report.run_id, "nothing to record");
            return Ok(());
        }
        self.records.extend(records);
        self.save().await
    }

    fn records_for(report: &RunReport) -> Vec<HistoryRecord> {
        let mut records = Vec::new();

        for branch in &report.branches {
            if let Some(error) = &branch.error {
                records.push(HistoryRecord {
                    run_id: report.run_id.clone(),
                    branch: branch.branch.clone(),
                    release: String::new(),
                    outcome: "branch-failed".to_string(),
                    success: false,
                    error: Some(error.clone()),
                    duration_ms: 0,
                    timestamp: report.finished_at,
                });
                continue;
            }

            for deployment in &branch.deployments {
                if matches!(
                    deployment.outcome,
                    DeploymentOutcome::Skipped | DeploymentOutcome::DryRun
                ) {
                    continue;
                }
                records.push(HistoryRecord {
                    run_id: report.run_id.clone(),
                    branch: deployment.branch.clone(),
                    release: deployment.release.clone(),
                    outcome: format!("{:?}", deployment.outcome).to_lowercase(),
                    success: deployment.outcome == DeploymentOutcome::Published,
                    error: deployment.error.clone(),
                    duration_ms: deployment.duration_ms,
                    timestamp: deployment.started_at,
                });
            }
        }

        records
    }

    /// Statistics over every stored record
    pub fn statistics(&self) -> HistoryStatistics {
        let success_count = self.records.iter().filter(|r| r.success).count();
        let runs = self
            .records
            .iter()
            .map(|r| r.run_id.as_str())
            .collect::<std::collections::BTreeSet<_>>()
            .len();

        let mut grouped: BTreeMap<&str, Vec<&HistoryRecord>> = BTreeMap::new();
        for record in &self.records {
            grouped.entry(record.branch.as_str()).or_default().push(record);
        }

        let by_branch = grouped
            .into_iter()
            .map(|(branch, records)| {
                let attempts = records.len();
                let successes = records.iter().filter(|r| r.success).count();
                let total_duration: i64 = records.iter().map(|r| r.duration_ms).sum();
                let last = records
                    .iter()
                    .filter(|r| r.success)
                    .max_by_key(|r| r.timestamp);

                let stats = BranchStatistics {
                    branch: branch.to_string(),
                    attempts,
                    successes,
                    failures: attempts - successes,
                    success_rate: (successes as f64 / attempts as f64) * 100.0,
                    average_duration_ms: total_duration as f64 / attempts as f64,
                    last_published: last.map(|r| r.release.clone()),
                    last_published_at: last.map(|r| r.timestamp),
                };
                (branch.to_string(), stats)
            })
            .collect();

        HistoryStatistics {
            runs,
            total_attempts: self.records.len(),
            success_count,
            failure_count: self.records.len() - success_count,
            by_branch,
        }
    }

    /// Markdown summary for the `stats` command
    pub fn render_markdown(&self) -> String {
        let statistics = self.statistics();
        let mut lines = Vec::new();

        lines.push("# Release Mirror History\n".to_string());
        lines.push(format!("- **Runs**: {}", statistics.runs));
        lines.push(format!("- **Attempts**: {}", statistics.total_attempts));
        lines.push(format!("- **Published**: {}", statistics.success_count));
        lines.push(format!("- **Failed**: {}\n", statistics.failure_count));

        if !statistics.by_branch.is_empty() {
            lines.push("| Branch | Attempts | Published | Failed | Success Rate | Last Published |".to_string());
            lines.push("|--------|----------|-----------|--------|--------------|----------------|".to_string());
            for stats in statistics.by_branch.values() {
                lines.push(format!(
                    "| {} | {} | {} | {} | {:.1}% | {} |",
                    stats.branch,
                    stats.attempts,
                    stats.successes,
                    stats.failures,
                    stats.success_rate,
                    stats.last_published.as_deref().unwrap_or("-")
                ));
            }
            lines.push(String::new());
        }

        lines.join("\n")
    }

    async fn save(&self) -> Result<(), MirrorError> {
        if let Some(dir) = self.data_file_path.parent()
            && !dir.as_os_str().is_empty()
        {
            fs::create_dir_all(dir).await?;
        }

        let data = HistoryDataFile {
            version: HISTORY_VERSION.to_string(),
            records: self.records.clone(),
            last_updated: Utc::now().to_rfc3339(),
        };
        let json = serde_json::to_string_pretty(&data)
            .map_err(|e| MirrorError::HistoryCorrupted(e.to_string()))?;

        let temp_path = self.data_file_path.with_extension("json.tmp");
        fs::write(&temp_path, json).await?;
        fs::rename(&temp_path, &self.data_file_path).await?;

        debug!(path = %self.data_file_path.display(), records = self.records.len(), "history saved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::BranchTarget;
    use crate::core::traits::ReleaseInfo;
    use crate::orchestration::branch_orchestrator::BranchReport;
    use crate::pipeline::DeploymentReport;
    use tempfile::TempDir;

    fn deployment(branch: &str, release: &str, outcome: DeploymentOutcome) -> DeploymentReport {
        let mut report = DeploymentReport::skipped(
            &BranchTarget::new(branch, "3."),
            &ReleaseInfo::new(release),
            "",
        );
        report.outcome = outcome;
        report.error = None;
        report.duration_ms = 100;
        report
    }

    fn run_report(run_id: &str, branches: Vec<BranchReport>) -> RunReport {
        RunReport {
            run_id: run_id.to_string(),
            started_at: Utc::now(),
            finished_at: Utc::now(),
            duration_ms: 0,
            dry_run: false,
            branches,
        }
    }

    fn branch_report(branch: &str, deployments: Vec<DeploymentReport>) -> BranchReport {
        BranchReport {
            branch: branch.to_string(),
            name_prefix: "3.".to_string(),
            latest_mirrored: None,
            basis: None,
            backlog: Vec::new(),
            deployments,
            error: None,
            error_code: None,
            halted: false,
        }
    }

    #[tokio::test]
    async fn test_record_and_reload() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("state/history.json");

        let mut history = RunHistory::load(&path).await.unwrap();
        assert!(history.records().is_empty());

        let report = run_report(
            "run-1",
            vec![branch_report(
                "master",
                vec![
                    deployment("master", "3.1.0", DeploymentOutcome::Published),
                    deployment("master", "3.2.0", DeploymentOutcome::Failed),
                    deployment("master", "3.3.0", DeploymentOutcome::Skipped),
                ],
            )],
        );
        history.record_run(&report).await.unwrap();

        let reloaded = RunHistory::load(&path).await.unwrap();
        assert_eq!(reloaded.records().len(), 2);
        assert!(!temp.path().join("state/history.json.tmp").exists());

        let stats = reloaded.statistics();
        assert_eq!(stats.runs, 1);
        assert_eq!(stats.success_count, 1);
        assert_eq!(stats.failure_count, 1);
        let master = &stats.by_branch["master"];
        assert_eq!(master.last_published.as_deref(), Some("3.1.0"));
        assert_eq!(master.success_rate, 50.0);
    }

    #[tokio::test]
    async fn test_branch_failure_is_recorded() {
        let temp = TempDir::new().unwrap();
        let mut history = RunHistory::load(temp.path().join("history.json")).await.unwrap();

        let mut failed = branch_report("ghost-2.x", Vec::new());
        failed.error = Some("release feed returned HTTP 502".to_string());
        history
            .record_run(&run_report("run-2", vec![failed]))
            .await
            .unwrap();

        let stats = history.statistics();
        assert_eq!(stats.by_branch["ghost-2.x"].failures, 1);
        assert!(stats.by_branch["ghost-2.x"].last_published.is_none());
        assert!(history.render_markdown().contains("| ghost-2.x | 1 | 0 | 1 |"));
    }

    #[tokio::test]
    async fn test_corrupted_history() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("history.json");
        std::fs::write(&path, "not json").unwrap();

        assert!(matches!(
            RunHistory::load(&path).await,
            Err(MirrorError::HistoryCorrupted(_))
        ));
    }
}
