//! Branch Orchestrator - runs every configured release stream
//!
//! Features:
//! - Concurrent branch flows bounded by `max_concurrency`, or sequential
//! - Deployments within one branch are strictly ordered
//! - A feed failure aborts only its own branch
//! - A rejected push halts the branch; remaining releases are skipped

use crate::core::config::{BranchTarget, MirrorConfig};
use crate::core::error::FeedError;
use crate::core::traits::{ReleaseFeed, ReleaseInfo, RepoIdentity};
use crate::pipeline::{DeploymentOutcome, DeploymentPipeline, DeploymentReport};
use crate::reconcile::{Backlog, BacklogBasis, compute_backlog};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

/// Orchestration options
#[derive(Debug, Clone)]
pub struct OrchestratorOptions {
    /// Process branches one after another (default: concurrently)
    pub sequential: bool,

    /// Maximum concurrent branch flows (default: 2)
    pub max_concurrency: usize,
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        Self {
            sequential: false,
            max_concurrency: crate::core::config::DEFAULT_MAX_CONCURRENCY,
        }
    }
}

/// Outcome of one branch flow
#[derive(Debug, Clone, Serialize)]
pub struct BranchReport {
    pub branch: String,
    pub name_prefix: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latest_mirrored: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub basis: Option<BacklogBasis>,
    pub backlog: Vec<String>,
    pub deployments: Vec<DeploymentReport>,
    /// Set when the branch flow itself failed (feed errors, task panics)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    /// Set when a rejected push stopped the backlog early
    pub halted: bool,
}

impl BranchReport {
    fn new(target: &BranchTarget) -> Self {
        Self {
            branch: target.branch.clone(),
            name_prefix: target.name_prefix.clone(),
            latest_mirrored: None,
            basis: None,
            backlog: Vec::new(),
            deployments: Vec::new(),
            error: None,
            error_code: None,
            halted: false,
        }
    }

    fn count(&self, outcome: DeploymentOutcome) -> usize {
        self.deployments
            .iter()
            .filter(|d| d.outcome == outcome)
            .count()
    }

    pub fn published(&self) -> usize {
        self.count(DeploymentOutcome::Published)
    }

    pub fn failed(&self) -> usize {
        self.count(DeploymentOutcome::Failed)
    }

    pub fn skipped(&self) -> usize {
        self.count(DeploymentOutcome::Skipped)
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none() && self.deployments.iter().all(DeploymentReport::is_success)
    }
}

/// Outcome of one full reconciliation pass
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: i64,
    pub dry_run: bool,
    pub branches: Vec<BranchReport>,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        self.branches.iter().all(BranchReport::is_success)
    }

    pub fn published(&self) -> usize {
        self.branches.iter().map(BranchReport::published).sum()
    }

    pub fn failed(&self) -> usize {
        self.branches.iter().map(BranchReport::failed).sum()
    }
}

/// Backlog preview for one branch
#[derive(Debug, Clone, Serialize)]
pub struct BranchPlan {
    pub branch: String,
    pub name_prefix: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latest_mirrored: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backlog: Option<Backlog>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Shared, immutable collaborators of a branch flow
#[derive(Clone)]
struct BranchFlow {
    upstream: RepoIdentity,
    downstream: RepoIdentity,
    feed: Arc<dyn ReleaseFeed>,
    pipeline: Arc<DeploymentPipeline>,
}

impl BranchFlow {
    /// Ledger marker and upstream list, fetched concurrently
    async fn fetch(
        &self,
        target: &BranchTarget,
    ) -> Result<(Option<ReleaseInfo>, Vec<ReleaseInfo>), FeedError> {
        tokio::try_join!(
            self.feed
                .fetch_latest_mirrored(&self.downstream, &target.name_prefix),
            self.feed.fetch_releases(&self.upstream, &target.name_prefix),
        )
    }

    async fn execute(self, target: BranchTarget) -> BranchReport {
        let mut report = BranchReport::new(&target);

        let (latest, all_upstream) = match self.fetch(&target).await {
            Ok(fetched) => fetched,
            Err(e) => {
                error!(
                    branch = %target.branch,
                    code = e.code(),
                    recoverable = e.is_recoverable(),
                    error = %e,
                    "release feed failed, skipping branch"
                );
                report.error = Some(e.to_string());
                report.error_code = Some(e.code().to_string());
                return report;
            }
        };

        info!(
            branch = %target.branch,
            latest = latest.as_ref().map(|r| r.name.as_str()).unwrap_or("none"),
            "latest processed {}x release",
            target.name_prefix
        );

        let backlog = compute_backlog(latest.as_ref(), &all_upstream);
        report.latest_mirrored = latest.map(|r| r.name);
        report.basis = Some(backlog.basis);
        report.backlog = backlog.names().into_iter().map(String::from).collect();

        let mut entries = backlog.entries.into_iter();
        for release in entries.by_ref() {
            let deployment = self.pipeline.deploy(&target, &release).await;
            let halts = deployment.halts_branch;
            report.deployments.push(deployment);

            if halts {
                warn!(
                    branch = %target.branch,
                    release = %release.name,
                    "push rejected by remote, halting branch until the next run"
                );
                report.halted = true;
                break;
            }
        }

        for release in entries {
            report.deployments.push(DeploymentReport::skipped(
                &target,
                &release,
                "branch halted after a rejected push",
            ));
        }

        report
    }

    async fn plan(&self, target: &BranchTarget) -> BranchPlan {
        let mut plan = BranchPlan {
            branch: target.branch.clone(),
            name_prefix: target.name_prefix.clone(),
            latest_mirrored: None,
            backlog: None,
            error: None,
        };

        match self.fetch(target).await {
            Ok((latest, all_upstream)) => {
                plan.backlog = Some(compute_backlog(latest.as_ref(), &all_upstream));
                plan.latest_mirrored = latest.map(|r| r.name);
            }
            Err(e) => {
                warn!(branch = %target.branch, code = e.code(), error = %e, "release feed failed");
                plan.error = Some(e.to_string());
            }
        }

        plan
    }
}

/// BranchOrchestrator - drives feed reads, reconciliation and deployments
pub struct BranchOrchestrator {
    flow: BranchFlow,
    branches: Vec<BranchTarget>,
    options: OrchestratorOptions,
}

impl BranchOrchestrator {
    pub fn new(
        upstream: RepoIdentity,
        downstream: RepoIdentity,
        branches: Vec<BranchTarget>,
        feed: Arc<dyn ReleaseFeed>,
        pipeline: Arc<DeploymentPipeline>,
        options: OrchestratorOptions,
    ) -> Self {
        Self {
            flow: BranchFlow {
                upstream,
                downstream,
                feed,
                pipeline,
            },
            branches,
            options,
        }
    }

    pub fn from_config(
        config: &MirrorConfig,
        feed: Arc<dyn ReleaseFeed>,
        pipeline: Arc<DeploymentPipeline>,
    ) -> Self {
        Self::new(
            config.upstream.clone(),
            config.repository.clone(),
            config.branches.clone(),
            feed,
            pipeline,
            OrchestratorOptions {
                sequential: config.sequential,
                max_concurrency: config.max_concurrency,
            },
        )
    }

    /// Reconcile and deploy every branch
    pub async fn run(&self) -> RunReport {
        let started_at = Utc::now();
        let run_id = uuid::Uuid::new_v4().to_string();

        info!(
            run_id = %run_id,
            branches = self.branches.len(),
            mode = if self.options.sequential { "sequential" } else { "concurrent" },
            dry_run = self.flow.pipeline.is_dry_run(),
            "starting reconciliation run"
        );

        let branches = if self.options.sequential {
            self.run_sequentially().await
        } else {
            self.run_concurrently().await
        };

        let finished_at = Utc::now();
        let report = RunReport {
            run_id,
            started_at,
            finished_at,
            duration_ms: (finished_at - started_at).num_milliseconds(),
            dry_run: self.flow.pipeline.is_dry_run(),
            branches,
        };

        Self::log_summary(&report);
        report
    }

    /// Backlogs for every branch, without deploying
    pub async fn plan(&self) -> Vec<BranchPlan> {
        let mut plans = Vec::with_capacity(self.branches.len());
        for target in &self.branches {
            plans.push(self.flow.plan(target).await);
        }
        plans
    }

    async fn run_sequentially(&self) -> Vec<BranchReport> {
        let mut reports = Vec::with_capacity(self.branches.len());
        for target in &self.branches {
            reports.push(self.flow.clone().execute(target.clone()).await);
        }
        reports
    }

    async fn run_concurrently(&self) -> Vec<BranchReport> {
        let semaphore = Arc::new(Semaphore::new(self.options.max_concurrency.max(1)));
        let mut tasks = Vec::with_capacity(self.branches.len());

        for target in &self.branches {
            let semaphore = Arc::clone(&semaphore);
            let flow = self.flow.clone();
            let target_for_task = target.clone();

            let task = tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok();
                flow.execute(target_for_task).await
            });

            tasks.push((target, task));
        }

        let mut reports = Vec::with_capacity(tasks.len());
        for (target, task) in tasks {
            match task.await {
                Ok(report) => reports.push(report),
                Err(e) => {
                    error!(branch = %target.branch, error = %e, "branch task failed");
                    let mut report = BranchReport::new(target);
                    report.error = Some(format!("branch task failed: {}", e));
                    report.error_code = Some("TASK_FAILED".to_string());
                    reports.push(report);
                }
            }
        }
        reports
    }

    fn log_summary(report: &RunReport) {
        for branch in &report.branches {
            if let Some(error) = &branch.error {
                warn!(branch = %branch.branch, error = %error, "branch aborted");
                continue;
            }
            info!(
                branch = %branch.branch,
                backlog = branch.backlog.len(),
                published = branch.published(),
                failed = branch.failed(),
                skipped = branch.skipped(),
                halted = branch.halted,
                "branch finished"
            );
        }

        info!(
            run_id = %report.run_id,
            published = report.published(),
            failed = report.failed(),
            success = report.is_success(),
            duration_ms = report.duration_ms,
            "reconciliation run finished"
        );
    }
}
