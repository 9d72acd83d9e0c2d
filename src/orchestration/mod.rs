//! Orchestration layer for release mirroring
//!
//! [`MirrorService`] wires the GitHub client, the git CLI and the deployment
//! pipeline into a [`BranchOrchestrator`], and adds the run lock and history
//! around each pass.

pub mod branch_orchestrator;
pub mod history;
pub mod run_lock;
pub mod scheduler;

pub use branch_orchestrator::{
    BranchOrchestrator, BranchPlan, BranchReport, OrchestratorOptions, RunReport,
};
pub use history::{HistoryStatistics, RunHistory};
pub use run_lock::RunLock;
pub use scheduler::{DailySchedule, Scheduler};

use crate::core::config::MirrorConfig;
use crate::core::error::MirrorError;
use crate::pipeline::{DeploymentPipeline, PipelineSettings};
use crate::providers::{GitCli, GithubClient};
use std::sync::Arc;
use tracing::info;

/// A configured mirror: one orchestrator plus run-level bookkeeping
pub struct MirrorService {
    config: Arc<MirrorConfig>,
    orchestrator: BranchOrchestrator,
}

impl MirrorService {
    /// Build the production stack from configuration
    pub fn from_config(config: Arc<MirrorConfig>, dry_run: bool) -> Result<Self, MirrorError> {
        let github = Arc::new(GithubClient::new(
            config.api_url.clone(),
            config.credentials.clone(),
            config.http_timeout,
        )?);
        let git = Arc::new(GitCli::new(
            config.clone_base_url.clone(),
            config.credentials.clone(),
            config.http_timeout,
        ));

        let pipeline = DeploymentPipeline::new(
            PipelineSettings::from_config(&config),
            git,
            github.clone(),
            github.clone(),
        )
        .with_dry_run(dry_run);

        let orchestrator = BranchOrchestrator::from_config(&config, github, Arc::new(pipeline));
        Ok(Self::new(config, orchestrator))
    }

    pub fn new(config: Arc<MirrorConfig>, orchestrator: BranchOrchestrator) -> Self {
        Self {
            config,
            orchestrator,
        }
    }

    pub fn orchestrator(&self) -> &BranchOrchestrator {
        &self.orchestrator
    }

    /// One reconciliation pass under the run lock, recorded in the history
    pub async fn run_once(&self) -> Result<RunReport, MirrorError> {
        let _lock = RunLock::acquire(&self.config.lock_file, self.config.stale_lock_after)?;

        let report = self.orchestrator.run().await;

        if let Some(path) = &self.config.history_file
            && !report.dry_run
        {
            let mut history = RunHistory::load(path).await?;
            history.record_run(&report).await?;
            info!(path = %path.display(), "run recorded");
        }

        Ok(report)
    }

    /// Daily loop until interrupted
    pub async fn daemon(&self, run_on_startup: bool) -> Result<(), MirrorError> {
        let schedule = DailySchedule::new(self.config.schedule_hour, self.config.schedule_minute)?;
        let scheduler = Scheduler::new(schedule, run_on_startup || self.config.run_on_startup);

        scheduler
            .run(|| async { self.run_once().await.map(|_| ()) })
            .await
    }
}
