//! Deployment pipeline - publishes one upstream release into one branch
//!
//! Stages run strictly in order:
//! acquire workspace, clear, fetch artifact, patch manifest, overlay
//! resources, commit, push, publish. A stage failure stops this release
//! only and is reported, never propagated.

pub mod archive;
pub mod manifest;
pub mod overlay;
pub mod workspace;

use crate::core::config::{BranchTarget, ManifestPatch, MirrorConfig, WorkspaceRetention};
use crate::core::error::PipelineError;
use crate::core::state_machine::{DeploymentStage, StageTracker, StageTransition};
use crate::core::traits::{
    Announcement, ArtifactSource, CommitAuthor, ReleaseAnnouncer, ReleaseInfo, RepoIdentity,
    VersionControl,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};

pub use manifest::{ManifestChanges, normalize_engine_range};
pub use workspace::Workspace;

/// Temporary archive name inside the workspace
const ARTIFACT_FILENAME: &str = ".release-mirror-artifact.zip";

/// The slice of configuration the pipeline needs
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub repository: RepoIdentity,
    pub author: CommitAuthor,
    pub manifest: ManifestPatch,
    pub resources_dir: PathBuf,
    pub workspace_root: PathBuf,
    pub retention: WorkspaceRetention,
}

impl PipelineSettings {
    pub fn from_config(config: &MirrorConfig) -> Self {
        Self {
            repository: config.repository.clone(),
            author: config.author.clone(),
            manifest: config.manifest.clone(),
            resources_dir: config.resources_dir.clone(),
            workspace_root: config.workspace_root.clone(),
            retention: config.retention,
        }
    }
}

/// Result of one deployment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeploymentOutcome {
    /// Pushed and announced
    Published,
    /// Stages up to the overlay ran; nothing left the machine
    DryRun,
    Failed,
    /// Not attempted because an earlier release halted the branch
    Skipped,
}

/// Structured record of one pipeline invocation
#[derive(Debug, Clone, Serialize)]
pub struct DeploymentReport {
    pub branch: String,
    pub release: String,
    pub outcome: DeploymentOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_stage: Option<DeploymentStage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commit: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manifest: Option<ManifestChanges>,
    /// Workspace path when it was retained
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workspace: Option<PathBuf>,
    /// Set when this failure abandons the rest of the branch backlog
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub halts_branch: bool,
    pub stages: Vec<StageTransition>,
    pub started_at: DateTime<Utc>,
    pub duration_ms: i64,
}

impl DeploymentReport {
    pub fn is_success(&self) -> bool {
        matches!(
            self.outcome,
            DeploymentOutcome::Published | DeploymentOutcome::DryRun
        )
    }

    /// Report for a release never attempted
    pub fn skipped(target: &BranchTarget, release: &ReleaseInfo, reason: &str) -> Self {
        Self {
            branch: target.branch.clone(),
            release: release.name.clone(),
            outcome: DeploymentOutcome::Skipped,
            failed_stage: None,
            error_code: None,
            error: Some(reason.to_string()),
            commit: None,
            manifest: None,
            workspace: None,
            halts_branch: false,
            stages: Vec::new(),
            started_at: Utc::now(),
            duration_ms: 0,
        }
    }
}

/// Work products carried between stages
#[derive(Default)]
struct StageOutput {
    commit: Option<String>,
    manifest: Option<ManifestChanges>,
}

/// Error with its full `source()` chain, outermost first
pub fn error_chain(error: &dyn std::error::Error) -> String {
    let mut chain = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        chain.push_str(": ");
        chain.push_str(&cause.to_string());
        source = cause.source();
    }
    chain
}

/// Eight-stage publish sequence for one release into one branch
pub struct DeploymentPipeline {
    settings: PipelineSettings,
    vcs: Arc<dyn VersionControl>,
    artifacts: Arc<dyn ArtifactSource>,
    announcer: Arc<dyn ReleaseAnnouncer>,
    dry_run: bool,
}

impl DeploymentPipeline {
    pub fn new(
        settings: PipelineSettings,
        vcs: Arc<dyn VersionControl>,
        artifacts: Arc<dyn ArtifactSource>,
        announcer: Arc<dyn ReleaseAnnouncer>,
    ) -> Self {
        Self {
            settings,
            vcs,
            artifacts,
            announcer,
            dry_run: false,
        }
    }

    /// Stop after the overlay stage; nothing is committed, pushed or announced.
    /// The staged workspace is always kept for inspection.
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    /// Run every stage for `release`; failures are folded into the report
    pub async fn deploy(&self, target: &BranchTarget, release: &ReleaseInfo) -> DeploymentReport {
        let started_at = Utc::now();
        let mut tracker = StageTracker::new();
        let mut workspace: Option<Workspace> = None;
        let mut output = StageOutput::default();

        info!(branch = %target.branch, release = %release.name, dry_run = self.dry_run, "processing release");

        let result = self
            .run_stages(target, release, &mut tracker, &mut workspace, &mut output)
            .await;

        let succeeded = result.is_ok();
        tracker.enter(if succeeded {
            DeploymentStage::Completed
        } else {
            DeploymentStage::Failed
        });

        let retained = match workspace {
            Some(ws) => {
                ws.finish(self.dry_run || self.settings.retention.should_retain(succeeded))
                    .await
            }
            None => None,
        };

        let mut report = DeploymentReport {
            branch: target.branch.clone(),
            release: release.name.clone(),
            outcome: DeploymentOutcome::Published,
            failed_stage: None,
            error_code: None,
            error: None,
            commit: output.commit,
            manifest: output.manifest,
            workspace: retained,
            halts_branch: false,
            duration_ms: tracker.elapsed_ms(),
            stages: Vec::new(),
            started_at,
        };

        match result {
            Ok(()) if self.dry_run => {
                report.outcome = DeploymentOutcome::DryRun;
                info!(branch = %target.branch, release = %release.name, "dry run finished");
            }
            Ok(()) => {
                info!(branch = %target.branch, release = %release.name, duration_ms = report.duration_ms, "finished processing release");
            }
            Err(e) => {
                let stage = tracker.last_working_stage().unwrap_or(e.stage());
                let chain = error_chain(&e);
                error!(
                    branch = %target.branch,
                    release = %release.name,
                    stage = stage.as_str(),
                    code = e.code(),
                    error = %chain,
                    "release processing failed"
                );
                if let Some(path) = &report.workspace {
                    warn!(path = %path.display(), "workspace kept for inspection");
                }
                report.outcome = DeploymentOutcome::Failed;
                report.failed_stage = Some(stage);
                report.error_code = Some(e.code().to_string());
                report.error = Some(chain);
                report.halts_branch = e.halts_branch();
            }
        }

        report.stages = tracker.into_transitions();
        report
    }

    async fn run_stages(
        &self,
        target: &BranchTarget,
        release: &ReleaseInfo,
        tracker: &mut StageTracker,
        workspace: &mut Option<Workspace>,
        output: &mut StageOutput,
    ) -> Result<(), PipelineError> {
        tracker.enter(DeploymentStage::AcquireWorkspace);
        let ws = workspace.insert(
            Workspace::create(&self.settings.workspace_root, &target.branch).await?,
        );
        let path = ws.path().to_path_buf();
        self.vcs
            .clone_branch(&self.settings.repository, &target.branch, &path)
            .await?;

        tracker.enter(DeploymentStage::ClearWorkspace);
        ws.clear().await?;

        tracker.enter(DeploymentStage::FetchArtifact);
        self.fetch_artifact(release, &path).await?;

        tracker.enter(DeploymentStage::PatchManifest);
        output.manifest = Some(manifest::patch_manifest(&path, &self.settings.manifest).await?);

        tracker.enter(DeploymentStage::OverlayResources);
        overlay::overlay_resources(&self.settings.resources_dir, &path).await?;

        if self.dry_run {
            return Ok(());
        }

        tracker.enter(DeploymentStage::Commit);
        let message = format!("Add v{}", release.name);
        output.commit = Some(
            self.vcs
                .commit_all(&path, &message, &self.settings.author)
                .await?,
        );

        tracker.enter(DeploymentStage::Push);
        self.vcs.push(&path, &target.branch).await?;

        tracker.enter(DeploymentStage::Publish);
        self.announcer
            .announce(
                &self.settings.repository,
                &Announcement::for_release(release, &target.branch),
            )
            .await?;

        Ok(())
    }

    async fn fetch_artifact(&self, release: &ReleaseInfo, workspace: &Path) -> Result<(), PipelineError> {
        let url = release
            .artifact_url
            .as_deref()
            .ok_or_else(|| PipelineError::MissingArtifact {
                release: release.name.clone(),
            })?;

        let archive_path = workspace.join(ARTIFACT_FILENAME);
        let bytes = self.artifacts.download(url, &archive_path).await?;
        let summary = archive::extract(&archive_path, workspace).await?;
        tokio::fs::remove_file(&archive_path)
            .await
            .map_err(|e| PipelineError::ExtractFailed(format!("could not remove archive: {}", e)))?;

        info!(
            release = %release.name,
            bytes,
            files = summary.files,
            directories = summary.directories,
            "artifact unpacked"
        );
        Ok(())
    }
}
