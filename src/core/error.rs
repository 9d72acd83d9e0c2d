//! Error handling for release mirroring
//!
//! Each layer has its own error type so the orchestrator can decide how far
//! a failure reaches: a [`FeedError`] aborts one branch flow, a
//! [`PipelineError`] aborts one release, and only a [`MirrorError`] stops
//! the process.

use crate::core::state_machine::DeploymentStage;
use crate::security::CommandError;
use thiserror::Error;

/// Process-level errors: configuration, run locking and local state files
#[derive(Error, Debug)]
pub enum MirrorError {
    #[error("configuration error: {0}")]
    ConfigError(String),

    #[error("invalid configuration: {}", format_config_problems(.0))]
    InvalidConfig(Vec<String>),

    #[error("another run is already in progress (lock held since {since} by pid {pid})")]
    RunInProgress { pid: u32, since: String },

    #[error("history file is corrupted: {0}")]
    HistoryCorrupted(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

fn format_config_problems(problems: &[String]) -> String {
    problems.join("; ")
}

impl MirrorError {
    /// Get error code for this error
    pub fn code(&self) -> &'static str {
        match self {
            Self::ConfigError(_) => "CONFIG_ERROR",
            Self::InvalidConfig(_) => "INVALID_CONFIG",
            Self::RunInProgress { .. } => "RUN_IN_PROGRESS",
            Self::HistoryCorrupted(_) => "HISTORY_CORRUPTED",
            Self::Io(_) => "IO_ERROR",
        }
    }

    /// Get suggested actions for this error
    pub fn suggested_actions(&self) -> Vec<&'static str> {
        match self {
            Self::ConfigError(_) | Self::InvalidConfig(_) => vec![
                "Check release-mirror.yaml and the MIRROR_* environment variables",
                "Every branch needs both a branch name and a release name prefix",
            ],
            Self::RunInProgress { .. } => vec![
                "Wait for the running pass to finish",
                "Remove the lock file if the previous process crashed",
            ],
            Self::HistoryCorrupted(_) => {
                vec!["Move the history file aside; a fresh one will be created"]
            }
            Self::Io(_) => vec!["Check permissions on the workspace root and lock file"],
        }
    }
}

/// Failure to read a release listing
#[derive(Error, Debug)]
pub enum FeedError {
    #[error("[{repo}] release feed unreachable: {message}")]
    Transport { repo: String, message: String },

    #[error("[{repo}] release feed returned HTTP {status}")]
    Status { repo: String, status: u16 },

    #[error("[{repo}] release feed response could not be parsed: {message}")]
    Parse { repo: String, message: String },
}

impl FeedError {
    /// Repository the failing request targeted
    pub fn repo(&self) -> &str {
        match self {
            Self::Transport { repo, .. } | Self::Status { repo, .. } | Self::Parse { repo, .. } => {
                repo
            }
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::Transport { .. } => "FEED_TRANSPORT",
            Self::Status { .. } => "FEED_STATUS",
            Self::Parse { .. } => "FEED_PARSE",
        }
    }

    /// Transport failures and server-side statuses are worth another try on
    /// the next scheduled run; client errors usually mean bad credentials.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Transport { .. } => true,
            Self::Status { status, .. } => *status >= 500 || *status == 429,
            Self::Parse { .. } => false,
        }
    }
}

/// A ledger entry exists but cannot be matched against the upstream list
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReconciliationWarning {
    #[error("latest mirrored release has an empty name; no releases will be processed")]
    UnusableLedgerEntry,
}

/// Failure inside one deployment pipeline invocation
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("could not prepare workspace {path}: {source}")]
    WorkspaceIo {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("clone of branch '{branch}' failed: {source}")]
    CloneFailed {
        branch: String,
        #[source]
        source: CommandError,
    },

    #[error("could not clear workspace: {0}")]
    ClearFailed(#[source] std::io::Error),

    #[error("release '{release}' has no downloadable artifact")]
    MissingArtifact { release: String },

    #[error("artifact download from {url} failed: {message}")]
    DownloadFailed { url: String, message: String },

    #[error("artifact could not be extracted: {0}")]
    ExtractFailed(String),

    #[error("package manifest not found at {0}")]
    ManifestMissing(String),

    #[error("package manifest is malformed: {0}")]
    ManifestMalformed(String),

    #[error("engine range '{range}' could not be normalized: {message}")]
    InvalidEngineRange { range: String, message: String },

    #[error("deployment resources could not be copied from {path}: {message}")]
    OverlayFailed { path: String, message: String },

    #[error("commit failed: {0}")]
    CommitFailed(#[source] CommandError),

    #[error("push to '{branch}' was rejected by the remote: {message}")]
    PushRejected { branch: String, message: String },

    #[error("push to '{branch}' failed: {source}")]
    PushFailed {
        branch: String,
        #[source]
        source: CommandError,
    },

    #[error("release announcement for '{release}' failed: {message}")]
    AnnounceFailed { release: String, message: String },

    #[error("background task failed: {0}")]
    TaskFailed(String),
}

impl PipelineError {
    /// Stage the error belongs to
    pub fn stage(&self) -> DeploymentStage {
        match self {
            Self::WorkspaceIo { .. } | Self::CloneFailed { .. } => DeploymentStage::AcquireWorkspace,
            Self::ClearFailed(_) => DeploymentStage::ClearWorkspace,
            Self::MissingArtifact { .. } | Self::DownloadFailed { .. } | Self::ExtractFailed(_) => {
                DeploymentStage::FetchArtifact
            }
            Self::ManifestMissing(_)
            | Self::ManifestMalformed(_)
            | Self::InvalidEngineRange { .. } => DeploymentStage::PatchManifest,
            Self::OverlayFailed { .. } => DeploymentStage::OverlayResources,
            Self::CommitFailed(_) => DeploymentStage::Commit,
            Self::PushRejected { .. } | Self::PushFailed { .. } => DeploymentStage::Push,
            Self::AnnounceFailed { .. } => DeploymentStage::Publish,
            Self::TaskFailed(_) => DeploymentStage::Failed,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::WorkspaceIo { .. } => "WORKSPACE_IO",
            Self::CloneFailed { .. } => "CLONE_FAILED",
            Self::ClearFailed(_) => "CLEAR_FAILED",
            Self::MissingArtifact { .. } => "MISSING_ARTIFACT",
            Self::DownloadFailed { .. } => "DOWNLOAD_FAILED",
            Self::ExtractFailed(_) => "EXTRACT_FAILED",
            Self::ManifestMissing(_) => "MANIFEST_MISSING",
            Self::ManifestMalformed(_) => "MANIFEST_MALFORMED",
            Self::InvalidEngineRange { .. } => "INVALID_ENGINE_RANGE",
            Self::OverlayFailed { .. } => "OVERLAY_FAILED",
            Self::CommitFailed(_) => "COMMIT_FAILED",
            Self::PushRejected { .. } => "PUSH_REJECTED",
            Self::PushFailed { .. } => "PUSH_FAILED",
            Self::AnnounceFailed { .. } => "ANNOUNCE_FAILED",
            Self::TaskFailed(_) => "TASK_FAILED",
        }
    }

    /// Whether the rest of the branch's backlog must be abandoned.
    ///
    /// A rejected push means the remote moved underneath us; later releases
    /// would be pushed on top of a history we have not observed.
    pub fn halts_branch(&self) -> bool {
        matches!(self, Self::PushRejected { .. })
    }
}
