//! Configuration structures for release-mirror
//!
//! [`MirrorConfigFile`] is the partial, mergeable shape read from YAML files,
//! the environment and the command line. [`MirrorConfig`] is the validated
//! result the rest of the crate works with; it is built once at startup and
//! shared behind an `Arc`.

use crate::core::traits::{CommitAuthor, RepoIdentity};
use crate::security::GitCredentials;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_API_URL: &str = "https://api.github.com";
pub const DEFAULT_CLONE_BASE_URL: &str = "https://github.com";
pub const DEFAULT_RESOURCES_DIR: &str = "deployment-resources";
pub const DEFAULT_MAX_CONCURRENCY: usize = 2;
pub const DEFAULT_STALE_LOCK_HOURS: u64 = 23;
pub const DEFAULT_SCHEDULE_HOUR: u32 = 16;
pub const LOCK_FILENAME: &str = ".release-mirror.lock";

// ============================================================================
// Partial configuration (file / environment / CLI layers)
// ============================================================================

/// Root configuration object as written in `release-mirror.yaml`
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MirrorConfigFile {
    /// Configuration format version
    #[serde(default)]
    pub version: String,

    /// Base configuration file, relative to this one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extends: Option<String>,

    /// Git and GitHub API credentials
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credentials: Option<CredentialsConfig>,

    /// Downstream repository: mirror target and release ledger
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repository: Option<RepoConfig>,

    /// Upstream repository whose releases are mirrored
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upstream: Option<RepoConfig>,

    /// Identity recorded on mirror commits
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<AuthorConfig>,

    /// Release streams to mirror; a later layer replaces the whole list
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branches: Option<Vec<BranchTarget>>,

    /// `package.json` changes applied to every release
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manifest: Option<ManifestPatch>,

    /// Directory copied over each unpacked release
    /// (default: `deployment-resources`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resources_dir: Option<PathBuf>,

    /// Where per-release workspaces live and when they are kept
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workspace: Option<WorkspaceConfig>,

    /// Concurrency and run lock settings
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run: Option<RunConfig>,

    /// Daemon trigger time
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schedule: Option<ScheduleConfig>,

    /// GitHub REST API base URL (default: `https://api.github.com`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,

    /// Base URL clone addresses are built from (default: `https://github.com`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clone_base_url: Option<String>,

    /// JSON file runs are recorded in; no history is kept when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub history_file: Option<PathBuf>,
}

/// Credentials used for clone, push and API calls
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CredentialsConfig {
    /// Account name sent with Basic auth
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    /// Password or personal access token; usually `${SOME_ENV_VAR}`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

/// A GitHub repository as `owner/name`
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RepoConfig {
    /// User or organization
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    /// Repository name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Commit author
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AuthorConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Must contain `@`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

/// One mirrored release stream
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BranchTarget {
    /// Destination branch in the downstream repository
    pub branch: String,
    /// Upstream releases whose name starts with this belong to the stream
    pub name_prefix: String,
}

impl BranchTarget {
    pub fn new(branch: impl Into<String>, name_prefix: impl Into<String>) -> Self {
        Self {
            branch: branch.into(),
            name_prefix: name_prefix.into(),
        }
    }
}

impl fmt::Display for BranchTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}x)", self.branch, self.name_prefix)
    }
}

/// Changes applied to the artifact's `package.json`
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ManifestPatch {
    /// Dependency entry to inject or overwrite
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dependency: Option<DependencyPin>,

    /// Key under `engines` whose range is narrowed to its upper bound
    #[serde(skip_serializing_if = "Option::is_none")]
    pub engine: Option<String>,
}

/// Dependency written into `package.json`, given as `name@version`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DependencyPin {
    /// Package name, possibly scoped
    pub name: String,
    /// Version range written verbatim
    pub version: String,
}

impl FromStr for DependencyPin {
    type Err = String;

    /// Parses `name@version`; scoped names (`@scope/pkg@1.0.0`) are supported
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let at = s
            .rfind('@')
            .filter(|&i| i > 0)
            .ok_or_else(|| format!("expected name@version, got '{}'", s))?;
        let (name, version) = (&s[..at], &s[at + 1..]);
        if name.is_empty() || version.is_empty() {
            return Err(format!("expected name@version, got '{}'", s));
        }
        Ok(Self {
            name: name.to_string(),
            version: version.to_string(),
        })
    }
}

/// Workspace settings
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct WorkspaceConfig {
    /// Parent of the `Target-*` directories (default: system temp dir)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root: Option<PathBuf>,
    /// Default: `on-failure`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retention: Option<WorkspaceRetention>,
}

/// When a pipeline's workspace directory is kept after the run
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum WorkspaceRetention {
    /// Keep every workspace
    Always,
    /// Keep workspaces of failed releases only
    #[default]
    OnFailure,
    /// Delete every workspace
    Never,
}

impl WorkspaceRetention {
    /// Whether a workspace whose deployment ended this way is kept
    pub fn should_retain(&self, succeeded: bool) -> bool {
        match self {
            Self::Always => true,
            Self::OnFailure => !succeeded,
            Self::Never => false,
        }
    }
}

impl FromStr for WorkspaceRetention {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "always" => Ok(Self::Always),
            "on-failure" | "on_failure" => Ok(Self::OnFailure),
            "never" => Ok(Self::Never),
            other => Err(format!(
                "unknown retention '{}' (expected always, on-failure or never)",
                other
            )),
        }
    }
}

/// Run-level settings
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RunConfig {
    /// Process branch streams one after another instead of concurrently
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sequential: Option<bool>,

    /// Upper bound on branch streams processed at once (default: 2)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_concurrency: Option<usize>,

    /// Single-instance lock file (default: `<workspace root>/.release-mirror.lock`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lock_file: Option<PathBuf>,

    /// Age after which a leftover lock is taken over (default: 23)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stale_lock_hours: Option<u64>,

    /// Timeout for each GitHub API request; none when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http_timeout_secs: Option<u64>,
}

/// Daily trigger time in UTC
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleConfig {
    /// 0-23 (default: 16)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hour: Option<u32>,
    /// 0-59 (default: 0)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub minute: Option<u32>,
    /// Run once immediately when the daemon starts
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_on_startup: Option<bool>,
}

// ============================================================================
// Resolved configuration
// ============================================================================

/// Validated configuration, constructed once per process
#[derive(Debug)]
pub struct MirrorConfig {
    pub credentials: GitCredentials,
    /// Downstream repository; its release list is the ledger
    pub repository: RepoIdentity,
    /// Repository releases are read from
    pub upstream: RepoIdentity,
    pub author: CommitAuthor,
    /// At least one, with unique branch names
    pub branches: Vec<BranchTarget>,
    pub manifest: ManifestPatch,
    pub resources_dir: PathBuf,
    pub workspace_root: PathBuf,
    pub retention: WorkspaceRetention,
    pub sequential: bool,
    /// Always at least 1
    pub max_concurrency: usize,
    pub lock_file: PathBuf,
    /// Lock age after which another run may take it over
    pub stale_lock_after: Duration,
    pub http_timeout: Option<Duration>,
    /// UTC hour of the daily run
    pub schedule_hour: u32,
    pub schedule_minute: u32,
    pub run_on_startup: bool,
    pub api_url: String,
    pub clone_base_url: String,
    pub history_file: Option<PathBuf>,
}

/// `<base>/<owner>/<name>.git`
pub fn clone_url(base: &str, repo: &RepoIdentity) -> String {
    format!("{}/{}/{}.git", base.trim_end_matches('/'), repo.owner, repo.name)
}
