//! Core traits and types for release mirroring
//!
//! The four traits here are the seams between the reconciliation workflow and
//! the outside world: the release feed, the artifact host, the announcement
//! endpoint and the version-control remote.

use crate::core::error::{FeedError, PipelineError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

// ============================================================================
// Repositories and releases
// ============================================================================

/// Owner/name pair identifying a hosted repository
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoIdentity {
    pub owner: String,
    pub name: String,
}

impl RepoIdentity {
    pub fn new(owner: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for RepoIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

/// Release entry as returned by the feed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Release {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub tag_name: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub assets: Vec<ReleaseAsset>,
}

/// Downloadable release asset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReleaseAsset {
    pub browser_download_url: String,
}

impl Release {
    /// Release name, empty when the feed left it out
    pub fn name(&self) -> &str {
        self.name.as_deref().unwrap_or_default()
    }

    pub fn matches_prefix(&self, name_prefix: &str) -> bool {
        matches_prefix(self.name(), name_prefix)
    }

    pub fn to_info(&self) -> ReleaseInfo {
        ReleaseInfo {
            name: self.name().to_string(),
            notes: self.body.clone().unwrap_or_default(),
            artifact_url: self.assets.first().map(|a| a.browser_download_url.clone()),
        }
    }
}

/// The subset of a release the pipeline works with
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseInfo {
    pub name: String,
    pub notes: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact_url: Option<String>,
}

impl ReleaseInfo {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            notes: String::new(),
            artifact_url: None,
        }
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = notes.into();
        self
    }

    pub fn with_artifact(mut self, url: impl Into<String>) -> Self {
        self.artifact_url = Some(url.into());
        self
    }
}

/// Case-insensitive prefix match used to assign releases to a stream
pub fn matches_prefix(name: &str, name_prefix: &str) -> bool {
    name.to_lowercase().starts_with(&name_prefix.to_lowercase())
}

// ============================================================================
// Announcements and commits
// ============================================================================

/// Body of a downstream release announcement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Announcement {
    pub tag_name: String,
    pub target_commitish: String,
    pub name: String,
    pub body: String,
    pub draft: bool,
    pub prerelease: bool,
}

impl Announcement {
    /// Announcement mirroring `release` on `branch`
    pub fn for_release(release: &ReleaseInfo, branch: &str) -> Self {
        Self {
            tag_name: release.name.clone(),
            target_commitish: branch.to_string(),
            name: release.name.clone(),
            body: release.notes.clone(),
            draft: false,
            prerelease: false,
        }
    }
}

/// Identity recorded on mirror commits
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitAuthor {
    pub name: String,
    pub email: String,
}

impl fmt::Display for CommitAuthor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} <{}>", self.name, self.email)
    }
}

// ============================================================================
// Seams
// ============================================================================

/// Read access to a repository's release list
#[async_trait]
pub trait ReleaseFeed: Send + Sync {
    /// Releases whose name starts with `name_prefix`, newest first
    async fn fetch_releases(
        &self,
        repo: &RepoIdentity,
        name_prefix: &str,
    ) -> Result<Vec<ReleaseInfo>, FeedError>;

    /// The newest release whose name starts with `name_prefix`, if any
    async fn fetch_latest_mirrored(
        &self,
        repo: &RepoIdentity,
        name_prefix: &str,
    ) -> Result<Option<ReleaseInfo>, FeedError> {
        Ok(self
            .fetch_releases(repo, name_prefix)
            .await?
            .into_iter()
            .next())
    }
}

/// Downloads release archives
#[async_trait]
pub trait ArtifactSource: Send + Sync {
    /// Download `url` into `destination`, returning the byte count
    async fn download(&self, url: &str, destination: &Path) -> Result<u64, PipelineError>;
}

/// Creates downstream releases
#[async_trait]
pub trait ReleaseAnnouncer: Send + Sync {
    async fn announce(
        &self,
        repo: &RepoIdentity,
        announcement: &Announcement,
    ) -> Result<(), PipelineError>;
}

/// Clone, commit and push against the destination repository
#[async_trait]
pub trait VersionControl: Send + Sync {
    /// Clone `branch` of `repo` into the (empty or missing) `destination`
    async fn clone_branch(
        &self,
        repo: &RepoIdentity,
        branch: &str,
        destination: &Path,
    ) -> Result<(), PipelineError>;

    /// Stage every change in `workspace` and commit it, returning the commit id
    async fn commit_all(
        &self,
        workspace: &Path,
        message: &str,
        author: &CommitAuthor,
    ) -> Result<String, PipelineError>;

    /// Push the checked-out commit to `branch` on the remote
    async fn push(&self, workspace: &Path, branch: &str) -> Result<(), PipelineError>;
}
