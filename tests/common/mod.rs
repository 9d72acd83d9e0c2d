#![allow(dead_code)]

use async_trait::async_trait;
use release_mirror::core::config::{
    BranchTarget, DependencyPin, ManifestPatch, WorkspaceRetention,
};
use release_mirror::core::error::{FeedError, PipelineError};
use release_mirror::core::traits::{
    Announcement, ArtifactSource, CommitAuthor, ReleaseAnnouncer, ReleaseFeed, ReleaseInfo,
    RepoIdentity, VersionControl,
};
use release_mirror::orchestration::{BranchOrchestrator, OrchestratorOptions};
use release_mirror::pipeline::{DeploymentPipeline, PipelineSettings};
use release_mirror::security::CommandError;
use std::collections::{HashMap, HashSet, VecDeque};
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

pub const ARTIFACT_HOST: &str = "https://artifacts.test";

pub fn upstream() -> RepoIdentity {
    RepoIdentity::new("TryGhost", "Ghost")
}

pub fn downstream() -> RepoIdentity {
    RepoIdentity::new("acme", "ghost-azure")
}

/// Release with a downloadable artifact named after it
pub fn release(name: &str) -> ReleaseInfo {
    ReleaseInfo::new(name)
        .with_notes(format!("Notes for {}", name))
        .with_artifact(format!("{}/{}.zip", ARTIFACT_HOST, name))
}

/// Ordered log shared by every fake, e.g. `push:master`
#[derive(Clone, Default)]
pub struct EventLog(Arc<Mutex<Vec<String>>>);

impl EventLog {
    pub fn push(&self, event: impl Into<String>) {
        self.0.lock().unwrap().push(event.into());
    }

    pub fn all(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn with_prefix(&self, prefix: &str) -> Vec<String> {
        self.all()
            .into_iter()
            .filter(|e| e.starts_with(prefix))
            .collect()
    }
}

// ============================================================================
// Release feed
// ============================================================================

/// Release lists per repository; clones share the same lists
#[derive(Clone, Default)]
pub struct FakeFeed {
    releases: Arc<Mutex<HashMap<String, Vec<ReleaseInfo>>>>,
    failing_prefixes: HashSet<String>,
}

impl FakeFeed {
    /// `releases` newest first, as the feed returns them
    pub fn with_releases(self, repo: &RepoIdentity, releases: Vec<ReleaseInfo>) -> Self {
        self.releases
            .lock()
            .unwrap()
            .insert(repo.to_string(), releases);
        self
    }

    /// Add `release` as the newest entry of `repo`
    pub fn record(&self, repo: &RepoIdentity, release: ReleaseInfo) {
        self.releases
            .lock()
            .unwrap()
            .entry(repo.to_string())
            .or_default()
            .insert(0, release);
    }

    pub fn failing_for(mut self, name_prefix: &str) -> Self {
        self.failing_prefixes.insert(name_prefix.to_string());
        self
    }
}

#[async_trait]
impl ReleaseFeed for FakeFeed {
    async fn fetch_releases(
        &self,
        repo: &RepoIdentity,
        name_prefix: &str,
    ) -> Result<Vec<ReleaseInfo>, FeedError> {
        if self.failing_prefixes.contains(name_prefix) {
            return Err(FeedError::Status {
                repo: repo.to_string(),
                status: 502,
            });
        }
        Ok(self
            .releases
            .lock()
            .unwrap()
            .get(&repo.to_string())
            .map(|all| {
                all.iter()
                    .filter(|r| release_mirror::core::traits::matches_prefix(&r.name, name_prefix))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}

// ============================================================================
// Artifact host
// ============================================================================

/// Serves a zip with a Ghost-like `package.json` for every URL
pub struct FakeArtifacts {
    events: EventLog,
    broken: HashSet<String>,
}

impl FakeArtifacts {
    pub fn new(events: EventLog) -> Self {
        Self {
            events,
            broken: HashSet::new(),
        }
    }

    /// Downloads of this release's artifact fail
    pub fn broken_for(mut self, release_name: &str) -> Self {
        self.broken
            .insert(format!("{}/{}.zip", ARTIFACT_HOST, release_name));
        self
    }
}

pub fn artifact_zip(version: &str) -> Vec<u8> {
    let manifest = format!(
        r#"{{
  "name": "ghost",
  "version": "{}",
  "engines": {{
    "node": "^8.9.0 || ^10.13.0"
  }},
  "dependencies": {{
    "express": "4.16.4"
  }}
}}
"#,
        version
    );

    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default();
    writer.start_file("package.json", options).unwrap();
    writer.write_all(manifest.as_bytes()).unwrap();
    writer.add_directory("core/", options).unwrap();
    writer.start_file("core/index.js", options).unwrap();
    writer.write_all(b"module.exports = {};\n").unwrap();
    writer.start_file("LICENSE", options).unwrap();
    writer.write_all(b"MIT\n").unwrap();
    writer.finish().unwrap().into_inner()
}

#[async_trait]
impl ArtifactSource for FakeArtifacts {
    async fn download(&self, url: &str, destination: &Path) -> Result<u64, PipelineError> {
        self.events.push(format!("download:{}", url));
        if self.broken.contains(url) {
            return Err(PipelineError::DownloadFailed {
                url: url.to_string(),
                message: "HTTP status server error (503 Service Unavailable)".to_string(),
            });
        }

        let version = url
            .rsplit('/')
            .next()
            .and_then(|file| file.strip_suffix(".zip"))
            .unwrap_or("0.0.0");
        let bytes = artifact_zip(version);
        tokio::fs::write(destination, &bytes).await.unwrap();
        Ok(bytes.len() as u64)
    }
}

// ============================================================================
// Version control
// ============================================================================

pub enum PushResult {
    Ok,
    Rejected,
    Failed,
}

/// Snapshot of a workspace at commit time
#[derive(Debug, Clone)]
pub struct CommitSnapshot {
    pub message: String,
    pub author: CommitAuthor,
    pub manifest: serde_json::Value,
    pub files: Vec<String>,
}

pub struct FakeVcs {
    events: EventLog,
    push_results: Mutex<VecDeque<PushResult>>,
    commits: Mutex<Vec<CommitSnapshot>>,
}

impl FakeVcs {
    pub fn new(events: EventLog) -> Self {
        Self {
            events,
            push_results: Mutex::new(VecDeque::new()),
            commits: Mutex::new(Vec::new()),
        }
    }

    /// Results for successive pushes; later pushes succeed
    pub fn with_push_results(self, results: Vec<PushResult>) -> Self {
        *self.push_results.lock().unwrap() = results.into();
        self
    }

    pub fn commits(&self) -> Vec<CommitSnapshot> {
        self.commits.lock().unwrap().clone()
    }
}

fn list_files(root: &Path) -> Vec<String> {
    let mut files: Vec<String> = walkdir::WalkDir::new(root)
        .min_depth(1)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .map(|e| {
            e.path()
                .strip_prefix(root)
                .unwrap()
                .to_string_lossy()
                .replace('\\', "/")
        })
        .collect();
    files.sort();
    files
}

#[async_trait]
impl VersionControl for FakeVcs {
    async fn clone_branch(
        &self,
        _repo: &RepoIdentity,
        branch: &str,
        destination: &Path,
    ) -> Result<(), PipelineError> {
        self.events.push(format!("clone:{}", branch));
        std::fs::create_dir_all(destination.join(".git")).unwrap();
        std::fs::write(destination.join(".git/HEAD"), "ref: refs/heads/main\n").unwrap();
        std::fs::write(destination.join("stale.txt"), "previous release").unwrap();
        std::fs::create_dir_all(destination.join("content/old")).unwrap();
        Ok(())
    }

    async fn commit_all(
        &self,
        workspace: &Path,
        message: &str,
        author: &CommitAuthor,
    ) -> Result<String, PipelineError> {
        self.events.push(format!("commit:{}", message));
        let manifest = std::fs::read_to_string(workspace.join("package.json")).unwrap();
        let mut commits = self.commits.lock().unwrap();
        commits.push(CommitSnapshot {
            message: message.to_string(),
            author: author.clone(),
            manifest: serde_json::from_str(&manifest).unwrap(),
            files: list_files(workspace),
        });
        Ok(format!("{:040x}", commits.len()))
    }

    async fn push(&self, _workspace: &Path, branch: &str) -> Result<(), PipelineError> {
        self.events.push(format!("push:{}", branch));
        let result = self
            .push_results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(PushResult::Ok);
        match result {
            PushResult::Ok => Ok(()),
            PushResult::Rejected => Err(PipelineError::PushRejected {
                branch: branch.to_string(),
                message: "! [rejected] HEAD -> master (fetch first)".to_string(),
            }),
            PushResult::Failed => Err(PipelineError::PushFailed {
                branch: branch.to_string(),
                source: CommandError::Timeout(Duration::from_secs(300)),
            }),
        }
    }
}

// ============================================================================
// Announcer
// ============================================================================

pub struct FakeAnnouncer {
    events: EventLog,
    fail: bool,
    announcements: Mutex<Vec<(RepoIdentity, Announcement)>>,
    ledger: Mutex<Option<FakeFeed>>,
}

impl FakeAnnouncer {
    pub fn new(events: EventLog) -> Self {
        Self {
            events,
            fail: false,
            announcements: Mutex::new(Vec::new()),
            ledger: Mutex::new(None),
        }
    }

    /// Successful announcements show up as releases of `feed`
    pub fn publish_into(&self, feed: FakeFeed) {
        *self.ledger.lock().unwrap() = Some(feed);
    }

    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }

    pub fn announcements(&self) -> Vec<(RepoIdentity, Announcement)> {
        self.announcements.lock().unwrap().clone()
    }
}

#[async_trait]
impl ReleaseAnnouncer for FakeAnnouncer {
    async fn announce(
        &self,
        repo: &RepoIdentity,
        announcement: &Announcement,
    ) -> Result<(), PipelineError> {
        self.events.push(format!("announce:{}", announcement.name));
        if self.fail {
            return Err(PipelineError::AnnounceFailed {
                release: announcement.name.clone(),
                message: "HTTP 422: Validation Failed".to_string(),
            });
        }
        if let Some(feed) = self.ledger.lock().unwrap().as_ref() {
            feed.record(
                repo,
                ReleaseInfo::new(announcement.name.clone()).with_notes(announcement.body.clone()),
            );
        }
        self.announcements
            .lock()
            .unwrap()
            .push((repo.clone(), announcement.clone()));
        Ok(())
    }
}

// ============================================================================
// Harness
// ============================================================================

/// Temp directories plus fakes wired into a pipeline
pub struct Harness {
    pub temp: TempDir,
    pub events: EventLog,
    pub vcs: Arc<FakeVcs>,
    pub artifacts: Arc<FakeArtifacts>,
    pub announcer: Arc<FakeAnnouncer>,
    pub retention: WorkspaceRetention,
    pub dry_run: bool,
}

impl Harness {
    pub fn new() -> Self {
        let events = EventLog::default();
        Self::with_fakes(
            events.clone(),
            FakeVcs::new(events.clone()),
            FakeArtifacts::new(events.clone()),
            FakeAnnouncer::new(events),
        )
    }

    pub fn with_fakes(
        events: EventLog,
        vcs: FakeVcs,
        artifacts: FakeArtifacts,
        announcer: FakeAnnouncer,
    ) -> Self {
        let temp = TempDir::new().unwrap();
        let resources = temp.path().join("deployment-resources");
        std::fs::create_dir_all(resources.join("content/adapters")).unwrap();
        std::fs::write(resources.join("web.config"), "<configuration/>").unwrap();
        std::fs::write(resources.join("content/adapters/azure.js"), "// adapter").unwrap();

        Self {
            temp,
            events,
            vcs: Arc::new(vcs),
            artifacts: Arc::new(artifacts),
            announcer: Arc::new(announcer),
            retention: WorkspaceRetention::OnFailure,
            dry_run: false,
        }
    }

    pub fn workspace_root(&self) -> PathBuf {
        self.temp.path().join("workspaces")
    }

    pub fn settings(&self) -> PipelineSettings {
        PipelineSettings {
            repository: downstream(),
            author: CommitAuthor {
                name: "Mirror Bot".to_string(),
                email: "mirror@example.com".to_string(),
            },
            manifest: ManifestPatch {
                dependency: Some(DependencyPin {
                    name: "applicationinsights".to_string(),
                    version: "^1.0.8".to_string(),
                }),
                engine: Some("node".to_string()),
            },
            resources_dir: self.temp.path().join("deployment-resources"),
            workspace_root: self.workspace_root(),
            retention: self.retention,
        }
    }

    pub fn pipeline(&self) -> Arc<DeploymentPipeline> {
        Arc::new(
            DeploymentPipeline::new(
                self.settings(),
                self.vcs.clone(),
                self.artifacts.clone(),
                self.announcer.clone(),
            )
            .with_dry_run(self.dry_run),
        )
    }

    pub fn orchestrator(
        &self,
        feed: FakeFeed,
        branches: Vec<BranchTarget>,
        sequential: bool,
    ) -> BranchOrchestrator {
        self.announcer.publish_into(feed.clone());
        BranchOrchestrator::new(
            upstream(),
            downstream(),
            branches,
            Arc::new(feed),
            self.pipeline(),
            OrchestratorOptions {
                sequential,
                max_concurrency: 2,
            },
        )
    }

    /// Workspace directories still present under the root
    pub fn remaining_workspaces(&self) -> Vec<PathBuf> {
        match std::fs::read_dir(self.workspace_root()) {
            Ok(entries) => entries.filter_map(Result::ok).map(|e| e.path()).collect(),
            Err(_) => Vec::new(),
        }
    }
}
