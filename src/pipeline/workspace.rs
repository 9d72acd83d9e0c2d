//! Ephemeral per-release working directories

use crate::core::error::PipelineError;
use chrono::{DateTime, Utc};
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};

/// Name of the directory that survives [`Workspace::clear`]
const GIT_DIR: &str = ".git";

/// `Target-<branch>-<yyyyMMddTHHmmss>-<8 hex>`
pub fn workspace_name(branch: &str, now: DateTime<Utc>) -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!(
        "Target-{}-{}-{}",
        sanitize_branch(branch),
        now.format("%Y%m%dT%H%M%S"),
        &suffix[..8]
    )
}

/// Branch names may contain `/`; keep directory names flat
fn sanitize_branch(branch: &str) -> String {
    branch
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '-'
            }
        })
        .collect()
}

/// Directory owned by a single pipeline invocation
#[derive(Debug)]
pub struct Workspace {
    path: PathBuf,
}

impl Workspace {
    /// Create a fresh, uniquely named, empty directory under `root`
    pub async fn create(root: &Path, branch: &str) -> Result<Self, PipelineError> {
        let path = root.join(workspace_name(branch, Utc::now()));
        let io_error = |source| PipelineError::WorkspaceIo {
            path: path.display().to_string(),
            source,
        };

        fs::create_dir_all(root).await.map_err(io_error)?;
        fs::create_dir(&path).await.map_err(io_error)?;

        debug!(path = %path.display(), "workspace created");
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Delete every top-level entry except `.git`; returns how many were removed
    pub async fn clear(&self) -> Result<usize, PipelineError> {
        let mut removed = 0;
        let mut entries = fs::read_dir(&self.path)
            .await
            .map_err(PipelineError::ClearFailed)?;

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(PipelineError::ClearFailed)?
        {
            if entry.file_name() == GIT_DIR {
                continue;
            }
            let file_type = entry.file_type().await.map_err(PipelineError::ClearFailed)?;
            if file_type.is_dir() {
                fs::remove_dir_all(entry.path()).await
            } else {
                fs::remove_file(entry.path()).await
            }
            .map_err(PipelineError::ClearFailed)?;
            removed += 1;
        }

        debug!(path = %self.path.display(), removed, "workspace cleared");
        Ok(removed)
    }

    /// Keep or delete the directory; returns the path when it is kept
    pub async fn finish(self, retain: bool) -> Option<PathBuf> {
        if retain {
            return Some(self.path);
        }
        if let Err(e) = remove_if_present(&self.path).await {
            warn!(path = %self.path.display(), error = %e, "failed to remove workspace");
            return Some(self.path);
        }
        None
    }
}

async fn remove_if_present(path: &Path) -> io::Result<()> {
    match fs::remove_dir_all(path).await {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    #[test]
    fn test_workspace_name_format() {
        let now = Utc.with_ymd_and_hms(2026, 3, 4, 16, 0, 5).unwrap();
        let name = workspace_name("feature/ghost-3", now);

        assert!(name.starts_with("Target-feature-ghost-3-20260304T160005-"));
        let suffix = name.rsplit('-').next().unwrap();
        assert_eq!(suffix.len(), 8);
        assert!(suffix.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_workspace_names_are_unique() {
        let now = Utc::now();
        assert_ne!(workspace_name("master", now), workspace_name("master", now));
    }

    #[tokio::test]
    async fn test_clear_keeps_git_dir() {
        let root = TempDir::new().unwrap();
        let workspace = Workspace::create(root.path(), "master").await.unwrap();
        let path = workspace.path().to_path_buf();

        std::fs::create_dir_all(path.join(".git/objects")).unwrap();
        std::fs::write(path.join(".git/HEAD"), "ref: refs/heads/master").unwrap();
        std::fs::create_dir_all(path.join("content/themes")).unwrap();
        std::fs::write(path.join("content/themes/casper.css"), "body{}").unwrap();
        std::fs::write(path.join("package.json"), "{}").unwrap();
        std::fs::write(path.join(".gitignore"), "node_modules").unwrap();

        let removed = workspace.clear().await.unwrap();

        assert_eq!(removed, 3);
        assert!(path.join(".git/HEAD").exists());
        assert!(!path.join("content").exists());
        assert!(!path.join("package.json").exists());
        assert!(!path.join(".gitignore").exists());
    }

    #[tokio::test]
    async fn test_finish_removes_or_keeps() {
        let root = TempDir::new().unwrap();

        let dropped = Workspace::create(root.path(), "master").await.unwrap();
        let dropped_path = dropped.path().to_path_buf();
        assert_eq!(dropped.finish(false).await, None);
        assert!(!dropped_path.exists());

        let kept = Workspace::create(root.path(), "master").await.unwrap();
        let kept_path = kept.path().to_path_buf();
        assert_eq!(kept.finish(true).await, Some(kept_path.clone()));
        assert!(kept_path.exists());
    }
}
