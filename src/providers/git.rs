//! Version control through the `git` CLI
//!
//! Credentials travel as a per-invocation `http.extraHeader`; they are never
//! written to `.git/config` or embedded in the remote URL.

use crate::core::config::clone_url;
use crate::core::error::PipelineError;
use crate::core::traits::{CommitAuthor, RepoIdentity, VersionControl};
use crate::security::{CommandError, GitCredentials, SafeCommandExecutor};
use async_trait::async_trait;
use secrecy::ExposeSecret;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

/// Markers git prints when the remote refuses a non-fast-forward update
const REJECTION_MARKERS: &[&str] = &["[rejected]", "non-fast-forward", "fetch first"];

pub struct GitCli {
    clone_base_url: String,
    credentials: GitCredentials,
    timeout: Option<Duration>,
}

impl GitCli {
    pub fn new(
        clone_base_url: impl Into<String>,
        credentials: GitCredentials,
        timeout: Option<Duration>,
    ) -> Self {
        Self {
            clone_base_url: clone_base_url.into(),
            credentials,
            timeout,
        }
    }

    fn executor(&self, dir: &Path) -> Result<SafeCommandExecutor, CommandError> {
        let mut executor = SafeCommandExecutor::new(dir)?.with_env("GIT_TERMINAL_PROMPT", "0");
        for secret in self.credentials.redactions() {
            executor = executor.with_redaction(secret);
        }
        if let Some(timeout) = self.timeout {
            executor.set_timeout(timeout);
        }
        Ok(executor)
    }

    fn auth_args(&self) -> Vec<String> {
        if self.credentials.password().expose_secret().is_empty() {
            return Vec::new();
        }
        vec![
            "-c".to_string(),
            format!(
                "http.extraHeader=Authorization: {}",
                self.credentials.basic_auth_header()
            ),
        ]
    }

    fn args(&self, with_auth: bool, rest: &[&str]) -> Vec<String> {
        let mut args = if with_auth { self.auth_args() } else { Vec::new() };
        args.extend(rest.iter().map(|s| s.to_string()));
        args
    }
}

fn is_rejection(error: &CommandError) -> bool {
    error
        .stderr()
        .is_some_and(|stderr| REJECTION_MARKERS.iter().any(|m| stderr.contains(m)))
}

#[async_trait]
impl VersionControl for GitCli {
    async fn clone_branch(
        &self,
        repo: &RepoIdentity,
        branch: &str,
        destination: &Path,
    ) -> Result<(), PipelineError> {
        let url = clone_url(&self.clone_base_url, repo);
        let clone_failed = |source| PipelineError::CloneFailed {
            branch: branch.to_string(),
            source,
        };

        let executor = self.executor(destination).map_err(clone_failed)?;
        let args = self.args(
            true,
            &["clone", "--branch", branch, "--single-branch", "--", &url, "."],
        );
        executor.run("git", &args).await.map_err(clone_failed)?;

        debug!(%repo, branch, path = %destination.display(), "branch cloned");
        Ok(())
    }

    async fn commit_all(
        &self,
        workspace: &Path,
        message: &str,
        author: &CommitAuthor,
    ) -> Result<String, PipelineError> {
        let executor = self.executor(workspace).map_err(PipelineError::CommitFailed)?;

        executor
            .run("git", &self.args(false, &["add", "-A"]))
            .await
            .map_err(PipelineError::CommitFailed)?;

        let user_name = format!("user.name={}", author.name);
        let user_email = format!("user.email={}", author.email);
        let author_arg = author.to_string();
        executor
            .run(
                "git",
                &self.args(
                    false,
                    &[
                        "-c",
                        &user_name,
                        "-c",
                        &user_email,
                        "-c",
                        "commit.gpgsign=false",
                        "commit",
                        "--allow-empty",
                        "--author",
                        &author_arg,
                        "-m",
                        message,
                    ],
                ),
            )
            .await
            .map_err(PipelineError::CommitFailed)?;

        let commit = executor
            .run("git", &self.args(false, &["rev-parse", "HEAD"]))
            .await
            .map_err(PipelineError::CommitFailed)?;

        info!(commit = %commit, message, "changes committed");
        Ok(commit)
    }

    async fn push(&self, workspace: &Path, branch: &str) -> Result<(), PipelineError> {
        let push_failed = |source: CommandError| {
            if is_rejection(&source) {
                PipelineError::PushRejected {
                    branch: branch.to_string(),
                    message: source.stderr().unwrap_or_default().to_string(),
                }
            } else {
                PipelineError::PushFailed {
                    branch: branch.to_string(),
                    source,
                }
            }
        };

        let executor = self.executor(workspace).map_err(push_failed)?;
        let refspec = format!("HEAD:refs/heads/{}", branch);
        executor
            .run("git", &self.args(true, &["push", "origin", &refspec]))
            .await
            .map_err(push_failed)?;

        info!(branch, "pushed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command;
    use tempfile::TempDir;

    fn git_available() -> bool {
        Command::new("git").arg("--version").output().is_ok()
    }

    fn git(dir: &Path, args: &[&str]) -> String {
        let output = Command::new("git")
            .args(["-c", "user.name=Seed", "-c", "user.email=seed@example.com"])
            .args(["-c", "commit.gpgsign=false"])
            .args(args)
            .current_dir(dir)
            .output()
            .unwrap();
        assert!(
            output.status.success(),
            "git {:?} failed: {}",
            args,
            String::from_utf8_lossy(&output.stderr)
        );
        String::from_utf8_lossy(&output.stdout).trim().to_string()
    }

    /// Bare remote at `<root>/acme/site.git` with one commit on `main`
    fn seeded_remote(root: &Path) -> std::path::PathBuf {
        let bare = root.join("acme").join("site.git");
        std::fs::create_dir_all(&bare).unwrap();
        git(&bare, &["init", "--bare", "-q"]);

        let seed = root.join("seed");
        std::fs::create_dir_all(&seed).unwrap();
        git(&seed, &["init", "-q"]);
        std::fs::write(seed.join("README.md"), "seed\n").unwrap();
        git(&seed, &["add", "-A"]);
        git(&seed, &["commit", "-q", "-m", "seed"]);
        git(&seed, &["push", "-q", bare.to_str().unwrap(), "HEAD:refs/heads/main"]);
        bare
    }

    fn client(root: &Path) -> GitCli {
        GitCli::new(
            root.to_string_lossy().to_string(),
            GitCredentials::new("", ""),
            Some(Duration::from_secs(60)),
        )
    }

    fn author() -> CommitAuthor {
        CommitAuthor {
            name: "Mirror Bot".to_string(),
            email: "bot@example.com".to_string(),
        }
    }

    #[tokio::test]
    async fn test_clone_commit_push_round() {
        if !git_available() {
            return;
        }
        let root = TempDir::new().unwrap();
        let bare = seeded_remote(root.path());
        let repo = RepoIdentity::new("acme", "site");
        let git_cli = client(root.path());

        let workspace = root.path().join("work");
        std::fs::create_dir_all(&workspace).unwrap();
        git_cli.clone_branch(&repo, "main", &workspace).await.unwrap();
        assert!(workspace.join("README.md").exists());

        std::fs::write(workspace.join("package.json"), "{}\n").unwrap();
        let commit = git_cli
            .commit_all(&workspace, "Add v3.1.0", &author())
            .await
            .unwrap();
        assert_eq!(commit.len(), 40);

        git_cli.push(&workspace, "main").await.unwrap();

        let log = git(&bare, &["log", "-1", "--format=%s|%an|%ae", "main"]);
        assert_eq!(log, "Add v3.1.0|Mirror Bot|bot@example.com");
    }

    #[tokio::test]
    async fn test_clone_missing_branch_fails() {
        if !git_available() {
            return;
        }
        let root = TempDir::new().unwrap();
        seeded_remote(root.path());
        let workspace = root.path().join("work");
        std::fs::create_dir_all(&workspace).unwrap();

        let result = client(root.path())
            .clone_branch(&RepoIdentity::new("acme", "site"), "does-not-exist", &workspace)
            .await;

        assert!(matches!(result, Err(PipelineError::CloneFailed { .. })));
    }

    #[tokio::test]
    async fn test_diverged_push_is_rejected() {
        if !git_available() {
            return;
        }
        let root = TempDir::new().unwrap();
        seeded_remote(root.path());
        let repo = RepoIdentity::new("acme", "site");
        let git_cli = client(root.path());

        let first = root.path().join("first");
        let second = root.path().join("second");
        for dir in [&first, &second] {
            std::fs::create_dir_all(dir).unwrap();
            git_cli.clone_branch(&repo, "main", dir).await.unwrap();
        }

        std::fs::write(first.join("a.txt"), "a").unwrap();
        git_cli.commit_all(&first, "Add v1", &author()).await.unwrap();
        git_cli.push(&first, "main").await.unwrap();

        std::fs::write(second.join("b.txt"), "b").unwrap();
        git_cli.commit_all(&second, "Add v2", &author()).await.unwrap();
        let result = git_cli.push(&second, "main").await;

        match result {
            Err(error @ PipelineError::PushRejected { .. }) => assert!(error.halts_branch()),
            other => panic!("expected rejection, got {:?}", other),
        }
    }

    #[test]
    fn test_auth_args_carry_basic_header() {
        let git_cli = GitCli::new(
            "https://github.com",
            GitCredentials::new("user", "pass"),
            None,
        );
        let args = git_cli.auth_args();

        assert_eq!(args[0], "-c");
        assert_eq!(args[1], "http.extraHeader=Authorization: Basic dXNlcjpwYXNz");
        assert!(client(Path::new("/tmp")).auth_args().is_empty());
    }
}
