//! GitHub REST client: release listings, artifact downloads, announcements

use crate::core::error::{FeedError, MirrorError, PipelineError};
use crate::core::traits::{
    Announcement, ArtifactSource, Release, ReleaseAnnouncer, ReleaseFeed, ReleaseInfo,
    RepoIdentity,
};
use crate::security::GitCredentials;
use async_trait::async_trait;
use reqwest::header::{ACCEPT, HeaderMap, HeaderValue};
use secrecy::ExposeSecret;
use std::path::Path;
use std::time::Duration;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

const USER_AGENT: &str = concat!("release-mirror/", env!("CARGO_PKG_VERSION"));
const GITHUB_MEDIA_TYPE: &str = "application/vnd.github+json";
const PAGE_SIZE: u32 = 100;

/// Client for the release endpoints of the GitHub API
pub struct GithubClient {
    client: reqwest::Client,
    api_url: String,
    credentials: GitCredentials,
}

impl GithubClient {
    pub fn new(
        api_url: impl Into<String>,
        credentials: GitCredentials,
        timeout: Option<Duration>,
    ) -> Result<Self, MirrorError> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static(GITHUB_MEDIA_TYPE));

        let mut builder = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .default_headers(headers);
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|e| MirrorError::ConfigError(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            api_url: api_url.into().trim_end_matches('/').to_string(),
            credentials,
        })
    }

    fn releases_url(&self, repo: &RepoIdentity) -> String {
        format!("{}/repos/{}/{}/releases", self.api_url, repo.owner, repo.name)
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        request.basic_auth(
            self.credentials.username(),
            Some(self.credentials.password().expose_secret()),
        )
    }

    /// Raw release list, newest first
    pub async fn list_releases(&self, repo: &RepoIdentity) -> Result<Vec<Release>, FeedError> {
        let url = self.releases_url(repo);
        debug!(%repo, %url, "fetching release list");

        let response = self
            .authorized(self.client.get(&url))
            .query(&[("per_page", PAGE_SIZE)])
            .send()
            .await
            .map_err(|e| FeedError::Transport {
                repo: repo.to_string(),
                message: self.credentials.mask_in(&e.to_string()),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FeedError::Status {
                repo: repo.to_string(),
                status: status.as_u16(),
            });
        }

        let body = response.text().await.map_err(|e| FeedError::Transport {
            repo: repo.to_string(),
            message: e.to_string(),
        })?;

        serde_json::from_str(&body).map_err(|e| FeedError::Parse {
            repo: repo.to_string(),
            message: e.to_string(),
        })
    }
}

#[async_trait]
impl ReleaseFeed for GithubClient {
    async fn fetch_releases(
        &self,
        repo: &RepoIdentity,
        name_prefix: &str,
    ) -> Result<Vec<ReleaseInfo>, FeedError> {
        let releases: Vec<ReleaseInfo> = self
            .list_releases(repo)
            .await?
            .iter()
            .filter(|release| release.matches_prefix(name_prefix))
            .map(Release::to_info)
            .collect();

        info!(%repo, prefix = name_prefix, count = releases.len(), "available releases");
        Ok(releases)
    }
}

#[async_trait]
impl ArtifactSource for GithubClient {
    async fn download(&self, url: &str, destination: &Path) -> Result<u64, PipelineError> {
        let failed = |message: String| PipelineError::DownloadFailed {
            url: url.to_string(),
            message,
        };

        let mut response = self
            .client
            .get(url)
            .header(ACCEPT, "application/octet-stream")
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| failed(e.to_string()))?;

        let mut file = File::create(destination)
            .await
            .map_err(|e| failed(format!("{}: {}", destination.display(), e)))?;

        let mut written = 0u64;
        while let Some(chunk) = response.chunk().await.map_err(|e| failed(e.to_string()))? {
            file.write_all(&chunk)
                .await
                .map_err(|e| failed(e.to_string()))?;
            written += chunk.len() as u64;
        }
        file.flush().await.map_err(|e| failed(e.to_string()))?;

        debug!(url, bytes = written, "artifact downloaded");
        Ok(written)
    }
}

#[async_trait]
impl ReleaseAnnouncer for GithubClient {
    async fn announce(
        &self,
        repo: &RepoIdentity,
        announcement: &Announcement,
    ) -> Result<(), PipelineError> {
        let failed = |message: String| PipelineError::AnnounceFailed {
            release: announcement.name.clone(),
            message,
        };

        let response = self
            .authorized(self.client.post(self.releases_url(repo)))
            .json(announcement)
            .send()
            .await
            .map_err(|e| failed(self.credentials.mask_in(&e.to_string())))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(failed(format!("HTTP {}: {}", status.as_u16(), body.trim())));
        }

        info!(%repo, release = %announcement.name, branch = %announcement.target_commitish, "release announced");
        Ok(())
    }
}
