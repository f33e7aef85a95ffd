//! GitHub REST surface the gate talks to. Authentication tokens are
//! minted elsewhere and injected at construction.

use crate::error::GateError;
use crate::protection::{BranchProtection, ProtectionUpdate};
use crate::scan::ChangedFile;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, USER_AGENT};
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Quota floor below which the client sleeps until the window resets.
const RATE_LIMIT_FLOOR: u64 = 5;

/// Page size for list endpoints.
const PER_PAGE: usize = 100;

pub struct GithubClient {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct PullFileEntry {
    filename: String,
    patch: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ContentsResponse {
    content: String,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct RateWindow {
    pub remaining: u64,
    pub reset: i64,
}

#[derive(Debug, Deserialize)]
struct RateLimitResponse {
    resources: RateResources,
}

#[derive(Debug, Deserialize)]
struct RateResources {
    core: RateWindow,
}

impl GithubClient {
    pub fn new(token: &str) -> Result<Self, GateError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/vnd.github+json"),
        );
        headers.insert(USER_AGENT, HeaderValue::from_static("diffgate/0.4.0"));
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|_| GateError::Config("token is not a valid header value".into()))?,
        );

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            base_url: "https://api.github.com".to_string(),
        })
    }

    /// Point the client at a different API root. Tests use this against
    /// a local stub server.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// List a pull request's files and fetch each one's full content at
    /// the head sha. Files without a textual patch (binaries, renames)
    /// and empty-file patches are skipped.
    ///
    /// The files listing is paged; every page is fetched so a large pull
    /// request cannot smuggle files past the scan.
    pub async fn get_changed_files(
        &self,
        repo: &str,
        pr_number: u64,
        head_sha: &str,
    ) -> Result<Vec<ChangedFile>, GateError> {
        let url = format!("{}/repos/{}/pulls/{}/files", self.base_url, repo, pr_number);

        let mut entries: Vec<PullFileEntry> = Vec::new();
        let mut page = 1;
        loop {
            let batch: Vec<PullFileEntry> = self
                .client
                .get(&url)
                .query(&[
                    ("per_page", PER_PAGE.to_string()),
                    ("page", page.to_string()),
                ])
                .send()
                .await?
                .error_for_status()?
                .json()
                .await?;

            let batch_len = batch.len();
            entries.extend(batch);
            if batch_len < PER_PAGE {
                break;
            }
            page += 1;
        }

        let mut files = Vec::new();
        for entry in entries {
            let Some(patch) = entry.patch else {
                debug!(file = %entry.filename, "no textual patch, skipped");
                continue;
            };
            if patch.starts_with("@@ -0,0 +0,0") {
                debug!(file = %entry.filename, "empty-file patch, skipped");
                continue;
            }
            let full_content = self.fetch_content(repo, &entry.filename, head_sha).await?;
            files.push(ChangedFile {
                filename: entry.filename,
                diff: Some(patch),
                full_content: Some(full_content),
            });
        }
        Ok(files)
    }

    async fn fetch_content(&self, repo: &str, path: &str, sha: &str) -> Result<String, GateError> {
        let url = format!("{}/repos/{}/contents/{}", self.base_url, repo, path);
        let response: ContentsResponse = self
            .client
            .get(&url)
            .query(&[("ref", sha)])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        // Contents arrive base64 encoded with embedded newlines.
        let cleaned: String = response
            .content
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect();
        let bytes = BASE64.decode(cleaned.as_bytes()).map_err(|_| {
            GateError::ApiStatus {
                status: 502,
                endpoint: format!("contents/{path}"),
            }
        })?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    pub async fn create_commit_status(
        &self,
        repo: &str,
        sha: &str,
        state: &str,
        description: &str,
        context: &str,
        target_url: Option<&str>,
    ) -> Result<(), GateError> {
        let url = format!("{}/repos/{}/statuses/{}", self.base_url, repo, sha);
        let mut body = json!({
            "state": state,
            "description": description,
            "context": context,
        });
        if let Some(target) = target_url {
            body["target_url"] = json!(target);
        }
        self.client
            .post(&url)
            .json(&body)
            .send()
            .await?
            .error_for_status()?;
        info!(repo, sha, state, "commit status posted");
        Ok(())
    }

    /// Inline review comment anchored to one line of the diff.
    pub async fn create_review_comment(
        &self,
        repo: &str,
        pr_number: u64,
        sha: &str,
        path: &str,
        line: usize,
        body: &str,
    ) -> Result<(), GateError> {
        let url = format!(
            "{}/repos/{}/pulls/{}/comments",
            self.base_url, repo, pr_number
        );
        self.client
            .post(&url)
            .json(&json!({
                "body": body,
                "commit_id": sha,
                "path": path,
                "line": line,
                "side": "RIGHT",
            }))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    /// Plain conversation comment, used for advisories that are not
    /// tied to a reviewable diff line.
    pub async fn create_issue_comment(
        &self,
        repo: &str,
        pr_number: u64,
        body: &str,
    ) -> Result<(), GateError> {
        let url = format!(
            "{}/repos/{}/issues/{}/comments",
            self.base_url, repo, pr_number
        );
        self.client
            .post(&url)
            .json(&json!({ "body": body }))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    pub async fn create_review_request(
        &self,
        repo: &str,
        pr_number: u64,
        reviewers: &[String],
        team_reviewers: &[String],
    ) -> Result<(), GateError> {
        if reviewers.is_empty() && team_reviewers.is_empty() {
            return Ok(());
        }
        let url = format!(
            "{}/repos/{}/pulls/{}/requested_reviewers",
            self.base_url, repo, pr_number
        );
        self.client
            .post(&url)
            .json(&json!({
                "reviewers": reviewers,
                "team_reviewers": team_reviewers,
            }))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    /// Current protection rule, or `None` when the branch carries none.
    pub async fn get_branch_protection(
        &self,
        repo: &str,
        branch: &str,
    ) -> Result<Option<BranchProtection>, GateError> {
        let url = format!(
            "{}/repos/{}/branches/{}/protection",
            self.base_url, repo, branch
        );
        let response = self.client.get(&url).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(GateError::ApiStatus {
                status: response.status().as_u16(),
                endpoint: format!("branches/{branch}/protection"),
            });
        }
        Ok(Some(response.json().await?))
    }

    pub async fn put_branch_protection(
        &self,
        repo: &str,
        branch: &str,
        update: &ProtectionUpdate,
    ) -> Result<(), GateError> {
        let url = format!(
            "{}/repos/{}/branches/{}/protection",
            self.base_url, repo, branch
        );
        let response = self.client.put(&url).json(update).send().await?;
        if !response.status().is_success() {
            return Err(GateError::ApiStatus {
                status: response.status().as_u16(),
                endpoint: format!("branches/{branch}/protection"),
            });
        }
        info!(repo, branch, "branch protection updated");
        Ok(())
    }

    pub async fn rate_limit(&self) -> Result<RateWindow, GateError> {
        let url = format!("{}/rate_limit", self.base_url);
        let response: RateLimitResponse = self
            .client
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(response.resources.core)
    }

    /// Pre-empt quota exhaustion: when the remaining core quota is
    /// nearly gone, sleep until the window resets instead of letting a
    /// mid-scan request fail.
    pub async fn wait_for_rate_limit(&self) -> Result<(), GateError> {
        let window = self.rate_limit().await?;
        if window.remaining >= RATE_LIMIT_FLOOR {
            return Ok(());
        }
        let now = chrono::Utc::now().timestamp();
        let wait = (window.reset - now).max(0) as u64 + 1;
        warn!(
            remaining = window.remaining,
            wait_secs = wait,
            "rate limit nearly exhausted, sleeping until reset"
        );
        tokio::time::sleep(Duration::from_secs(wait)).await;
        Ok(())
    }
}
