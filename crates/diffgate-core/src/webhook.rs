//! Webhook event handling, transport-agnostic: the HTTP layer hands in
//! the event name, the signature header, and the raw body, and gets
//! back a status code plus message to answer with.

use crate::config::GateConfig;
use crate::error::GateError;
use crate::github::GithubClient;
use crate::notify::{comment_body, determine_scan_status, CommitState};
use crate::protection::{
    is_branch_included, is_branch_status_check_protected, merge_protection, ProtectedBranches,
};
use crate::scan::Scanner;
use crate::secrets::SecretStore;
use hmac::{Hmac, Mac};
use regex::Regex;
use serde::Deserialize;
use sha2::Sha256;
use std::sync::Arc;
use tracing::{error, info, warn};

const WEBHOOK_SECRET_KEY: &str = "WEBHOOK_SECRET";
const REVIEWERS_KEY: &str = "SECURITY_REVIEWERS";
const APP_ID_KEY: &str = "APP_ID";

const MAX_PR_NUMBER: u64 = 100_000;
const NAME_PATTERN: &str = r"^[\w$/_\-\[\].]{1,100}$";
const BRANCH_PATTERN: &str = r"^[\w$/_\-\[\].]{1,50}$";
const SHA_PATTERN: &str = r"^[0-9a-f]{40}$";

/// What the transport should answer with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookReply {
    pub status: u16,
    pub message: String,
}

impl WebhookReply {
    fn ok(message: impl Into<String>) -> Self {
        WebhookReply { status: 200, message: message.into() }
    }

    fn out_of_scope(message: impl Into<String>) -> Self {
        WebhookReply { status: 204, message: message.into() }
    }

    fn from_error(err: &GateError) -> Self {
        WebhookReply {
            status: err.http_status(),
            message: err.to_string(),
        }
    }
}

/// Produce the `X-Hub-Signature-256` header value for a body. Used by
/// delivery replay tooling and tests.
pub fn sign_body(secret: &[u8], body: &[u8]) -> Result<String, GateError> {
    let mut mac =
        Hmac::<Sha256>::new_from_slice(secret).map_err(|_| GateError::InvalidSignature)?;
    mac.update(body);
    Ok(format!("sha256={}", hex::encode(mac.finalize().into_bytes())))
}

/// Verify `X-Hub-Signature-256` over the raw body. The comparison is
/// constant time via the MAC's own verifier.
pub fn verify_signature(
    secret: &[u8],
    signature_header: Option<&str>,
    body: &[u8],
) -> Result<(), GateError> {
    let header = signature_header.ok_or(GateError::InvalidSignature)?;
    let hex_digest = header
        .strip_prefix("sha256=")
        .ok_or(GateError::InvalidSignature)?;
    let claimed = hex::decode(hex_digest).map_err(|_| GateError::InvalidSignature)?;

    let mut mac = Hmac::<Sha256>::new_from_slice(secret)
        .map_err(|_| GateError::InvalidSignature)?;
    mac.update(body);
    mac.verify_slice(&claimed)
        .map_err(|_| GateError::InvalidSignature)
}

#[derive(Debug, Deserialize)]
struct RepositoryPayload {
    full_name: String,
}

#[derive(Debug, Deserialize)]
struct BasePayload {
    #[serde(rename = "ref")]
    branch: String,
}

#[derive(Debug, Deserialize)]
struct HeadPayload {
    sha: String,
}

#[derive(Debug, Deserialize)]
struct PullRequestPayload {
    number: u64,
    head: HeadPayload,
    base: BasePayload,
}

#[derive(Debug, Deserialize)]
struct PullRequestEvent {
    action: String,
    pull_request: PullRequestPayload,
    repository: RepositoryPayload,
}

#[derive(Debug, Deserialize)]
struct ReviewUser {
    login: String,
}

#[derive(Debug, Deserialize)]
struct ReviewPayload {
    state: String,
    user: ReviewUser,
}

#[derive(Debug, Deserialize)]
struct ReviewEvent {
    action: String,
    review: ReviewPayload,
    pull_request: PullRequestPayload,
    repository: RepositoryPayload,
}

/// Validated identity of the pull request an event refers to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrEventInfo {
    pub repo: String,
    pub branch: String,
    pub number: u64,
    pub head_sha: String,
}

fn matches_pattern(pattern: &str, value: &str) -> bool {
    Regex::new(pattern)
        .map(|re| re.is_match(value))
        .unwrap_or(false)
}

fn validate_pr(
    repository: &RepositoryPayload,
    pr: &PullRequestPayload,
) -> Result<PrEventInfo, GateError> {
    if !matches_pattern(NAME_PATTERN, &repository.full_name) {
        return Err(GateError::InvalidPayload("repository name".into()));
    }
    if !matches_pattern(BRANCH_PATTERN, &pr.base.branch) {
        return Err(GateError::InvalidPayload("base branch".into()));
    }
    if !matches_pattern(SHA_PATTERN, &pr.head.sha) {
        return Err(GateError::InvalidPayload("head sha".into()));
    }
    if pr.number == 0 || pr.number > MAX_PR_NUMBER {
        return Err(GateError::InvalidPayload("pull request number".into()));
    }
    Ok(PrEventInfo {
        repo: repository.full_name.clone(),
        branch: pr.base.branch.clone(),
        number: pr.number,
        head_sha: pr.head.sha.clone(),
    })
}

/// Parse a `pull_request` delivery. `Ok(None)` means the action is not
/// one the gate scans.
pub fn parse_pr_event(body: &[u8]) -> Result<Option<PrEventInfo>, GateError> {
    let event: PullRequestEvent =
        serde_json::from_slice(body).map_err(|e| GateError::InvalidPayload(e.to_string()))?;
    if !matches!(event.action.as_str(), "opened" | "reopened" | "synchronize") {
        return Ok(None);
    }
    validate_pr(&event.repository, &event.pull_request).map(Some)
}

/// Parse a `pull_request_review` delivery into (pr, reviewer, state).
pub fn parse_review_event(body: &[u8]) -> Result<Option<(PrEventInfo, String)>, GateError> {
    let event: ReviewEvent =
        serde_json::from_slice(body).map_err(|e| GateError::InvalidPayload(e.to_string()))?;
    if event.action != "submitted" || event.review.state != "approved" {
        return Ok(None);
    }
    let info = validate_pr(&event.repository, &event.pull_request)?;
    Ok(Some((info, event.review.user.login)))
}

/// Split a reviewer list into (individuals, teams). Team entries carry
/// a `team:` prefix.
fn split_reviewers(raw: &str) -> (Vec<String>, Vec<String>) {
    let mut individuals = Vec::new();
    let mut teams = Vec::new();
    for entry in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        match entry.strip_prefix("team:") {
            Some(team) => teams.push(team.to_string()),
            None => individuals.push(entry.to_string()),
        }
    }
    (individuals, teams)
}

pub struct WebhookService {
    config: GateConfig,
    store: Arc<dyn SecretStore>,
    github: GithubClient,
    scanner: Scanner,
}

impl WebhookService {
    pub fn new(
        config: GateConfig,
        store: Arc<dyn SecretStore>,
        github: GithubClient,
        scanner: Scanner,
    ) -> Self {
        WebhookService { config, store, github, scanner }
    }

    /// Liveness probe the transport maps onto `GET /health`.
    pub fn health() -> WebhookReply {
        WebhookReply { status: 200, message: String::new() }
    }

    /// Handle one delivery. Signature verification happens before any
    /// payload parsing; unrecognized event types are accepted and
    /// ignored.
    pub async fn handle_event(
        &self,
        event_type: &str,
        signature: Option<&str>,
        body: &[u8],
    ) -> WebhookReply {
        let secret = match self.store.get_secret(WEBHOOK_SECRET_KEY) {
            Ok(secret) => secret,
            Err(e) => {
                error!(error = %e, "webhook secret unavailable");
                return WebhookReply::from_error(&e);
            }
        };
        if let Err(e) = verify_signature(secret.as_bytes(), signature, body) {
            warn!(event_type, "delivery rejected, bad signature");
            return WebhookReply::from_error(&e);
        }

        let result = match event_type {
            "pull_request" => self.on_pull_request(body).await,
            "pull_request_review" => self.on_pull_request_review(body).await,
            other => {
                info!(event_type = other, "event type ignored");
                Ok(WebhookReply::ok("event ignored"))
            }
        };
        result.unwrap_or_else(|e| {
            error!(event_type, error = %e, "delivery handling failed");
            WebhookReply::from_error(&e)
        })
    }

    async fn on_pull_request(&self, body: &[u8]) -> Result<WebhookReply, GateError> {
        let Some(pr) = parse_pr_event(body)? else {
            return Ok(WebhookReply::ok("action ignored"));
        };
        if !is_branch_included(self.store.as_ref(), &pr.repo, &pr.branch)? {
            info!(repo = %pr.repo, branch = %pr.branch, "branch out of scope");
            return Ok(WebhookReply::out_of_scope("branch not monitored"));
        }

        info!(repo = %pr.repo, pr = pr.number, sha = %pr.head_sha, "scanning pull request");
        self.github.wait_for_rate_limit().await?;
        let files = self
            .github
            .get_changed_files(&pr.repo, pr.number, &pr.head_sha)
            .await?;
        let outcome = self.scanner.run_scan(&files).await?;

        let (state, description) = determine_scan_status(&outcome);
        self.github
            .create_commit_status(
                &pr.repo,
                &pr.head_sha,
                state.as_str(),
                &description,
                &self.config.scan_context,
                Some(self.config.app_url.as_str()),
            )
            .await?;

        for detection in &outcome.detections {
            if let Some(path) = &detection.filename {
                self.github
                    .create_review_comment(
                        &pr.repo,
                        pr.number,
                        &pr.head_sha,
                        path,
                        detection.line_number,
                        &comment_body(detection),
                    )
                    .await?;
            }
        }
        for advisory in &outcome.advisories {
            self.github
                .create_issue_comment(&pr.repo, pr.number, &advisory.message)
                .await?;
        }

        if state == CommitState::Failure {
            self.request_security_review(&pr).await?;
        }
        if self.config.block_pr {
            self.ensure_branch_protected(&pr).await?;
        }

        Ok(WebhookReply::ok(description))
    }

    async fn on_pull_request_review(&self, body: &[u8]) -> Result<WebhookReply, GateError> {
        let Some((pr, reviewer)) = parse_review_event(body)? else {
            return Ok(WebhookReply::ok("review ignored"));
        };
        let (individuals, _) = self.configured_reviewers()?;
        if !individuals.iter().any(|r| r == &reviewer) {
            info!(reviewer, "approval from a non-security reviewer, ignored");
            return Ok(WebhookReply::ok("review ignored"));
        }

        self.github
            .create_commit_status(
                &pr.repo,
                &pr.head_sha,
                CommitState::Success.as_str(),
                &format!("Approved by security reviewer {reviewer}."),
                &self.config.scan_context,
                Some(self.config.app_url.as_str()),
            )
            .await?;
        Ok(WebhookReply::ok("check released by security review"))
    }

    fn configured_reviewers(&self) -> Result<(Vec<String>, Vec<String>), GateError> {
        match self.store.get_secret(REVIEWERS_KEY) {
            Ok(raw) => Ok(split_reviewers(&raw)),
            Err(GateError::SecretLookup(_)) => Ok((Vec::new(), Vec::new())),
            Err(e) => Err(e),
        }
    }

    async fn request_security_review(&self, pr: &PrEventInfo) -> Result<(), GateError> {
        let (individuals, teams) = self.configured_reviewers()?;
        self.github
            .create_review_request(&pr.repo, pr.number, &individuals, &teams)
            .await
    }

    /// Install the gate's required check once per (repo, branch).
    async fn ensure_branch_protected(&self, pr: &PrEventInfo) -> Result<(), GateError> {
        let mut registry = ProtectedBranches::load(self.store.as_ref())?;
        if registry.contains(&pr.repo, &pr.branch) {
            return Ok(());
        }

        let existing = self
            .github
            .get_branch_protection(&pr.repo, &pr.branch)
            .await?;
        if is_branch_status_check_protected(existing.as_ref(), &self.config.scan_context) {
            registry.update(self.store.as_ref(), &pr.repo, &pr.branch)?;
            return Ok(());
        }

        let app_id = self
            .store
            .get_secret(APP_ID_KEY)
            .ok()
            .and_then(|raw| raw.trim().parse::<i64>().ok());
        match merge_protection(existing.as_ref(), &self.config.scan_context, app_id) {
            Some(update) => {
                self.github
                    .put_branch_protection(&pr.repo, &pr.branch, &update)
                    .await?;
            }
            None => {
                // Strict rule with existing checks: installing ours would
                // block every merge. Remember the branch so we stop
                // re-evaluating it.
                warn!(repo = %pr.repo, branch = %pr.branch, "protection merge skipped");
            }
        }
        registry.update(self.store.as_ref(), &pr.repo, &pr.branch)?;
        Ok(())
    }
}
