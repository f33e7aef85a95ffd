//! Decision layer: map a scan outcome onto a commit status and render
//! detections as review-comment markdown.

use crate::detectors::Detection;
use crate::scan::ScanOutcome;

/// Commit status states accepted by the statuses endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitState {
    Success,
    Pending,
    Failure,
    Error,
}

impl CommitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommitState::Success => "success",
            CommitState::Pending => "pending",
            CommitState::Failure => "failure",
            CommitState::Error => "error",
        }
    }
}

/// Status and description for one finished scan. A clean scan must
/// still post success, otherwise a required check never turns green.
pub fn determine_scan_status(outcome: &ScanOutcome) -> (CommitState, String) {
    if outcome.is_clean() {
        return (CommitState::Success, "No malicious code detected.".into());
    }
    let description = match outcome.detections.len() {
        1 => "1 suspicious change detected.".to_string(),
        n => format!("{n} suspicious changes detected."),
    };
    (CommitState::Failure, description)
}

/// Markdown body for the inline review comment on one detection.
pub fn comment_body(detection: &Detection) -> String {
    let mut body = format!(
        "**{}**: {}\n",
        detection.severity.symbol(),
        detection.message
    );
    if let Some(evidence) = &detection.evidence {
        body.push_str(&format!("\nFlagged content:\n```\n{evidence}\n```\n"));
    }
    if let Some(decoded) = &detection.decoded {
        body.push_str(&format!("\nDecodes to:\n```\n{decoded}\n```\n"));
    }
    body.push_str("\nIf this change is intentional and safe, a security reviewer can approve the pull request to release the check.");
    body
}
