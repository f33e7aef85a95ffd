//! Content detectors. Each one is a pure analyzer over full file content:
//! no shared state, so the scheduler can run any number of them over the
//! same input concurrently.

pub mod encoded;
pub mod engine;
pub mod executable;
pub mod homoglyph;
pub mod space_hiding;

use crate::error::GateError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use encoded::EncodedPayloadDetector;
pub use engine::StaticAnalysisDetector;
pub use executable::ExecutableDetector;
pub use homoglyph::HomoglyphDetector;
pub use space_hiding::SpaceHidingDetector;

/// Severity of a detection, ordered so `Error` ranks highest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl Severity {
    pub fn symbol(&self) -> &'static str {
        match self {
            Severity::Error => "ERROR",
            Severity::Warning => "WARNING",
            Severity::Info => "INFO",
        }
    }

    /// Parse an engine-reported severity string; unknown values are
    /// treated as warnings rather than dropped.
    pub fn parse(s: &str) -> Severity {
        match s.to_ascii_uppercase().as_str() {
            "ERROR" => Severity::Error,
            "INFO" => Severity::Info,
            _ => Severity::Warning,
        }
    }
}

/// One suspicious finding. Created by a detector; the orchestrator
/// enriches it with `filename` and normalized `evidence` before it becomes
/// part of a scan result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Detection {
    pub message: String,
    pub severity: Severity,
    pub line_number: usize,
    /// Evidence substring tying the finding to the diff.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evidence: Option<String>,
    /// Decoded form of an encoded payload, when one exists.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decoded: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
}

impl Detection {
    pub fn new(message: impl Into<String>, severity: Severity, line_number: usize) -> Self {
        Detection {
            message: message.into(),
            severity,
            line_number,
            evidence: None,
            decoded: None,
            filename: None,
        }
    }

    pub fn with_evidence(mut self, evidence: impl Into<String>) -> Self {
        self.evidence = Some(evidence.into());
        self
    }

    pub fn with_decoded(mut self, decoded: impl Into<String>) -> Self {
        self.decoded = Some(decoded.into());
        self
    }
}

/// Per-file context handed to every detector.
#[derive(Debug, Clone)]
pub struct FileContext {
    pub filename: String,
    pub language: String,
    /// Collect every finding instead of stopping at the first.
    pub full_findings: bool,
    /// Restrict reporting to high-confidence findings.
    pub strict_mode: bool,
}

/// The common detector capability: content in, findings out.
#[async_trait]
pub trait Detector: Send + Sync {
    fn name(&self) -> &'static str;

    /// Detectors that can only ever produce WARNING findings. The
    /// scheduler skips these at submission time under strict mode.
    fn warning_only(&self) -> bool {
        false
    }

    async fn scan(&self, content: &str, ctx: &FileContext) -> Result<Vec<Detection>, GateError>;
}

/// 1-based line number of the byte offset within `content`.
pub(crate) fn line_of_offset(content: &str, offset: usize) -> usize {
    content[..offset.min(content.len())]
        .bytes()
        .filter(|&b| b == b'\n')
        .count()
        + 1
}
