//! Scan orchestration: diff processing, detector fan-out, and the
//! substring-evidence gate that ties every reported finding back to a
//! line the pull request actually added.

use crate::config::GateConfig;
use crate::detectors::{
    Detection, Detector, EncodedPayloadDetector, ExecutableDetector, FileContext,
    HomoglyphDetector, Severity, SpaceHidingDetector, StaticAnalysisDetector,
};
use crate::diff::{process_diff, Addition};
use crate::error::GateError;
use crate::languages::language_for_filename;
use crate::scheduler::{ScanMode, Scheduler};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

/// One file out of a pull request, as fetched from the hosting platform.
/// `diff` and `full_content` are optional at this layer because the
/// upstream payload can omit them; the scanner treats absence as fatal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangedFile {
    pub filename: String,
    pub diff: Option<String>,
    pub full_content: Option<String>,
}

/// Everything a scan produced. `detections` gate the pull request;
/// `advisories` are informational comments that never block.
#[derive(Debug, Default, Serialize)]
pub struct ScanOutcome {
    pub detections: Vec<Detection>,
    pub advisories: Vec<Detection>,
}

impl ScanOutcome {
    pub fn is_clean(&self) -> bool {
        self.detections.is_empty()
    }
}

pub struct Scanner {
    scheduler: Scheduler,
    strict_mode: bool,
    full_findings: bool,
    one_liner_threshold: usize,
}

impl Scanner {
    pub fn new(config: &GateConfig) -> Self {
        let detectors: Vec<Arc<dyn Detector>> = vec![
            Arc::new(EncodedPayloadDetector),
            Arc::new(ExecutableDetector),
            Arc::new(SpaceHidingDetector),
            Arc::new(HomoglyphDetector),
            Arc::new(StaticAnalysisDetector::new(config)),
        ];
        Scanner::with_detectors(detectors, config)
    }

    /// Build a scanner over an explicit detector set.
    pub fn with_detectors(detectors: Vec<Arc<dyn Detector>>, config: &GateConfig) -> Self {
        Scanner {
            scheduler: Scheduler::new(detectors, config),
            strict_mode: config.strict_mode,
            full_findings: config.full_findings,
            one_liner_threshold: config.one_liner_threshold,
        }
    }

    /// Scan the changed files of one pull request, in upstream order.
    ///
    /// Files are processed sequentially so the first-detection
    /// short-circuit and the one-liner advisory cannot interleave into
    /// contradictory statuses. A file missing its diff or content fails
    /// the whole call.
    pub async fn run_scan(&self, changed_files: &[ChangedFile]) -> Result<ScanOutcome, GateError> {
        let mode = if self.full_findings {
            ScanMode::FullFindings
        } else {
            ScanMode::FirstDetection
        };
        let mut outcome = ScanOutcome::default();

        for file in changed_files {
            let diff = file
                .diff
                .as_deref()
                .ok_or(GateError::MissingField("diff"))?;
            let content = file
                .full_content
                .as_deref()
                .ok_or(GateError::MissingField("full_content"))?;

            let Some(language) = language_for_filename(&file.filename) else {
                debug!(file = %file.filename, "no known language, skipped");
                continue;
            };

            let additions = process_diff(diff, language);
            if additions.is_empty() {
                continue;
            }

            if let Some(long) = additions
                .iter()
                .find(|a| a.content.len() > self.one_liner_threshold)
            {
                info!(
                    file = %file.filename,
                    line = long.line_number,
                    "oversized addition line, file excluded from scanning"
                );
                if !self.strict_mode {
                    let mut advisory = Detection::new(
                        format!(
                            "Line {} has over {} characters and was skipped by the scan. \
                             Manual review is advised.",
                            long.line_number, self.one_liner_threshold
                        ),
                        Severity::Info,
                        long.line_number,
                    );
                    advisory.filename = Some(file.filename.clone());
                    outcome.advisories.push(advisory);
                }
                continue;
            }

            let ctx = FileContext {
                filename: file.filename.clone(),
                language: language.to_string(),
                full_findings: self.full_findings,
                strict_mode: self.strict_mode,
            };
            let raw = self.scheduler.run(content, &ctx, mode).await;

            for mut detection in raw {
                let evidence = match detection.evidence.take() {
                    Some(e) => e,
                    None => source_line(content, detection.line_number)
                        .trim()
                        .to_string(),
                };
                if evidence.is_empty() || !in_additions(&additions, &evidence) {
                    debug!(
                        file = %file.filename,
                        line = detection.line_number,
                        "finding dropped, evidence not part of the diff additions"
                    );
                    continue;
                }
                detection.evidence = Some(evidence);
                detection.filename = Some(file.filename.clone());
                outcome.detections.push(detection);
                if !self.full_findings {
                    return Ok(outcome);
                }
            }
        }
        Ok(outcome)
    }
}

fn in_additions(additions: &[Addition], evidence: &str) -> bool {
    additions.iter().any(|a| a.content.contains(evidence))
}

fn source_line(content: &str, line_number: usize) -> &str {
    content
        .lines()
        .nth(line_number.saturating_sub(1))
        .unwrap_or("")
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct EchoDetector {
        detections: Vec<Detection>,
    }

    #[async_trait]
    impl Detector for EchoDetector {
        fn name(&self) -> &'static str {
            "echo"
        }

        async fn scan(
            &self,
            _content: &str,
            _ctx: &FileContext,
        ) -> Result<Vec<Detection>, GateError> {
            Ok(self.detections.clone())
        }
    }

    fn changed_file(filename: &str, diff: &str, content: &str) -> ChangedFile {
        ChangedFile {
            filename: filename.into(),
            diff: Some(diff.into()),
            full_content: Some(content.into()),
        }
    }

    fn scanner_with(detections: Vec<Detection>, config: &GateConfig) -> Scanner {
        Scanner::with_detectors(vec![Arc::new(EchoDetector { detections })], config)
    }

    #[tokio::test]
    async fn evidence_in_an_addition_survives() {
        let diff = "@@ -0,0 +1,2 @@\n+import os\n+token = \"aGVsbG8gd29ybGQh\"\n";
        let content = "import os\ntoken = \"aGVsbG8gd29ybGQh\"\n";
        let detection = Detection::new("encoded payload", Severity::Warning, 2)
            .with_evidence("aGVsbG8gd29ybGQh");
        let scanner = scanner_with(vec![detection], &GateConfig::default());

        let outcome = scanner
            .run_scan(&[changed_file("app.py", diff, content)])
            .await
            .unwrap();
        assert_eq!(outcome.detections.len(), 1);
        assert_eq!(outcome.detections[0].filename.as_deref(), Some("app.py"));
        assert_eq!(
            outcome.detections[0].evidence.as_deref(),
            Some("aGVsbG8gd29ybGQh")
        );
    }

    #[tokio::test]
    async fn evidence_outside_the_additions_is_dropped() {
        // The suspicious text exists in the file but was not added by
        // this pull request.
        let diff = "@@ -9,0 +10,1 @@\n+print('hello')\n";
        let content = "legacy = \"c3VzcGljaW91cw==\"\nprint('hello')\n";
        let detection =
            Detection::new("encoded payload", Severity::Warning, 1).with_evidence("c3VzcGljaW91cw==");
        let scanner = scanner_with(vec![detection], &GateConfig::default());

        let outcome = scanner
            .run_scan(&[changed_file("app.py", diff, content)])
            .await
            .unwrap();
        assert!(outcome.is_clean());
    }

    #[tokio::test]
    async fn missing_evidence_falls_back_to_the_source_line() {
        let diff = "@@ -0,0 +1,1 @@\n+dangerous_call()\n";
        let content = "dangerous_call()\n";
        let detection = Detection::new("flagged by rules", Severity::Error, 1);
        let scanner = scanner_with(vec![detection], &GateConfig::default());

        let outcome = scanner
            .run_scan(&[changed_file("app.py", diff, content)])
            .await
            .unwrap();
        assert_eq!(outcome.detections.len(), 1);
        assert_eq!(
            outcome.detections[0].evidence.as_deref(),
            Some("dangerous_call()")
        );
    }

    #[tokio::test]
    async fn oversized_line_excludes_the_file_with_an_advisory() {
        let long_line = "x".repeat(600);
        let diff = format!("@@ -0,0 +1,1 @@\n+{long_line}\n");
        let detection = Detection::new("should never surface", Severity::Error, 1)
            .with_evidence(long_line.clone());
        let scanner = scanner_with(vec![detection], &GateConfig::default());

        let outcome = scanner
            .run_scan(&[changed_file("bundle.js", &diff, &long_line)])
            .await
            .unwrap();
        assert!(outcome.is_clean());
        assert_eq!(outcome.advisories.len(), 1);
        assert_eq!(outcome.advisories[0].severity, Severity::Info);
    }

    #[tokio::test]
    async fn strict_mode_suppresses_the_advisory() {
        let long_line = "x".repeat(600);
        let diff = format!("@@ -0,0 +1,1 @@\n+{long_line}\n");
        let mut config = GateConfig::default();
        config.strict_mode = true;
        let scanner = scanner_with(Vec::new(), &config);

        let outcome = scanner
            .run_scan(&[changed_file("bundle.js", &diff, &long_line)])
            .await
            .unwrap();
        assert!(outcome.is_clean());
        assert!(outcome.advisories.is_empty());
    }

    #[tokio::test]
    async fn unknown_extension_is_skipped() {
        let diff = "@@ -0,0 +1,1 @@\n+anything\n";
        let detection = Detection::new("noise", Severity::Error, 1).with_evidence("anything");
        let scanner = scanner_with(vec![detection], &GateConfig::default());

        let outcome = scanner
            .run_scan(&[changed_file("README.weird", diff, "anything\n")])
            .await
            .unwrap();
        assert!(outcome.is_clean());
    }

    #[tokio::test]
    async fn missing_diff_is_fatal() {
        let file = ChangedFile {
            filename: "app.py".into(),
            diff: None,
            full_content: Some("x = 1\n".into()),
        };
        let scanner = scanner_with(Vec::new(), &GateConfig::default());
        let err = scanner.run_scan(&[file]).await.unwrap_err();
        assert!(matches!(err, GateError::MissingField("diff")));
    }

    #[tokio::test]
    async fn first_detection_stops_at_the_first_file_that_reports() {
        let diff = "@@ -0,0 +1,1 @@\n+bad_call()\n";
        let detection = Detection::new("m", Severity::Error, 1).with_evidence("bad_call()");
        let scanner = scanner_with(vec![detection], &GateConfig::default());

        let files = vec![
            changed_file("a.py", diff, "bad_call()\n"),
            changed_file("b.py", diff, "bad_call()\n"),
        ];
        let outcome = scanner.run_scan(&files).await.unwrap();
        assert_eq!(outcome.detections.len(), 1);
        assert_eq!(outcome.detections[0].filename.as_deref(), Some("a.py"));
    }

    #[tokio::test]
    async fn full_findings_collects_across_files() {
        let diff = "@@ -0,0 +1,1 @@\n+bad_call()\n";
        let detection = Detection::new("m", Severity::Error, 1).with_evidence("bad_call()");
        let mut config = GateConfig::default();
        config.full_findings = true;
        let scanner = scanner_with(vec![detection], &config);

        let files = vec![
            changed_file("a.py", diff, "bad_call()\n"),
            changed_file("b.py", diff, "bad_call()\n"),
        ];
        let outcome = scanner.run_scan(&files).await.unwrap();
        assert_eq!(outcome.detections.len(), 2);
    }
}
