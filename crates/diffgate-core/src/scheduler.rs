//! Concurrent detector execution. Every detector sees the same file
//! content; a semaphore caps how many run at once and a per-detector
//! timeout keeps one slow analyzer from stalling the whole scan.

use crate::config::GateConfig;
use crate::detectors::{Detection, Detector, FileContext};
use futures::stream::{FuturesUnordered, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

/// Whether a scan stops at the first finding or gathers everything.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanMode {
    FirstDetection,
    FullFindings,
}

pub struct Scheduler {
    detectors: Vec<Arc<dyn Detector>>,
    workers: usize,
    detector_timeout: Duration,
}

impl Scheduler {
    pub fn new(detectors: Vec<Arc<dyn Detector>>, config: &GateConfig) -> Self {
        let workers = config.workers.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4)
        });
        Scheduler {
            detectors,
            workers,
            detector_timeout: Duration::from_secs(config.detector_timeout_secs),
        }
    }

    /// Run every applicable detector over `content`.
    ///
    /// Detector errors and timeouts degrade to an empty result for that
    /// detector; one broken analyzer must not fail the gate closed on
    /// every pull request. In `FirstDetection` mode the remaining
    /// detectors are cancelled as soon as one reports.
    pub async fn run(&self, content: &str, ctx: &FileContext, mode: ScanMode) -> Vec<Detection> {
        let semaphore = Semaphore::new(self.workers);

        let mut tasks: FuturesUnordered<_> = self
            .detectors
            .iter()
            .filter(|detector| {
                if ctx.strict_mode && detector.warning_only() {
                    debug!(detector = detector.name(), "skipped under strict mode");
                    return false;
                }
                true
            })
            .map(|detector| {
                let semaphore = &semaphore;
                async move {
                    let _permit = semaphore.acquire().await;
                    let outcome =
                        tokio::time::timeout(self.detector_timeout, detector.scan(content, ctx))
                            .await;
                    (detector.name(), outcome)
                }
            })
            .collect();

        let mut all = Vec::new();
        while let Some((name, outcome)) = tasks.next().await {
            let found = match outcome {
                Ok(Ok(found)) => found,
                Ok(Err(e)) => {
                    warn!(detector = name, error = %e, "detector failed");
                    continue;
                }
                Err(_) => {
                    warn!(
                        detector = name,
                        timeout_secs = self.detector_timeout.as_secs(),
                        "detector timed out"
                    );
                    continue;
                }
            };
            if found.is_empty() {
                continue;
            }
            debug!(detector = name, findings = found.len(), "detector reported");
            all.extend(found);
            if mode == ScanMode::FirstDetection {
                // Dropping the set cancels the detectors still in flight.
                break;
            }
        }
        all
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detectors::Severity;
    use crate::error::GateError;
    use async_trait::async_trait;

    struct FixedDetector {
        label: &'static str,
        warning_only: bool,
        findings: usize,
        delay_ms: u64,
    }

    #[async_trait]
    impl Detector for FixedDetector {
        fn name(&self) -> &'static str {
            self.label
        }

        fn warning_only(&self) -> bool {
            self.warning_only
        }

        async fn scan(
            &self,
            _content: &str,
            _ctx: &FileContext,
        ) -> Result<Vec<Detection>, GateError> {
            if self.delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
            }
            Ok((0..self.findings)
                .map(|i| Detection::new(format!("{} finding", self.label), Severity::Error, i + 1))
                .collect())
        }
    }

    struct FailingDetector;

    #[async_trait]
    impl Detector for FailingDetector {
        fn name(&self) -> &'static str {
            "failing"
        }

        async fn scan(
            &self,
            _content: &str,
            _ctx: &FileContext,
        ) -> Result<Vec<Detection>, GateError> {
            Err(GateError::Engine("boom".into()))
        }
    }

    fn ctx(strict: bool, full: bool) -> FileContext {
        FileContext {
            filename: "main.py".into(),
            language: "Python".into(),
            full_findings: full,
            strict_mode: strict,
        }
    }

    fn scheduler(detectors: Vec<Arc<dyn Detector>>) -> Scheduler {
        Scheduler::new(detectors, &GateConfig::default())
    }

    #[tokio::test]
    async fn gathers_findings_from_every_detector() {
        let s = scheduler(vec![
            Arc::new(FixedDetector { label: "a", warning_only: false, findings: 2, delay_ms: 0 }),
            Arc::new(FixedDetector { label: "b", warning_only: false, findings: 1, delay_ms: 0 }),
        ]);
        let found = s.run("x", &ctx(false, true), ScanMode::FullFindings).await;
        assert_eq!(found.len(), 3);
    }

    #[tokio::test]
    async fn first_detection_stops_after_one_report() {
        let s = scheduler(vec![
            Arc::new(FixedDetector { label: "fast", warning_only: false, findings: 1, delay_ms: 0 }),
            Arc::new(FixedDetector { label: "slow", warning_only: false, findings: 5, delay_ms: 500 }),
        ]);
        let found = s.run("x", &ctx(false, false), ScanMode::FirstDetection).await;
        assert_eq!(found.len(), 1);
        assert!(found[0].message.starts_with("fast"));
    }

    #[tokio::test]
    async fn strict_mode_skips_warning_only_detectors() {
        let s = scheduler(vec![
            Arc::new(FixedDetector { label: "advisory", warning_only: true, findings: 3, delay_ms: 0 }),
            Arc::new(FixedDetector { label: "hard", warning_only: false, findings: 1, delay_ms: 0 }),
        ]);
        let found = s.run("x", &ctx(true, true), ScanMode::FullFindings).await;
        assert_eq!(found.len(), 1);
        assert!(found[0].message.starts_with("hard"));
    }

    #[tokio::test]
    async fn detector_error_does_not_poison_the_scan() {
        let s = scheduler(vec![
            Arc::new(FailingDetector),
            Arc::new(FixedDetector { label: "ok", warning_only: false, findings: 1, delay_ms: 0 }),
        ]);
        let found = s.run("x", &ctx(false, true), ScanMode::FullFindings).await;
        assert_eq!(found.len(), 1);
    }

    #[tokio::test]
    async fn timed_out_detector_reports_nothing() {
        let mut config = GateConfig::default();
        config.detector_timeout_secs = 1;
        let s = Scheduler::new(
            vec![
                Arc::new(FixedDetector { label: "stuck", warning_only: false, findings: 9, delay_ms: 2_000 }),
                Arc::new(FixedDetector { label: "ok", warning_only: false, findings: 1, delay_ms: 0 }),
            ],
            &config,
        );
        let found = s.run("x", &ctx(false, true), ScanMode::FullFindings).await;
        assert_eq!(found.len(), 1);
        assert!(found[0].message.starts_with("ok"));
    }
}
