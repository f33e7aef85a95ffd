//! Adapter around the external pattern-matching engine. Content is
//! materialized into a transient file carrying the language's canonical
//! extension, the engine runs against a git-synced rule set (bundled
//! offline copy when syncing fails), and its newline-delimited JSON output
//! is mapped onto the common detection shape.

use crate::config::GateConfig;
use crate::detectors::{Detection, Detector, FileContext, Severity};
use crate::error::GateError;
use crate::languages::canonical_extension;
use async_trait::async_trait;
use serde::Deserialize;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{info, warn};

/// One finding in the engine's JSON stream.
#[derive(Debug, Deserialize)]
struct EngineFinding {
    extra: EngineExtra,
    start: EngineStart,
}

#[derive(Debug, Deserialize)]
struct EngineExtra {
    message: String,
    severity: String,
}

#[derive(Debug, Deserialize)]
struct EngineStart {
    line: usize,
}

pub struct StaticAnalysisDetector {
    engine: String,
    ruleset_repo: String,
    ruleset_dir: PathBuf,
    offline_ruleset_dir: PathBuf,
}

impl StaticAnalysisDetector {
    pub fn new(config: &GateConfig) -> Self {
        StaticAnalysisDetector {
            engine: config.engine.clone(),
            ruleset_repo: config.ruleset_repo.clone(),
            ruleset_dir: config.ruleset_dir.clone(),
            offline_ruleset_dir: config.offline_ruleset_dir.clone(),
        }
    }

    /// Sync the rule set checkout, falling back to the bundled offline
    /// copy on any failure. One attempt, terminal fallback, no retries.
    async fn resolve_ruleset_dir(&self) -> PathBuf {
        match self.sync_ruleset().await {
            Ok(()) => self.ruleset_dir.clone(),
            Err(e) => {
                warn!(error = %e, "rule set sync failed, using offline copy");
                self.offline_ruleset_dir.clone()
            }
        }
    }

    async fn sync_ruleset(&self) -> Result<(), GateError> {
        if !self.ruleset_dir.exists() {
            run_git(
                &["clone", "--depth", "1", &self.ruleset_repo],
                self.ruleset_dir.parent().unwrap_or(Path::new(".")),
                Some(&self.ruleset_dir),
            )
            .await?;
            info!(repo = %self.ruleset_repo, "cloned rule set");
            return Ok(());
        }

        run_git(&["fetch", "origin"], &self.ruleset_dir, None).await?;
        let behind = git_stdout(
            &["rev-list", "--count", "HEAD..origin/main"],
            &self.ruleset_dir,
        )
        .await?;
        if behind.trim().parse::<u64>().unwrap_or(0) > 0 {
            run_git(&["pull", "origin", "main"], &self.ruleset_dir, None).await?;
            info!(repo = %self.ruleset_repo, "pulled rule set updates");
        }
        Ok(())
    }

    /// Run the engine over `content` and stream findings back.
    ///
    /// `first_match` terminates the engine after its first finding.
    /// The transient file is removed on every exit path.
    async fn run_engine(
        &self,
        content: &str,
        extension: &str,
        strict: bool,
        first_match: bool,
    ) -> Result<Vec<Detection>, GateError> {
        let ruleset = self.resolve_ruleset_dir().await;

        // NamedTempFile unlinks on drop, which covers early returns and
        // error paths alike.
        let mut temp = tempfile::Builder::new()
            .prefix("diffgate-")
            .suffix(&format!(".{extension}"))
            .tempfile()?;
        temp.write_all(content.as_bytes())?;
        temp.flush()?;

        let mut cmd = Command::new(&self.engine);
        cmd.arg("--config")
            .arg(&ruleset)
            .arg("--metrics")
            .arg("off");
        if strict {
            cmd.arg("--severity").arg("error");
        }
        cmd.arg("--json").arg(temp.path());
        cmd.stdout(Stdio::piped()).stderr(Stdio::null());

        let mut child = cmd
            .spawn()
            .map_err(|e| GateError::Engine(format!("failed to spawn {}: {e}", self.engine)))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| GateError::Engine("engine stdout unavailable".into()))?;

        let mut lines = BufReader::new(stdout).lines();
        let mut detections = Vec::new();
        while let Some(line) = lines
            .next_line()
            .await
            .map_err(|e| GateError::Engine(format!("engine stream error: {e}")))?
        {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let finding: EngineFinding = serde_json::from_str(line)
                .map_err(|e| GateError::Engine(format!("unparsable engine output: {e}")))?;
            detections.push(map_finding(finding));
            if first_match {
                // Best-effort early termination; the temp file still gets
                // cleaned up by the guard below.
                let _ = child.start_kill();
                let _ = child.wait().await;
                return Ok(detections);
            }
        }

        let status = child
            .wait()
            .await
            .map_err(|e| GateError::Engine(format!("engine wait failed: {e}")))?;
        // Exit code 1 conventionally means "findings present".
        if !status.success() && status.code() != Some(1) {
            return Err(GateError::Engine(format!(
                "{} exited with {status}",
                self.engine
            )));
        }
        Ok(detections)
    }
}

#[async_trait]
impl Detector for StaticAnalysisDetector {
    fn name(&self) -> &'static str {
        "static-analysis"
    }

    async fn scan(&self, content: &str, ctx: &FileContext) -> Result<Vec<Detection>, GateError> {
        let Some(extension) = canonical_extension(&ctx.language) else {
            return Ok(Vec::new());
        };
        self.run_engine(content, extension, ctx.strict_mode, !ctx.full_findings)
            .await
    }
}

fn map_finding(finding: EngineFinding) -> Detection {
    Detection::new(
        finding.extra.message,
        Severity::parse(&finding.extra.severity),
        finding.start.line,
    )
}

async fn run_git(args: &[&str], cwd: &Path, target: Option<&Path>) -> Result<(), GateError> {
    let mut cmd = Command::new("git");
    cmd.args(args);
    if let Some(target) = target {
        cmd.arg(target);
    }
    cmd.current_dir(cwd)
        .stdout(Stdio::null())
        .stderr(Stdio::null());
    let status = cmd
        .status()
        .await
        .map_err(|e| GateError::Engine(format!("git unavailable: {e}")))?;
    if !status.success() {
        return Err(GateError::Engine(format!("git {} failed", args[0])));
    }
    Ok(())
}

async fn git_stdout(args: &[&str], cwd: &Path) -> Result<String, GateError> {
    let output = Command::new("git")
        .args(args)
        .current_dir(cwd)
        .stderr(Stdio::null())
        .output()
        .await
        .map_err(|e| GateError::Engine(format!("git unavailable: {e}")))?;
    if !output.status.success() {
        return Err(GateError::Engine(format!("git {} failed", args[0])));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}
