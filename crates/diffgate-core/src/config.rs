use crate::error::GateError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Gate configuration, loaded from `diffgate.toml`.
///
/// Every field has a default so an empty file (or no file at all) yields a
/// working configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateConfig {
    /// Status-check context the gate reports under.
    #[serde(default = "default_scan_context")]
    pub scan_context: String,

    /// Landing page linked from commit statuses and comments.
    #[serde(default = "default_app_url")]
    pub app_url: String,

    /// Only report high-confidence (ERROR) findings.
    #[serde(default)]
    pub strict_mode: bool,

    /// Report every surviving finding instead of stopping at the first.
    #[serde(default)]
    pub full_findings: bool,

    /// Apply branch protection so merges wait for the gate's check.
    #[serde(default = "default_true")]
    pub block_pr: bool,

    /// Additions longer than this are treated as minified/generated code
    /// and exclude the whole file from scanning.
    #[serde(default = "default_one_liner_threshold")]
    pub one_liner_threshold: usize,

    /// Per-detector timeout, in seconds.
    #[serde(default = "default_detector_timeout")]
    pub detector_timeout_secs: u64,

    /// Worker count for the detection scheduler. Defaults to CPU cores.
    #[serde(default)]
    pub workers: Option<usize>,

    /// App-auth JWT lifetime. Must exceed expected scan processing time.
    #[serde(default = "default_jwt_expiry")]
    pub jwt_expiry_secs: u64,

    /// External pattern-matching engine binary.
    #[serde(default = "default_engine")]
    pub engine: String,

    /// Git URL of the version-controlled rule set.
    #[serde(default = "default_ruleset_repo")]
    pub ruleset_repo: String,

    /// Checkout location for the synced rule set.
    #[serde(default = "default_ruleset_dir")]
    pub ruleset_dir: PathBuf,

    /// Bundled offline copy used when syncing fails.
    #[serde(default = "default_offline_ruleset_dir")]
    pub offline_ruleset_dir: PathBuf,
}

fn default_scan_context() -> String {
    "diffgate-scan".to_string()
}

fn default_app_url() -> String {
    "https://github.com/diffgate/diffgate".to_string()
}

fn default_true() -> bool {
    true
}

fn default_one_liner_threshold() -> usize {
    400
}

fn default_detector_timeout() -> u64 {
    30
}

fn default_jwt_expiry() -> u64 {
    120
}

fn default_engine() -> String {
    "semgrep".to_string()
}

fn default_ruleset_repo() -> String {
    "https://github.com/diffgate/malicious-code-ruleset".to_string()
}

fn default_ruleset_dir() -> PathBuf {
    config_dir().join("malicious-code-ruleset")
}

fn default_offline_ruleset_dir() -> PathBuf {
    PathBuf::from("rulesets/offline")
}

/// Directory for gate state (synced rule set, local secret file).
pub fn config_dir() -> PathBuf {
    std::env::var_os("DIFFGATE_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| {
            std::env::var_os("HOME")
                .map(|h| PathBuf::from(h).join(".diffgate"))
                .unwrap_or_else(|| PathBuf::from(".diffgate"))
        })
}

impl Default for GateConfig {
    fn default() -> Self {
        GateConfig {
            scan_context: default_scan_context(),
            app_url: default_app_url(),
            strict_mode: false,
            full_findings: false,
            block_pr: true,
            one_liner_threshold: default_one_liner_threshold(),
            detector_timeout_secs: default_detector_timeout(),
            workers: None,
            jwt_expiry_secs: default_jwt_expiry(),
            engine: default_engine(),
            ruleset_repo: default_ruleset_repo(),
            ruleset_dir: default_ruleset_dir(),
            offline_ruleset_dir: default_offline_ruleset_dir(),
        }
    }
}

impl GateConfig {
    /// Load configuration from a TOML file. A missing file yields defaults.
    pub fn load(path: &Path) -> Result<Self, GateError> {
        if !path.exists() {
            return Ok(GateConfig::default());
        }
        let raw = std::fs::read_to_string(path)?;
        toml::from_str(&raw).map_err(|e| GateError::Config(e.to_string()))
    }
}
