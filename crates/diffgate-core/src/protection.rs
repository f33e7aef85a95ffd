//! Branch protection reconciliation. The protection rule is an externally
//! owned read-modify-write target: the merge must never drop a check,
//! reviewer, or restriction that was already there, and must refuse to
//! install the gate's check where doing so would deadlock the branch.

use crate::error::GateError;
use crate::secrets::SecretStore;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{info, warn};

const REGISTRY_KEY: &str = "PROTECTED_BRANCHES";
const INCLUDE_KEY: &str = "BRANCHES_INCLUDE";
const EXCLUDE_KEY: &str = "BRANCHES_EXCLUDE";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusCheck {
    pub context: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_id: Option<i64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequiredStatusChecks {
    #[serde(default)]
    pub strict: bool,
    #[serde(default)]
    pub checks: Vec<StatusCheck>,
    /// Legacy single-context shape, read-only; writes always use `checks`.
    #[serde(default, skip_serializing)]
    pub contexts: Vec<String>,
}

/// Protection rule as read from the hosting platform. Fields the gate
/// does not reason about stay opaque and are passed through verbatim.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BranchProtection {
    #[serde(default)]
    pub required_status_checks: Option<RequiredStatusChecks>,
    #[serde(default)]
    pub enforce_admins: Option<Value>,
    #[serde(default)]
    pub required_pull_request_reviews: Option<Value>,
    #[serde(default)]
    pub restrictions: Option<Value>,
}

/// Write-shaped protection body. The read shape wraps `enforce_admins`
/// in `{enabled}`; the write endpoint expects a bare boolean.
#[derive(Debug, Clone, Serialize)]
pub struct ProtectionUpdate {
    pub required_status_checks: RequiredStatusChecks,
    pub enforce_admins: bool,
    pub required_pull_request_reviews: Option<Value>,
    pub restrictions: Option<Value>,
}

/// True when the branch already requires the gate's check.
pub fn is_branch_status_check_protected(
    existing: Option<&BranchProtection>,
    scan_context: &str,
) -> bool {
    let Some(checks) = existing.and_then(|p| p.required_status_checks.as_ref()) else {
        return false;
    };
    checks.checks.iter().any(|c| c.context == scan_context)
        || checks.contexts.iter().any(|c| c == scan_context)
}

/// Merge the gate's check into an existing rule.
///
/// Returns `None` when the rule is already strict with at least one
/// check: adding ours there would retroactively require a scan that
/// never ran on historical commits, blocking every merge.
pub fn merge_protection(
    existing: Option<&BranchProtection>,
    scan_context: &str,
    app_id: Option<i64>,
) -> Option<ProtectionUpdate> {
    let current = existing
        .and_then(|p| p.required_status_checks.clone())
        .unwrap_or_default();

    if current.strict && (!current.checks.is_empty() || !current.contexts.is_empty()) {
        info!("existing protection is strict with checks, leaving it untouched");
        return None;
    }

    let mut checks = current.checks.clone();
    if checks.is_empty() {
        // Migrate the legacy shape so nothing already required is lost.
        checks.extend(current.contexts.iter().map(|context| StatusCheck {
            context: context.clone(),
            app_id: None,
        }));
    }
    if !checks.iter().any(|c| c.context == scan_context) {
        checks.push(StatusCheck {
            context: scan_context.to_string(),
            app_id,
        });
    }

    let enforce_admins = existing
        .and_then(|p| p.enforce_admins.as_ref())
        .and_then(|v| v.get("enabled"))
        .and_then(Value::as_bool)
        .unwrap_or(true);

    Some(ProtectionUpdate {
        required_status_checks: RequiredStatusChecks {
            strict: current.strict,
            checks,
            contexts: Vec::new(),
        },
        enforce_admins,
        required_pull_request_reviews: existing
            .and_then(|p| p.required_pull_request_reviews.clone()),
        restrictions: existing.and_then(|p| p.restrictions.clone()),
    })
}

/// Which branches are in scope for the gate, driven by two optional
/// repo-keyed JSON maps in the secret store, each of the shape
/// `{"org/repo": ["main", ...]}`. An empty include map means every
/// branch of every repository; the exclude map always wins. Scoping is
/// per repository, so excluding `sandbox` in one repo does not touch a
/// branch of the same name elsewhere.
pub fn is_branch_included(
    store: &dyn SecretStore,
    repo: &str,
    branch: &str,
) -> Result<bool, GateError> {
    let excluded = branch_map(store, EXCLUDE_KEY)?;
    if excluded
        .get(repo)
        .is_some_and(|branches| branches.iter().any(|b| b == branch))
    {
        return Ok(false);
    }

    let included = branch_map(store, INCLUDE_KEY)?;
    if included.is_empty() {
        return Ok(true);
    }
    Ok(included
        .get(repo)
        .is_some_and(|branches| branches.iter().any(|b| b == branch)))
}

fn branch_map(
    store: &dyn SecretStore,
    key: &str,
) -> Result<BTreeMap<String, Vec<String>>, GateError> {
    let raw = match store.get_secret(key) {
        Ok(raw) => raw,
        Err(GateError::SecretLookup(_)) => return Ok(BTreeMap::new()),
        Err(e) => return Err(e),
    };
    match serde_json::from_str(&raw) {
        Ok(map) => Ok(map),
        Err(e) => {
            warn!(key, error = %e, "branch list is malformed, treating as unset");
            Ok(BTreeMap::new())
        }
    }
}

/// Registry of (repo, branch) pairs the gate has already protected.
/// Append-only, persisted through the secret store as a JSON blob.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ProtectedBranches {
    branches: BTreeMap<String, BTreeSet<String>>,
}

impl ProtectedBranches {
    pub fn load(store: &dyn SecretStore) -> Result<Self, GateError> {
        match store.get_secret(REGISTRY_KEY) {
            Ok(raw) => serde_json::from_str(&raw)
                .map_err(|e| GateError::SecretStore(format!("corrupt branch registry: {e}"))),
            Err(GateError::SecretLookup(_)) => Ok(ProtectedBranches::default()),
            Err(e) => Err(e),
        }
    }

    pub fn contains(&self, repo: &str, branch: &str) -> bool {
        self.branches
            .get(repo)
            .is_some_and(|set| set.contains(branch))
    }

    /// Record (repo, branch), persisting only when the pair is new.
    /// Returns whether the registry changed.
    pub fn update(
        &mut self,
        store: &dyn SecretStore,
        repo: &str,
        branch: &str,
    ) -> Result<bool, GateError> {
        let inserted = self
            .branches
            .entry(repo.to_string())
            .or_default()
            .insert(branch.to_string());
        if inserted {
            store.set_secret(REGISTRY_KEY, &serde_json::to_string(self)?)?;
        }
        Ok(inserted)
    }
}
