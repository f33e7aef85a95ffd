mod display;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use diffgate_core::config::config_dir;
use diffgate_core::protection::{is_branch_status_check_protected, merge_protection};
use diffgate_core::secrets::{FileStore, SecretStore};
use diffgate_core::webhook::{sign_body, WebhookService};
use diffgate_core::{ChangedFile, GateConfig, GithubClient, Scanner};
use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(
    name = "diffgate",
    version,
    about = "diffgate — pull-request security gate",
    long_about = "Scan pull-request diffs for indicators of supply-chain compromise and enforce the verdict through commit statuses and branch protection."
)]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, default_value = "diffgate.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan a set of changed files and report detections
    Scan {
        /// JSON file of changed files ("-" reads stdin)
        #[arg(default_value = "-")]
        path: String,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,

        /// Only report high-confidence findings
        #[arg(long)]
        strict: bool,

        /// Collect every finding instead of stopping at the first
        #[arg(long)]
        full_findings: bool,
    },

    /// Replay a webhook delivery from a payload file
    Event {
        /// Path to the raw delivery payload
        payload: PathBuf,

        /// Event type the delivery carried
        #[arg(long, default_value = "pull_request")]
        event_type: String,

        /// X-Hub-Signature-256 value; computed from the stored secret
        /// when omitted
        #[arg(long)]
        signature: Option<String>,
    },

    /// Apply the gate's required status check to a branch
    Protect {
        /// Repository in owner/name form
        repo: String,

        /// Branch to protect
        branch: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = GateConfig::load(&cli.config)
        .with_context(|| format!("Failed to load {}", cli.config.display()))?;

    match cli.command {
        Commands::Scan { path, format, strict, full_findings } => {
            cmd_scan(config, &path, &format, strict, full_findings).await
        }
        Commands::Event { payload, event_type, signature } => {
            cmd_event(config, &payload, &event_type, signature).await
        }
        Commands::Protect { repo, branch } => cmd_protect(config, &repo, &branch).await,
    }
}

fn secret_store() -> FileStore {
    FileStore::new(config_dir().join("secrets.json"))
}

fn github_client() -> Result<GithubClient> {
    let token = std::env::var("GITHUB_TOKEN")
        .context("GITHUB_TOKEN is not set; export an installation or personal token")?;
    GithubClient::new(&token).context("Failed to build GitHub client")
}

fn read_changed_files(path: &str) -> Result<Vec<ChangedFile>> {
    let raw = if path == "-" {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("Failed to read changed files from stdin")?;
        buf
    } else {
        std::fs::read_to_string(path).with_context(|| format!("Failed to read {path}"))?
    };
    serde_json::from_str(&raw).context("Changed-files input is not valid JSON")
}

async fn cmd_scan(
    mut config: GateConfig,
    path: &str,
    format: &str,
    strict: bool,
    full_findings: bool,
) -> Result<()> {
    if strict {
        config.strict_mode = true;
    }
    if full_findings {
        config.full_findings = true;
    }

    let files = read_changed_files(path)?;
    let scanner = Scanner::new(&config);
    let outcome = scanner.run_scan(&files).await.context("Scan failed")?;

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&outcome)?),
        _ => display::print_scan_report(&outcome, files.len()),
    }

    if !outcome.is_clean() {
        std::process::exit(1);
    }
    Ok(())
}

async fn cmd_event(
    config: GateConfig,
    payload: &PathBuf,
    event_type: &str,
    signature: Option<String>,
) -> Result<()> {
    let body = std::fs::read(payload)
        .with_context(|| format!("Failed to read {}", payload.display()))?;
    let store = secret_store();

    let signature = match signature {
        Some(s) => s,
        None => {
            let secret = store
                .get_secret("WEBHOOK_SECRET")
                .context("WEBHOOK_SECRET is not set in the local secret store")?;
            sign_body(secret.as_bytes(), &body).context("Failed to sign payload")?
        }
    };

    let github = github_client()?;
    let scanner = Scanner::new(&config);
    let service = WebhookService::new(config, Arc::new(store), github, scanner);
    let reply = service
        .handle_event(event_type, Some(&signature), &body)
        .await;

    display::print_webhook_reply(&reply);
    if reply.status >= 400 {
        std::process::exit(1);
    }
    Ok(())
}

async fn cmd_protect(config: GateConfig, repo: &str, branch: &str) -> Result<()> {
    let github = github_client()?;
    let existing = github
        .get_branch_protection(repo, branch)
        .await
        .context("Failed to read branch protection")?;

    if is_branch_status_check_protected(existing.as_ref(), &config.scan_context) {
        display::print_already_protected(repo, branch, &config.scan_context);
        return Ok(());
    }

    match merge_protection(existing.as_ref(), &config.scan_context, None) {
        Some(update) => {
            github
                .put_branch_protection(repo, branch, &update)
                .await
                .context("Failed to write branch protection")?;
            display::print_protection_applied(repo, branch, &config.scan_context);
        }
        None => display::print_protection_skipped(repo, branch),
    }
    Ok(())
}
