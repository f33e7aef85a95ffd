use colored::*;
use diffgate_core::webhook::WebhookReply;
use diffgate_core::{Detection, ScanOutcome, Severity};

/// Print a scan report to the terminal.
pub fn print_scan_report(outcome: &ScanOutcome, file_count: usize) {
    println!();
    println!(
        "{}",
        format!(
            " diffgate v{} — {} file{} scanned",
            env!("CARGO_PKG_VERSION"),
            file_count,
            if file_count == 1 { "" } else { "s" }
        )
        .bold()
    );
    println!();

    if outcome.is_clean() {
        println!(
            " {} No malicious code detected.",
            "PASS".green().bold()
        );
    } else {
        println!(
            " {} {} suspicious change{} detected",
            "FAIL".red().bold(),
            outcome.detections.len(),
            if outcome.detections.len() == 1 { "" } else { "s" }
        );
        println!();
        for detection in &outcome.detections {
            print_detection(detection);
        }
    }

    if !outcome.advisories.is_empty() {
        println!();
        println!(" {}", "Advisories".bold().underline());
        for advisory in &outcome.advisories {
            println!(
                " {} {}: {}",
                "|-".dimmed(),
                advisory.filename.as_deref().unwrap_or("?").cyan(),
                advisory.message
            );
        }
    }
    println!();
}

fn print_detection(detection: &Detection) {
    let severity = match detection.severity {
        Severity::Error => detection.severity.symbol().red().bold(),
        Severity::Warning => detection.severity.symbol().yellow().bold(),
        Severity::Info => detection.severity.symbol().blue().bold(),
    };
    println!(
        " {} {}:{} — {}",
        severity,
        detection.filename.as_deref().unwrap_or("?").cyan(),
        detection.line_number,
        detection.message
    );
    if let Some(evidence) = &detection.evidence {
        println!("    {} {}", "evidence:".dimmed(), evidence);
    }
    if let Some(decoded) = &detection.decoded {
        println!("    {} {}", "decodes to:".dimmed(), decoded);
    }
}

pub fn print_webhook_reply(reply: &WebhookReply) {
    let status = if reply.status < 400 {
        reply.status.to_string().green().bold()
    } else {
        reply.status.to_string().red().bold()
    };
    println!(" {} {}", status, reply.message);
}

pub fn print_already_protected(repo: &str, branch: &str, context: &str) {
    println!(
        " {} {}@{} already requires the {} check",
        "OK".green().bold(),
        repo.cyan(),
        branch,
        context
    );
}

pub fn print_protection_applied(repo: &str, branch: &str, context: &str) {
    println!(
        " {} {} check now required on {}@{}",
        "OK".green().bold(),
        context,
        repo.cyan(),
        branch
    );
}

pub fn print_protection_skipped(repo: &str, branch: &str) {
    println!(
        " {} protection on {}@{} is strict with existing checks; left untouched to avoid blocking merges",
        "SKIP".yellow().bold(),
        repo.cyan(),
        branch
    );
}
