//! Unified-diff processing: comment stripping (with string literals masked
//! so markers inside them survive) and extraction of added lines numbered
//! in the full file's coordinate space.

use crate::languages::comment_patterns;
use regex::Regex;

/// A line introduced by the diff, numbered in the target file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Addition {
    pub line_number: usize,
    pub content: String,
}

/// Cleaned diffs above this size are treated as "nothing to scan".
pub const MAX_DIFF_BYTES: usize = 1024 * 1024;

/// Clean a unified diff and return its added lines with line numbers.
///
/// Oversized diffs and diffs yielding zero additions return empty: both
/// mean there is nothing to scan, not that the scan failed.
pub fn process_diff(diff: &str, lang: &str) -> Vec<Addition> {
    let cleaned = strip_comments(diff, lang);
    if cleaned.len() > MAX_DIFF_BYTES {
        return Vec::new();
    }
    additions_with_line_numbers(&cleaned)
}

/// Extract added lines and their target line numbers.
///
/// A hunk header resets the running counter to its target start; `+` lines
/// advance it and emit (unless they are the `+++` file header or trim to
/// empty); any non-deleted line advances it; `-` lines never do.
pub fn additions_with_line_numbers(diff: &str) -> Vec<Addition> {
    let hunk_start = Regex::new(r"\+(\d+)").ok();
    let mut additions = Vec::new();
    let mut line_number: usize = 0;

    for line in diff.lines() {
        if line.starts_with("@@") {
            if let Some(cap) = hunk_start.as_ref().and_then(|re| re.captures(line)) {
                if let Ok(start) = cap[1].parse::<usize>() {
                    line_number = start.saturating_sub(1);
                }
            }
        } else if line.starts_with('+') && !line.starts_with("+++") {
            line_number += 1;
            let content = line[1..].trim();
            if !content.is_empty() {
                additions.push(Addition {
                    line_number,
                    content: content.to_string(),
                });
            }
        } else if !line.starts_with('-') {
            line_number += 1;
        }
    }
    additions
}

/// Remove the language's comment forms from the diff, keeping comment
/// markers that appear inside string literals intact.
pub fn strip_comments(diff: &str, lang: &str) -> String {
    let (masked, literals) = mask_strings(diff);
    let mut result = masked;
    for pattern in comment_patterns(lang) {
        if let Ok(re) = Regex::new(pattern) {
            result = re.replace_all(&result, "").into_owned();
        }
    }
    restore_strings(result, &literals)
}

/// Replace single-line quoted literals with numbered placeholders.
///
/// Triple-quote runs are left alone so docstring patterns still match, and
/// a literal left unterminated at end of line is not a literal at all.
fn mask_strings(diff: &str) -> (String, Vec<String>) {
    let bytes = diff.as_bytes();
    let mut masked = String::with_capacity(diff.len());
    let mut literals = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        let b = bytes[i];
        if b == b'"' || b == b'\'' {
            if i + 2 < bytes.len() && bytes[i + 1] == b && bytes[i + 2] == b {
                masked.push_str(std::str::from_utf8(&bytes[i..i + 3]).unwrap_or(""));
                i += 3;
                continue;
            }
            if let Some(end) = find_string_end(bytes, i) {
                literals.push(diff[i..=end].to_string());
                masked.push_str(&format!("__STRING_{}__", literals.len() - 1));
                i = end + 1;
                continue;
            }
        }
        // Copy one full UTF-8 character.
        let ch_len = utf8_len(b);
        masked.push_str(&diff[i..i + ch_len]);
        i += ch_len;
    }
    (masked, literals)
}

/// Index of the closing quote for a literal opening at `start`, or None if
/// the line ends first.
fn find_string_end(bytes: &[u8], start: usize) -> Option<usize> {
    let quote = bytes[start];
    let mut i = start + 1;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 2,
            b'\n' => return None,
            b if b == quote => return Some(i),
            _ => i += 1,
        }
    }
    None
}

fn utf8_len(first_byte: u8) -> usize {
    match first_byte {
        b if b < 0x80 => 1,
        b if b >= 0xf0 => 4,
        b if b >= 0xe0 => 3,
        _ => 2,
    }
}

fn restore_strings(mut diff: String, literals: &[String]) -> String {
    for (i, literal) in literals.iter().enumerate() {
        diff = diff.replace(&format!("__STRING_{}__", i), literal);
    }
    diff
}
