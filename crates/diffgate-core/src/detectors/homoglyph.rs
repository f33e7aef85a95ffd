//! Homoglyph detection: non-ASCII characters that render like ASCII
//! letters inside identifier-looking tokens. A `раypal` that is not
//! `paypal` is a high-confidence signal.

use crate::detectors::{Detection, Detector, FileContext, Severity};
use crate::error::GateError;
use async_trait::async_trait;

/// Confusable characters paired with the ASCII letter they imitate.
/// Cyrillic and Greek lookalikes cover the practical attack surface.
const CONFUSABLES: &[(char, char)] = &[
    // Cyrillic lowercase
    ('а', 'a'), ('е', 'e'), ('о', 'o'), ('р', 'p'), ('с', 'c'), ('х', 'x'),
    ('у', 'y'), ('і', 'i'), ('ѕ', 's'), ('ј', 'j'), ('ԁ', 'd'), ('ɡ', 'g'),
    // Cyrillic uppercase
    ('А', 'A'), ('В', 'B'), ('Е', 'E'), ('К', 'K'), ('М', 'M'), ('Н', 'H'),
    ('О', 'O'), ('Р', 'P'), ('С', 'C'), ('Т', 'T'), ('Х', 'X'), ('Ѕ', 'S'),
    // Greek
    ('ο', 'o'), ('α', 'a'), ('ν', 'v'), ('ι', 'i'), ('κ', 'k'), ('ρ', 'p'),
    ('τ', 't'), ('υ', 'u'), ('Α', 'A'), ('Β', 'B'), ('Ε', 'E'), ('Ο', 'O'),
];

pub struct HomoglyphDetector;

#[async_trait]
impl Detector for HomoglyphDetector {
    fn name(&self) -> &'static str {
        "homoglyph"
    }

    async fn scan(&self, content: &str, ctx: &FileContext) -> Result<Vec<Detection>, GateError> {
        Ok(detect_homoglyph(content, ctx.full_findings))
    }
}

pub fn detect_homoglyph(content: &str, full_findings: bool) -> Vec<Detection> {
    let mut results = Vec::new();

    for (idx, line) in content.lines().enumerate() {
        let Some((confusable, lookalike)) = first_confusable(line) else { continue };
        let token = surrounding_token(line, confusable);
        results.push(
            Detection::new(
                format!(
                    "Identifier contains '{confusable}' (U+{:04X}), visually confusable with ASCII '{lookalike}'.",
                    confusable as u32
                ),
                Severity::Error,
                idx + 1,
            )
            .with_evidence(token),
        );
        if !full_findings {
            return results;
        }
    }
    results
}

fn first_confusable(line: &str) -> Option<(char, char)> {
    line.chars().find_map(|c| {
        CONFUSABLES
            .iter()
            .find(|(confusable, _)| *confusable == c)
            .copied()
    })
}

/// The identifier-shaped token around the confusable character, used as
/// evidence tying the finding back to the diff.
fn surrounding_token(line: &str, confusable: char) -> String {
    let is_ident = |c: char| c.is_alphanumeric() || c == '_';
    let char_pos = match line.char_indices().find(|(_, c)| *c == confusable) {
        Some((pos, _)) => pos,
        None => return confusable.to_string(),
    };

    let start = line[..char_pos]
        .char_indices()
        .rev()
        .take_while(|(_, c)| is_ident(*c))
        .last()
        .map(|(i, _)| i)
        .unwrap_or(char_pos);
    let end = line[char_pos..]
        .char_indices()
        .take_while(|(_, c)| is_ident(*c))
        .last()
        .map(|(i, c)| char_pos + i + c.len_utf8())
        .unwrap_or(char_pos + confusable.len_utf8());

    line[start..end].to_string()
}
