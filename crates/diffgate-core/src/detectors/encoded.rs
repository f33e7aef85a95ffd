//! Encoded-payload detection: hardcoded base64/base32 literals, hex and
//! unicode escape runs, and Fernet tokens decryptable with a key found in
//! the same file. Every sub-check treats a decode failure as a non-match.

use crate::detectors::{line_of_offset, Detection, Detector, FileContext, Severity};
use crate::error::GateError;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64_STD;
use base64::Engine as _;
use data_encoding::BASE32;
use regex::Regex;

/// Caps on the Fernet key x token pairing so a pathological file cannot
/// turn the decrypt matrix into a latency bomb.
const MAX_FERNET_KEYS: usize = 16;
const MAX_FERNET_TOKENS: usize = 32;

pub struct EncodedPayloadDetector;

#[async_trait]
impl Detector for EncodedPayloadDetector {
    fn name(&self) -> &'static str {
        "encoded-payload"
    }

    fn warning_only(&self) -> bool {
        true
    }

    async fn scan(&self, content: &str, ctx: &FileContext) -> Result<Vec<Detection>, GateError> {
        Ok(detect_encoded(content, ctx.full_findings))
    }
}

/// Run all encoding sub-checks over the content.
pub fn detect_encoded(content: &str, full_findings: bool) -> Vec<Detection> {
    let checks: [fn(&str, bool) -> Vec<Detection>; 5] = [
        detect_fernet,
        detect_base64,
        detect_base32,
        detect_unicode,
        detect_hex,
    ];

    let mut results = Vec::new();
    for check in checks {
        results.extend(check(content, full_findings));
        if !full_findings && !results.is_empty() {
            return results;
        }
    }
    results
}

fn detect_base64(content: &str, full_findings: bool) -> Vec<Detection> {
    let mut results = Vec::new();
    let Ok(pattern) = Regex::new(r#"['"`]([A-Za-z0-9+/]{12,}={0,2})['"`]"#) else {
        return results;
    };
    for caps in pattern.captures_iter(content) {
        let m = caps.get(1).map(|m| (m.as_str(), m.start()));
        let Some((payload, start)) = m else { continue };
        if payload.len() % 4 != 0 {
            continue;
        }
        let Ok(bytes) = BASE64_STD.decode(payload) else { continue };
        let Ok(decoded) = String::from_utf8(bytes) else { continue };
        if decoded.len() > 3 {
            results.push(
                Detection::new(
                    "Hardcoded base64-encoded string. Either malicious or a bad practice.",
                    Severity::Warning,
                    line_of_offset(content, start),
                )
                .with_evidence(payload)
                .with_decoded(decoded),
            );
            if !full_findings {
                return results;
            }
        }
    }
    results
}

fn detect_base32(content: &str, full_findings: bool) -> Vec<Detection> {
    let mut results = Vec::new();
    let Ok(pattern) = Regex::new(r#"['"`]([A-Z2-7]{16,}={0,6})['"`]"#) else {
        return results;
    };
    for caps in pattern.captures_iter(content) {
        let m = caps.get(1).map(|m| (m.as_str(), m.start()));
        let Some((payload, start)) = m else { continue };
        if payload.len() % 8 != 0 {
            continue;
        }
        let Ok(bytes) = BASE32.decode(payload.as_bytes()) else { continue };
        let Ok(decoded) = String::from_utf8(bytes) else { continue };
        if decoded.len() > 3 {
            results.push(
                Detection::new(
                    "Hardcoded base32-encoded string. Either malicious or a bad practice.",
                    Severity::Warning,
                    line_of_offset(content, start),
                )
                .with_evidence(payload)
                .with_decoded(decoded),
            );
            if !full_findings {
                return results;
            }
        }
    }
    results
}

fn detect_unicode(content: &str, full_findings: bool) -> Vec<Detection> {
    let mut results = Vec::new();
    let Ok(pattern) = Regex::new(r"((?:\\[uU][0-9A-Fa-f]{4})+)") else {
        return results;
    };
    for caps in pattern.captures_iter(content) {
        let m = caps.get(1).map(|m| (m.as_str(), m.start()));
        let Some((raw, start)) = m else { continue };
        let payload = raw.replace("\\\\", "\\");
        // At least six consecutive \uXXXX escapes.
        if payload.len() < 36 {
            continue;
        }
        let Some(decoded) = decode_unicode_escapes(&payload) else { continue };
        if !decoded.is_empty() && !decoded.contains("\\u") && decoded.len() > 3 {
            results.push(
                Detection::new(
                    "Hardcoded unicode-escaped string. Either malicious or a bad practice.",
                    Severity::Warning,
                    line_of_offset(content, start),
                )
                .with_evidence(raw)
                .with_decoded(decoded),
            );
            if !full_findings {
                return results;
            }
        }
    }
    results
}

fn detect_hex(content: &str, full_findings: bool) -> Vec<Detection> {
    let mut results = Vec::new();
    // A raw hex run of >= 8 byte pairs, or a run of >= 8 \xNN escapes.
    let Ok(pattern) = Regex::new(r"(0[xX][0-9a-fA-F]{16,}|(?:\\+[xX][0-9a-fA-F]{2}){8,})") else {
        return results;
    };
    for caps in pattern.captures_iter(content) {
        let m = caps.get(1).map(|m| (m.as_str(), m.start()));
        let Some((raw, start)) = m else { continue };
        let payload = raw.replace("\\\\", "\\");
        // Raw hex first; fall back to unescaping \xNN sequences for
        // payloads that are not one clean hex run.
        let decoded = match decode_raw_hex(&payload) {
            Some(d) => d,
            None => match unescape_hex(&payload) {
                Some(d) => d,
                None => continue,
            },
        };
        if looks_like_text(&decoded) {
            results.push(
                Detection::new(
                    "Hardcoded hex-encoded string. Either malicious or a bad practice.",
                    Severity::Warning,
                    line_of_offset(content, start),
                )
                .with_evidence(raw)
                .with_decoded(decoded),
            );
            if !full_findings {
                return results;
            }
        }
    }
    results
}

fn detect_fernet(content: &str, full_findings: bool) -> Vec<Detection> {
    let mut results = Vec::new();
    let Ok(token_pattern) = Regex::new(r"gAAAA[A-Za-z0-9_\-]+=+") else {
        return results;
    };
    let Ok(key_pattern) = Regex::new(r#"['"]([A-Za-z0-9_-]{43}=)['"]"#) else {
        return results;
    };

    let mut keys: Vec<&str> = key_pattern
        .captures_iter(content)
        .filter_map(|c| c.get(1).map(|m| m.as_str()))
        .collect();
    keys.sort_unstable();
    keys.dedup();
    keys.truncate(MAX_FERNET_KEYS);
    if keys.is_empty() {
        return results;
    }

    for m in token_pattern.find_iter(content).take(MAX_FERNET_TOKENS) {
        let token = m.as_str();
        for key in &keys {
            let Some(cipher) = fernet::Fernet::new(key) else { continue };
            let Ok(bytes) = cipher.decrypt(token) else { continue };
            let Ok(decoded) = String::from_utf8(bytes) else { continue };
            if !decoded.is_empty() {
                results.push(
                    Detection::new(
                        "Hardcoded Fernet token decryptable with a key found in the same file.",
                        Severity::Warning,
                        line_of_offset(content, m.start()),
                    )
                    .with_evidence(token)
                    .with_decoded(decoded),
                );
                if !full_findings {
                    return results;
                }
                break;
            }
        }
    }
    results
}

/// Decode a run of `\uXXXX` escapes. Any residue or invalid code point
/// makes the whole payload a non-match.
fn decode_unicode_escapes(payload: &str) -> Option<String> {
    let mut out = String::new();
    let mut rest = payload;
    while !rest.is_empty() {
        let marker = rest.get(..2)?;
        if !marker.eq_ignore_ascii_case("\\u") {
            return None;
        }
        let hex = rest.get(2..6)?;
        let code = u32::from_str_radix(hex, 16).ok()?;
        out.push(char::from_u32(code)?);
        rest = &rest[6..];
    }
    Some(out)
}

/// Decode `0x<hex...>` as one contiguous hex run.
fn decode_raw_hex(payload: &str) -> Option<String> {
    let digits = payload.get(2..)?;
    let bytes = hex::decode(digits).ok()?;
    String::from_utf8(bytes).ok()
}

/// Replace every `\xNN` escape with its byte, passing other characters
/// through, then require the result to be clean UTF-8.
fn unescape_hex(payload: &str) -> Option<String> {
    let bytes = payload.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\'
            && i + 3 < bytes.len()
            && (bytes[i + 1] == b'x' || bytes[i + 1] == b'X')
        {
            if let Ok(byte) = u8::from_str_radix(
                std::str::from_utf8(&bytes[i + 2..i + 4]).ok()?,
                16,
            ) {
                out.push(byte);
                i += 4;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8(out).ok()
}

/// The decoded payload should read as text. Decodes that still carry
/// repeated hex markers are another blob, unless long enough to be a
/// nested encoding worth reporting.
fn looks_like_text(decoded: &str) -> bool {
    let zero_x = decoded.matches("0x").count();
    let esc_x = decoded.matches("\\x").count();
    ((zero_x >= 2 || esc_x >= 2) && decoded.len() >= 16)
        || (zero_x == 0 && esc_x == 0 && decoded.len() > 3)
}
