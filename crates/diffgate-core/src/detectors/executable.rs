//! Executable detection: classify by extension against curated OS sets,
//! and fall back to magic-number inspection of the leading bytes.

use crate::detectors::{Detection, Detector, FileContext, Severity};
use crate::error::GateError;
use async_trait::async_trait;

const WINDOWS_EXTENSIONS: &[&str] = &[
    "exe", "msi", "sys", "com", "cpl", "scr", "vxd", "ocx", "drv", "bpl", "efi",
];
const MAC_EXTENSIONS: &[&str] = &["app", "dmg", "pkg", "kext", "command"];
const UNIX_EXTENSIONS: &[&str] = &["bin", "run", "deb", "rpm", "out"];
const SHARED_EXTENSIONS: &[&str] = &["dll", "so", "framework"];

struct MagicNumber {
    prefix: &'static [u8],
    description: &'static str,
}

const MAGIC_NUMBERS: &[MagicNumber] = &[
    MagicNumber { prefix: b"\x7fELF", description: "an ELF executable" },
    MagicNumber { prefix: b"MZ", description: "a Windows executable" },
    MagicNumber { prefix: b"koly", description: "a macOS disk image" },
    MagicNumber { prefix: b"!<ar", description: "a Debian package" },
    MagicNumber { prefix: b"\xed\xab\xee\xdb", description: "a Red Hat package" },
    MagicNumber { prefix: b"\x1f\x8b", description: "a gzip-wrapped binary" },
];

pub struct ExecutableDetector;

#[async_trait]
impl Detector for ExecutableDetector {
    fn name(&self) -> &'static str {
        "executable"
    }

    fn warning_only(&self) -> bool {
        true
    }

    async fn scan(&self, content: &str, ctx: &FileContext) -> Result<Vec<Detection>, GateError> {
        Ok(detect_executable(&ctx.filename, content))
    }
}

/// One file-level finding at line 1, or nothing.
pub fn detect_executable(filename: &str, content: &str) -> Vec<Detection> {
    if let Some(ext) = executable_extension(filename) {
        return vec![Detection::new(
            format!("An executable file: .{ext}"),
            Severity::Warning,
            1,
        )];
    }

    let head = content.as_bytes();
    for magic in MAGIC_NUMBERS {
        if head.starts_with(magic.prefix) {
            return vec![Detection::new(
                format!("File content is {}.", magic.description),
                Severity::Warning,
                1,
            )];
        }
    }
    Vec::new()
}

fn executable_extension(filename: &str) -> Option<String> {
    let ext = filename.rsplit_once('.')?.1.to_ascii_lowercase();
    let known = WINDOWS_EXTENSIONS
        .iter()
        .chain(MAC_EXTENSIONS)
        .chain(UNIX_EXTENSIONS)
        .chain(SHARED_EXTENSIONS)
        .any(|&e| e == ext);
    known.then_some(ext)
}
