//! Language tables: extension resolution, canonical extensions for the
//! external engine, and per-language comment syntax.

struct LanguageEntry {
    name: &'static str,
    /// Extensions mapped to this language. The first one is canonical and
    /// used when materializing content into a transient file.
    extensions: &'static [&'static str],
}

const LANGUAGES: &[LanguageEntry] = &[
    LanguageEntry { name: "Python", extensions: &["py"] },
    LanguageEntry { name: "JavaScript", extensions: &["js", "mjs", "cjs"] },
    LanguageEntry { name: "TypeScript", extensions: &["ts", "tsx"] },
    LanguageEntry { name: "Go", extensions: &["go"] },
    LanguageEntry { name: "Rust", extensions: &["rs"] },
    LanguageEntry { name: "Java", extensions: &["java"] },
    LanguageEntry { name: "C", extensions: &["c", "h"] },
    LanguageEntry { name: "C++", extensions: &["cpp", "cc", "cxx", "hpp"] },
    LanguageEntry { name: "dotnet", extensions: &["cs"] },
    LanguageEntry { name: "PHP", extensions: &["php"] },
    LanguageEntry { name: "Ruby", extensions: &["rb"] },
    LanguageEntry { name: "Bash", extensions: &["sh", "bash"] },
    LanguageEntry { name: "Kotlin", extensions: &["kt", "kts"] },
    LanguageEntry { name: "Swift", extensions: &["swift"] },
    LanguageEntry { name: "Scala", extensions: &["scala"] },
    LanguageEntry { name: "Dart", extensions: &["dart"] },
    LanguageEntry { name: "Lua", extensions: &["lua"] },
    LanguageEntry { name: "Perl", extensions: &["pl", "pm"] },
    LanguageEntry { name: "R", extensions: &["r"] },
    LanguageEntry { name: "Clojure", extensions: &["clj", "cljs"] },
    LanguageEntry { name: "Groovy", extensions: &["groovy"] },
    LanguageEntry { name: "Objective-C", extensions: &["m", "mm"] },
    LanguageEntry { name: "HTML", extensions: &["html", "htm"] },
    LanguageEntry { name: "CSS", extensions: &["css"] },
    LanguageEntry { name: "SQL", extensions: &["sql"] },
];

struct CommentSyntax {
    languages: &'static [&'static str],
    /// Regex source removing one comment form. Multiline/dot-all flags are
    /// part of the pattern itself.
    pattern: &'static str,
}

const COMMENT_SYNTAX: &[CommentSyntax] = &[
    CommentSyntax {
        languages: &["Bash", "Perl", "Python", "R", "Ruby"],
        pattern: r"(?m)#.*$",
    },
    CommentSyntax {
        languages: &[
            "Dart", "dotnet", "Go", "Groovy", "Java", "JavaScript", "TypeScript", "Kotlin",
            "Objective-C", "PHP", "Rust", "Scala", "Swift",
        ],
        pattern: r"(?m)//.*$",
    },
    CommentSyntax {
        languages: &[
            "C", "C++", "CSS", "dotnet", "Dart", "Go", "Groovy", "Java", "JavaScript",
            "TypeScript", "Kotlin", "Objective-C", "PHP", "Rust", "Scala", "Swift",
        ],
        pattern: r"/\*[\s\S]*?\*/",
    },
    CommentSyntax {
        languages: &["Clojure"],
        pattern: r"(?m);.*$",
    },
    CommentSyntax {
        languages: &["HTML", "dotnet"],
        pattern: r"<!--[\s\S]*?-->",
    },
    CommentSyntax {
        languages: &["Python"],
        pattern: r#""""[\s\S]*?""""#,
    },
    CommentSyntax {
        languages: &["Python"],
        pattern: r"'''[\s\S]*?'''",
    },
    CommentSyntax {
        languages: &["Ruby"],
        pattern: r"(?m)^=begin[\s\S]*?^=end",
    },
    CommentSyntax {
        languages: &["Lua"],
        pattern: r"--\[\[[\s\S]*?\]\]",
    },
    CommentSyntax {
        languages: &["Lua", "SQL"],
        pattern: r"(?m)--.*$",
    },
];

/// Resolve a language from a file extension. Unknown extensions mean the
/// file is not analyzable and gets skipped upstream.
pub fn language_for_extension(ext: &str) -> Option<&'static str> {
    let ext = ext.to_ascii_lowercase();
    LANGUAGES
        .iter()
        .find(|entry| entry.extensions.contains(&ext.as_str()))
        .map(|entry| entry.name)
}

/// Resolve a language from a filename.
pub fn language_for_filename(filename: &str) -> Option<&'static str> {
    let ext = filename.rsplit_once('.').map(|(_, e)| e)?;
    language_for_extension(ext)
}

/// The canonical extension for a language, used to name transient files so
/// the external engine picks the right rules.
pub fn canonical_extension(lang: &str) -> Option<&'static str> {
    LANGUAGES
        .iter()
        .find(|entry| entry.name.eq_ignore_ascii_case(lang))
        .map(|entry| entry.extensions[0])
}

/// Comment-removal regex sources applying to the given language.
pub fn comment_patterns(lang: &str) -> Vec<&'static str> {
    COMMENT_SYNTAX
        .iter()
        .filter(|syntax| {
            syntax
                .languages
                .iter()
                .any(|l| l.eq_ignore_ascii_case(lang))
        })
        .map(|syntax| syntax.pattern)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_common_extensions() {
        assert_eq!(language_for_extension("py"), Some("Python"));
        assert_eq!(language_for_extension("RS"), Some("Rust"));
        assert_eq!(language_for_extension("mjs"), Some("JavaScript"));
        assert_eq!(language_for_extension("xyz"), None);
    }

    #[test]
    fn resolves_filenames() {
        assert_eq!(language_for_filename("src/lib.rs"), Some("Rust"));
        assert_eq!(language_for_filename("setup.py"), Some("Python"));
        assert_eq!(language_for_filename("Makefile"), None);
    }

    #[test]
    fn canonical_extension_is_first_listed() {
        assert_eq!(canonical_extension("JavaScript"), Some("js"));
        assert_eq!(canonical_extension("C++"), Some("cpp"));
        assert_eq!(canonical_extension("Whitespace"), None);
    }

    #[test]
    fn python_gets_hash_and_docstring_patterns() {
        let patterns = comment_patterns("Python");
        assert!(patterns.contains(&r"(?m)#.*$"));
        assert!(patterns.iter().any(|p| p.contains(r#"""""#)));
        assert_eq!(comment_patterns("Brainfuck").len(), 0);
    }
}
