//! Structural pre-pass run before the toolchain is invoked.
//!
//! The generated wrappers supply each unit's package and imports, so user
//! sources may not declare their own. The entry unit must open with the
//! `module` initializer, preceded by nothing but whitespace and comments.

use std::sync::LazyLock;

use regex::Regex;

use crate::error::{BuildResult, CompileError};

/// Keyword the entry unit must start with.
pub const ENTRY_KEYWORD: &str = "module";

static DECLARATION: LazyLock<Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r"(?m)^\s*(package|import)\s+"));

/// Check every source. `sources` holds `(relative path, text)`.
///
/// # Errors
///
/// Returns [`CompileError::Structural`] naming the first offending unit,
/// or [`CompileError::Internal`] if the declaration pattern is unusable.
pub fn validate_sources(entry: &str, sources: &[(String, String)]) -> BuildResult<()> {
    let declaration = DECLARATION
        .as_ref()
        .map_err(|e| CompileError::Internal(format!("declaration pattern: {e}")))?;
    for (path, text) in sources {
        if let Some(keyword) = declared_keyword(declaration, text) {
            return Err(CompileError::Structural {
                unit: path.clone(),
                message: format!(
                    "`{keyword}` declarations are not allowed; the host provides the package and imports"
                ),
            });
        }
    }

    let Some((_, entry_text)) = sources.iter().find(|(path, _)| path == entry) else {
        return Err(CompileError::Structural {
            unit: entry.to_string(),
            message: "entry unit is missing".into(),
        });
    };
    if !starts_with_initializer(entry_text) {
        return Err(CompileError::Structural {
            unit: entry.to_string(),
            message: format!("entry must begin with `{ENTRY_KEYWORD} {{ ... }}`"),
        });
    }
    Ok(())
}

fn declared_keyword<'t>(regex: &Regex, text: &'t str) -> Option<&'t str> {
    regex
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
}

/// Whether `text` begins with the initializer keyword once leading
/// whitespace, `//` and `/* */` comments are skipped.
#[must_use]
pub fn starts_with_initializer(text: &str) -> bool {
    let rest = skip_trivia(text);
    let Some(after) = rest.strip_prefix(ENTRY_KEYWORD) else {
        return false;
    };
    match after.chars().next() {
        None => false,
        Some(c) => c.is_whitespace() || c == '{' || c == '(',
    }
}

fn skip_trivia(mut text: &str) -> &str {
    loop {
        let trimmed = text.trim_start();
        if let Some(line) = trimmed.strip_prefix("//") {
            text = line.find('\n').map_or("", |i| &line[i..]);
        } else if let Some(block) = trimmed.strip_prefix("/*") {
            match block.find("*/") {
                Some(end) => text = &block[end.saturating_add(2)..],
                // Unterminated comment swallows the rest.
                None => return "",
            }
        } else {
            return trimmed;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn src(path: &str, text: &str) -> (String, String) {
        (path.to_string(), text.to_string())
    }

    #[test]
    fn declaration_pattern_compiles() {
        assert!(DECLARATION.is_ok());
    }

    #[test]
    fn accepts_entry_after_comments() {
        let text = "// header\n/* block\n comment */\n  module {\n}\n";
        assert!(starts_with_initializer(text));
        assert!(starts_with_initializer("module{}"));
        assert!(starts_with_initializer("module ("));
    }

    #[test]
    fn rejects_entry_with_code_first() {
        assert!(!starts_with_initializer("val x = 1\nmodule {}"));
        assert!(!starts_with_initializer("modules {}"));
        assert!(!starts_with_initializer("/* never closed module {}"));
        assert!(!starts_with_initializer(""));
    }

    #[test]
    fn rejects_package_and_import() {
        let sources = vec![
            src("src/main.ks", "module {}\n"),
            src("src/util.ks", "// helpers\n  import kiln.internal.Host\n"),
        ];
        let err = validate_sources("src/main.ks", &sources).unwrap_err();
        match err {
            CompileError::Structural { unit, message } => {
                assert_eq!(unit, "src/util.ks");
                assert!(message.contains("import"));
            },
            other => panic!("unexpected {other:?}"),
        }

        let sources = vec![src("src/main.ks", "package foo\nmodule {}\n")];
        assert!(validate_sources("src/main.ks", &sources).is_err());
    }

    #[test]
    fn keywords_inside_identifiers_are_fine() {
        let sources = vec![src("src/main.ks", "module {\n  val imported = 1\n}\n")];
        validate_sources("src/main.ks", &sources).unwrap();
    }

    #[test]
    fn missing_entry_is_structural() {
        let sources = vec![src("src/other.ks", "val a = 1\n")];
        assert!(matches!(
            validate_sources("src/main.ks", &sources),
            Err(CompileError::Structural { .. })
        ));
    }
}
