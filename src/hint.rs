//! Hint-file lexer, schema tables, and canonicalization.
//!
//! Grammar (grounded on `hint.py`): UTF-8 text, `#`-prefixed and
//! blank lines are comments, otherwise `key: value`. A value may be quoted;
//! if the quote does not close on the same line, the value continues,
//! embedded newlines preserved, until a line that ends in an unescaped
//! closing quote.

use std::collections::BTreeMap;
use std::fmt;

/// How a key's value is shaped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    /// may span multiple lines inside quotes (sdesc, ldesc, message)
    MultilineVal,
    /// single-line, required value (category, version, etc)
    Val,
    /// single-line, value is optional (homepage on non-strict schemas)
    OptVal,
    /// bare key, no value permitted (e.g. `skip:`)
    NoVal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Schema {
    /// a single binary version's hint (`<pvr>.hint`)
    Binary,
    /// a single source version's hint (`<pvr>-src.hint`)
    Source,
    /// the whole-package override hint, shared across versions
    Override,
}

pub fn schema_keys(schema: Schema) -> &'static [(&'static str, ValueKind)] {
    match schema {
        Schema::Binary => &[
            ("sdesc", ValueKind::MultilineVal),
            ("ldesc", ValueKind::MultilineVal),
            ("category", ValueKind::Val),
            ("requires", ValueKind::Val),
            ("depends", ValueKind::Val),
            ("obsoletes", ValueKind::Val),
            ("provides", ValueKind::Val),
            ("conflicts", ValueKind::Val),
            ("build-depends", ValueKind::Val),
            ("external-source", ValueKind::Val),
            ("message", ValueKind::MultilineVal),
            ("license", ValueKind::Val),
            ("homepage", ValueKind::OptVal),
            ("skip", ValueKind::NoVal),
            ("test", ValueKind::NoVal),
            ("original-version", ValueKind::Val),
        ],
        Schema::Source => &[
            ("sdesc", ValueKind::MultilineVal),
            ("ldesc", ValueKind::MultilineVal),
            ("category", ValueKind::Val),
            ("homepage", ValueKind::Val),
            ("license", ValueKind::Val),
            ("test", ValueKind::NoVal),
        ],
        Schema::Override => &[
            ("keep", ValueKind::Val),
            ("keep-count", ValueKind::Val),
            ("keep-count-test", ValueKind::Val),
            ("keep-days", ValueKind::Val),
            ("keep-superseded-versions", ValueKind::NoVal),
            ("replace-versions", ValueKind::Val),
            ("disable-check", ValueKind::Val),
            ("noretain", ValueKind::Val),
        ],
    }
}

fn allowed_value_kind(schema: Schema, key: &str) -> Option<ValueKind> {
    schema_keys(schema)
        .iter()
        .find(|(k, _)| *k == key)
        .map(|(_, kind)| *kind)
}

const MULTI_VALUED_KEYS: &[&str] = &["depends", "obsoletes", "build-depends", "provides", "replace-versions"];

const CATEGORIES: &[&str] = &[
    "Admin", "Archive", "Base", "Database", "Debug", "Devel", "Doc", "Editors",
    "Games", "Gnome", "Graphics", "Interpreters", "Kde", "Libs", "Lua", "Mail",
    "Math", "Mingw", "Misc", "Net", "Ocaml", "Office", "Perl", "Php", "Publishing",
    "Python", "Ruby", "Scheme", "Science", "Security", "Shells", "Source", "System",
    "Tcl", "Text", "Utils", "Web", "X11", "_obsolete",
];

fn typofix(key: &str) -> &str {
    match key {
        "sdec" | "sdsec" => "sdesc",
        "ldec" => "ldesc",
        "cagegory" | "categoy" => "category",
        "dependss" => "depends",
        other => other,
    }
}

#[derive(Debug, Clone, Default)]
pub struct Hint {
    pub values: BTreeMap<String, String>,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
}

impl Hint {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(|s| s.as_str())
    }

    /// Split, trim, dedup-free sort, rejoin a multi-valued atom list.
    fn canonicalize_multivalued(raw: &str) -> String {
        let mut atoms: Vec<&str> = raw
            .split([',', ' '])
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect();
        atoms.sort_unstable();
        atoms.join(", ")
    }
}

#[derive(Debug)]
enum LexError {
    UnterminatedQuote,
}

impl fmt::Display for LexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unterminated quoted value")
    }
}

/// Lex `text` into raw (key, value) pairs, honoring quote-continuation.
fn lex(text: &str) -> Result<Vec<(String, String)>, LexError> {
    let mut pairs = Vec::new();
    let mut lines = text.lines().peekable();

    while let Some(line) = lines.next() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        let Some((key, rest)) = trimmed.split_once(':') else {
            continue;
        };
        let key = key.trim().to_string();
        let mut rest = rest.trim_start();

        if let Some(stripped) = rest.strip_prefix('"') {
            // quoted value: may continue across lines
            let mut value = String::new();
            let mut remainder = stripped;
            loop {
                if let Some(end) = find_unescaped_quote(remainder) {
                    value.push_str(&remainder[..end]);
                    break;
                } else {
                    value.push_str(remainder);
                    match lines.next() {
                        Some(next_line) => {
                            value.push('\n');
                            remainder = next_line;
                        }
                        None => return Err(LexError::UnterminatedQuote),
                    }
                }
            }
            pairs.push((key, value.replace("\\\"", "\"")));
        } else {
            rest = rest.trim_end();
            pairs.push((key, rest.to_string()));
        }
    }

    Ok(pairs)
}

fn find_unescaped_quote(s: &str) -> Option<usize> {
    let bytes = s.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'"' && (i == 0 || bytes[i - 1] != b'\\') {
            return Some(i);
        }
        i += 1;
    }
    None
}

/// Parse a hint file's text against the given schema.
pub fn parse(text: &str, schema: Schema) -> Hint {
    let mut hint = Hint::default();

    let pairs = match lex(text) {
        Ok(p) => p,
        Err(e) => {
            hint.errors.push(e.to_string());
            return hint;
        }
    };

    for (raw_key, value) in pairs {
        let key = typofix(&raw_key).to_string();
        if key != raw_key {
            hint.warnings
                .push(format!("'{raw_key}' auto-corrected to '{key}'"));
        }

        let Some(kind) = allowed_value_kind(schema, &key) else {
            hint.errors.push(format!("key '{key}' not allowed in this schema"));
            continue;
        };

        if hint.values.contains_key(&key) {
            hint.errors.push(format!("duplicate key '{key}'"));
            continue;
        }

        match kind {
            ValueKind::NoVal => {
                if !value.trim().is_empty() {
                    hint.errors.push(format!("key '{key}' must not have a value"));
                }
                hint.values.insert(key, String::new());
            }
            ValueKind::Val | ValueKind::MultilineVal => {
                if value.trim().is_empty() {
                    hint.errors.push(format!("key '{key}' requires a value"));
                    continue;
                }
                let value = if MULTI_VALUED_KEYS.contains(&key.as_str()) {
                    Hint::canonicalize_multivalued(&value)
                } else {
                    value
                };
                hint.values.insert(key, value);
            }
            ValueKind::OptVal => {
                hint.values.insert(key, value);
            }
        }
    }

    // requires: transliterated into depends with the same value
    if let Some(requires) = hint.values.remove("requires") {
        let canonical = Hint::canonicalize_multivalued(&requires);
        hint.values.insert("depends".to_string(), canonical);
    }

    validate_required_and_semantic(&mut hint, schema);
    hint
}

fn validate_required_and_semantic(hint: &mut Hint, schema: Schema) {
    match schema {
        Schema::Binary | Schema::Source => {
            if !hint.values.contains_key("sdesc") {
                hint.errors.push("missing required key 'sdesc'".to_string());
            }
            if !hint.values.contains_key("category") {
                hint.errors.push("missing required key 'category'".to_string());
            }
            if schema == Schema::Source && !hint.values.contains_key("homepage") {
                hint.errors.push("missing required key 'homepage'".to_string());
            }

            if let Some(cats) = hint.values.get("category") {
                for c in cats.split(',').map(str::trim).filter(|s| !s.is_empty()) {
                    if !CATEGORIES.contains(&c) {
                        hint.errors.push(format!("unknown category '{c}'"));
                    }
                }
            }

            if let Some(sdesc) = hint.values.get("sdesc") {
                if sdesc.ends_with('.') {
                    hint.warnings.push("sdesc should not end in '.'".to_string());
                }
                if sdesc.contains("  ") {
                    hint.warnings.push("sdesc contains double space".to_string());
                }
            }

            if let Some(message) = hint.values.get("message") {
                if message.split_whitespace().next().is_none() {
                    hint.errors.push("message requires an id and text".to_string());
                }
            }
        }
        Schema::Override => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_binary_hint() {
        let text = r#"sdesc: "A test package"
ldesc: "A longer
description"
category: Libs
requires: foo bar
"#;
        let hint = parse(text, Schema::Binary);
        assert!(hint.is_valid(), "errors: {:?}", hint.errors);
        assert_eq!(hint.get("sdesc"), Some("A test package"));
        assert_eq!(hint.get("depends"), Some("bar, foo"));
        assert!(hint.get("ldesc").unwrap().contains('\n'));
    }

    #[test]
    fn rejects_unknown_category() {
        let text = "sdesc: \"x\"\ncategory: NotARealCategory\n";
        let hint = parse(text, Schema::Binary);
        assert!(!hint.is_valid());
    }

    #[test]
    fn typo_in_key_is_autocorrected_with_warning() {
        let text = "sdec: \"x\"\ncategory: Libs\n";
        let hint = parse(text, Schema::Binary);
        assert_eq!(hint.get("sdesc"), Some("x"));
        assert!(!hint.warnings.is_empty());
    }

    #[test]
    fn multivalued_keys_are_sorted_and_deduped_by_join() {
        let canon = Hint::canonicalize_multivalued(" zed, alpha,  mid ");
        assert_eq!(canon, "alpha, mid, zed");
    }

    #[test]
    fn duplicate_key_is_an_error() {
        let text = "sdesc: \"x\"\ncategory: Libs\ncategory: Devel\n";
        let hint = parse(text, Schema::Binary);
        assert!(!hint.is_valid());
    }

    #[test]
    fn canonicalization_is_idempotent() {
        let once = Hint::canonicalize_multivalued("b, a, c");
        let twice = Hint::canonicalize_multivalued(&once);
        assert_eq!(once, twice);
    }
}
