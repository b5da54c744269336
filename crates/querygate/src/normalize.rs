//! Literal normalizer: rewrites shell-only wrapper constructors into plain literals.
//!
//! Runs before argument parsing. The only constructor form that survives is
//! `new Date(...)`, which the argument parser understands natively.

use std::sync::OnceLock;

use regex::{Captures, Regex};

use crate::tokenizer::literal_spans;

/// A single rewrite rule: pattern and replacement template.
struct Rule {
    pattern: Regex,
    replacement: &'static str,
}

fn rules() -> &'static [Rule] {
    static RULES: OnceLock<Vec<Rule>> = OnceLock::new();
    RULES.get_or_init(|| {
        let table: [(&str, &str); 10] = [
            (
                r#"(?:\bnew\s+)?\bObjectId\s*\(\s*["']([^"']+)["']\s*\)"#,
                r#""${1}""#,
            ),
            (r#"(?:\bnew\s+)?\bObjectId\s*\(\s*\)"#, r#""""#),
            (
                r#"(?:\bnew\s+)?\bISODate\s*\(\s*["']([^"']+)["']\s*\)"#,
                r#"new Date("${1}")"#,
            ),
            (r#"(?:\bnew\s+)?\bISODate\s*\(\s*\)"#, "new Date()"),
            (
                r#"(?:\bnew\s+)?\bNumberLong\s*\(\s*["']?(-?\d+)["']?\s*\)"#,
                "${1}",
            ),
            (
                r#"(?:\bnew\s+)?\bNumberInt\s*\(\s*["']?(-?\d+)["']?\s*\)"#,
                "${1}",
            ),
            (
                r#"(?:\bnew\s+)?\bNumberDecimal\s*\(\s*["']?([^"')]+?)["']?\s*\)"#,
                "${1}",
            ),
            (
                r#"(?:\bnew\s+)?\bUUID\s*\(\s*["']([^"']+)["']\s*\)"#,
                r#""${1}""#,
            ),
            (
                r#"(?:\bnew\s+)?\bBinData\s*\(\s*\d+\s*,\s*["']([^"']+)["']\s*\)"#,
                r#""${1}""#,
            ),
            (
                r#"(?:\bnew\s+)?\bTimestamp\s*\(\s*(\d+)\s*,\s*(\d+)\s*\)"#,
                r#"{"t": ${1}, "i": ${2}}"#,
            ),
        ];

        table
            .iter()
            .map(|&(pattern, replacement)| Rule {
                pattern: Regex::new(pattern).expect("normalizer pattern is valid"),
                replacement,
            })
            .collect()
    })
}

/// Rewrite shell wrapper constructors (`ObjectId`, `ISODate`, `NumberLong`,
/// `NumberInt`, `NumberDecimal`, `UUID`, `BinData`, `Timestamp`) into
/// portable literal syntax.
///
/// Wrapper text inside string or regex literals is left alone. Input that
/// contains none of the wrappers is returned unchanged.
pub fn normalize_literals(input: &str) -> String {
    let mut text = input.to_string();
    for rule in rules() {
        if !rule.pattern.is_match(&text) {
            continue;
        }
        let spans = literal_spans(&text);
        let quoted = |at: usize| spans.iter().any(|&(start, end)| start <= at && at < end);
        text = rule
            .pattern
            .replace_all(&text, |caps: &Captures| match caps.get(0) {
                Some(m) if !quoted(m.start()) => {
                    let mut out = String::new();
                    caps.expand(rule.replacement, &mut out);
                    out
                }
                _ => caps[0].to_string(),
            })
            .into_owned();
    }
    text
}
