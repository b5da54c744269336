//! Method-call tokenizer: recognizes the primary `db.` call and slices out its
//! argument text and whatever follows it.

use std::sync::OnceLock;

use regex::Regex;

use crate::types::{ParsedCall, QueryError, QueryResult, TargetKind};

const EXPECTED_SHAPES: &str = "expected db.<collection>.<method>(...), \
     db.getCollection(\"name\").<method>(...), db.runCommand(...), \
     db.adminCommand(...) or db.currentOp(...)";

struct Shapes {
    admin: Regex,
    get_collection: Regex,
    collection: Regex,
}

fn shapes() -> &'static Shapes {
    static SHAPES: OnceLock<Shapes> = OnceLock::new();
    SHAPES.get_or_init(|| Shapes {
        admin: Regex::new(r"^db\s*\.\s*(currentOp|runCommand|adminCommand)\s*\(")
            .expect("admin shape regex is valid"),
        get_collection: Regex::new(
            r#"^db\s*\.\s*getCollection\s*\(\s*(?:"([^"]*)"|'([^']*)')\s*\)\s*\.\s*([A-Za-z_$][\w$]*)\s*\("#,
        )
        .expect("getCollection shape regex is valid"),
        collection: Regex::new(
            r"^db\s*\.\s*([A-Za-z_$][\w$-]*(?:\.[A-Za-z_$][\w$-]*)*)\s*\.\s*([A-Za-z_$][\w$]*)\s*\(",
        )
        .expect("collection shape regex is valid"),
    })
}

/// Drop `//` comment lines and surrounding whitespace.
pub fn clean_query(text: &str) -> String {
    text.lines()
        .filter(|line| !line.trim_start().starts_with("//"))
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

/// Split query text into its primary call, argument text and remainder.
pub fn tokenize(text: &str) -> QueryResult<ParsedCall> {
    let query = clean_query(text);
    if query.is_empty() {
        return Err(QueryError::MalformedQuery("query is empty".to_string()));
    }

    let shapes = shapes();

    let (target_kind, collection, method, open) = if let Some(caps) = shapes.admin.captures(&query)
    {
        let method = caps[1].to_string();
        let kind = match method.as_str() {
            "currentOp" => TargetKind::CurrentOp,
            "runCommand" => TargetKind::RunCommand,
            _ => TargetKind::AdminCommand,
        };
        (kind, None, method, caps[0].len() - 1)
    } else if let Some(caps) = shapes.get_collection.captures(&query) {
        let name = caps
            .get(1)
            .or_else(|| caps.get(2))
            .map(|m| m.as_str())
            .unwrap_or_default();
        if name.is_empty() {
            return Err(QueryError::MalformedQuery(
                "getCollection requires a non-empty collection name".to_string(),
            ));
        }
        (
            TargetKind::GetCollectionMethod,
            Some(name.to_string()),
            caps[3].to_string(),
            caps[0].len() - 1,
        )
    } else if let Some(caps) = shapes.collection.captures(&query) {
        (
            TargetKind::CollectionMethod,
            Some(caps[1].to_string()),
            caps[2].to_string(),
            caps[0].len() - 1,
        )
    } else if query.starts_with("db.getCollection") {
        return Err(QueryError::MalformedQuery(
            "invalid getCollection format, expected db.getCollection(\"name\").<method>(...)"
                .to_string(),
        ));
    } else {
        return Err(QueryError::MalformedQuery(EXPECTED_SHAPES.to_string()));
    };

    let close = find_closing(&query, open)?;

    Ok(ParsedCall {
        target_kind,
        collection,
        method,
        args_raw: query[open + 1..close].to_string(),
        remainder: query[close + 1..].trim().to_string(),
    })
}

/// Given the byte offset of an opening `(`, `{` or `[`, return the offset of
/// the delimiter that brings nesting depth back to zero.
///
/// Quoted strings and `/regex/` literals are skipped as opaque, honoring
/// backslash escapes (and `[...]` classes inside a regex). All delimiters are
/// ASCII, so scanning bytes is safe for UTF-8 input.
pub(crate) fn find_closing(text: &str, open: usize) -> QueryResult<usize> {
    let bytes = text.as_bytes();
    let unbalanced = || QueryError::UnbalancedDelimiters { open_at: open };
    let mut depth = 0usize;
    let mut prev: Option<u8> = None;
    let mut i = open;

    while i < bytes.len() {
        let b = bytes[i];
        match b {
            b'"' | b'\'' => {
                i = skip_literal(bytes, i).ok_or_else(unbalanced)?;
                prev = Some(b);
                continue;
            }
            b'/' if regex_may_start(prev) => {
                i = skip_literal(bytes, i).ok_or_else(unbalanced)?;
                prev = Some(b);
                continue;
            }
            b'(' | b'{' | b'[' => depth += 1,
            b')' | b'}' | b']' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Ok(i);
                }
            }
            _ => {}
        }
        if !b.is_ascii_whitespace() {
            prev = Some(b);
        }
        i += 1;
    }

    Err(unbalanced())
}

/// Byte ranges of every string and regex literal in `text`, in order.
///
/// An unterminated literal runs to the end of the text.
pub(crate) fn literal_spans(text: &str) -> Vec<(usize, usize)> {
    let bytes = text.as_bytes();
    let mut spans = Vec::new();
    let mut prev: Option<u8> = None;
    let mut i = 0;

    while i < bytes.len() {
        let b = bytes[i];
        let opens_literal = matches!(b, b'"' | b'\'') || (b == b'/' && regex_may_start(prev));
        if opens_literal {
            let end = skip_literal(bytes, i).unwrap_or(bytes.len());
            spans.push((i, end));
            prev = Some(b);
            i = end;
            continue;
        }
        if !b.is_ascii_whitespace() {
            prev = Some(b);
        }
        i += 1;
    }

    spans
}

/// A `/` opens a regex only where a value may start.
fn regex_may_start(prev: Option<u8>) -> bool {
    matches!(prev, None | Some(b'(' | b',' | b':' | b'['))
}

/// Offset just past the quoted string or regex literal opening at `start`,
/// or `None` when it is never closed.
fn skip_literal(bytes: &[u8], start: usize) -> Option<usize> {
    let delimiter = bytes[start];
    let mut in_class = false;
    let mut i = start + 1;

    while i < bytes.len() {
        match bytes[i] {
            b'\\' => {
                i += 2;
                continue;
            }
            b'[' if delimiter == b'/' => in_class = true,
            b']' if delimiter == b'/' => in_class = false,
            b if b == delimiter && !in_class => return Some(i + 1),
            _ => {}
        }
        i += 1;
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn depth_of(text: &str) -> i64 {
        let mut depth = 0i64;
        let mut quote: Option<char> = None;
        let mut escaped = false;
        for c in text.chars() {
            if let Some(q) = quote {
                if escaped {
                    escaped = false;
                } else if c == '\\' {
                    escaped = true;
                } else if c == q {
                    quote = None;
                }
                continue;
            }
            match c {
                '"' | '\'' => quote = Some(c),
                '(' | '{' | '[' => depth += 1,
                ')' | '}' | ']' => depth -= 1,
                _ => {}
            }
        }
        depth
    }

    #[test]
    fn test_collection_method() {
        let call = tokenize(r#"db.users.find({status: "active"})"#).unwrap();
        assert_eq!(call.target_kind, TargetKind::CollectionMethod);
        assert_eq!(call.collection.as_deref(), Some("users"));
        assert_eq!(call.method, "find");
        assert_eq!(call.args_raw, r#"{status: "active"}"#);
        assert_eq!(call.remainder, "");
    }

    #[test]
    fn test_remainder_is_trimmed_suffix() {
        let call = tokenize("db.users.find({}).limit(2).skip(1)  ").unwrap();
        assert_eq!(call.args_raw, "{}");
        assert_eq!(call.remainder, ".limit(2).skip(1)");
    }

    #[test]
    fn test_get_collection() {
        let call = tokenize(r#"db.getCollection("order-items").aggregate([{$match: {}}])"#).unwrap();
        assert_eq!(call.target_kind, TargetKind::GetCollectionMethod);
        assert_eq!(call.collection.as_deref(), Some("order-items"));
        assert_eq!(call.method, "aggregate");
        assert_eq!(call.args_raw, "[{$match: {}}]");

        let call = tokenize("db.getCollection( 'logs' ).countDocuments()").unwrap();
        assert_eq!(call.collection.as_deref(), Some("logs"));
        assert_eq!(call.args_raw, "");
    }

    #[test]
    fn test_admin_calls() {
        let call = tokenize("db.currentOp().inprog.length").unwrap();
        assert_eq!(call.target_kind, TargetKind::CurrentOp);
        assert_eq!(call.collection, None);
        assert_eq!(call.remainder, ".inprog.length");

        let call = tokenize("db.runCommand({ping: 1})").unwrap();
        assert_eq!(call.target_kind, TargetKind::RunCommand);
        assert_eq!(call.args_raw, "{ping: 1}");

        let call = tokenize("db.adminCommand ({listDatabases: 1}).databases[0]").unwrap();
        assert_eq!(call.target_kind, TargetKind::AdminCommand);
        assert_eq!(call.remainder, ".databases[0]");
    }

    #[test]
    fn test_dotted_collection_name() {
        let call = tokenize("db.system.profile.find({})").unwrap();
        assert_eq!(call.collection.as_deref(), Some("system.profile"));
        assert_eq!(call.method, "find");
    }

    #[test]
    fn test_quoted_delimiters_do_not_perturb_depth() {
        let call = tokenize(r#"db.users.find({name: "a(b)"})"#).unwrap();
        assert_eq!(call.args_raw, r#"{name: "a(b)"}"#);

        let call = tokenize(r#"db.users.find({name: 'x{[('}).limit(1)"#).unwrap();
        assert_eq!(call.args_raw, r#"{name: 'x{[('}"#);
        assert_eq!(call.remainder, ".limit(1)");

        let call = tokenize(r#"db.users.find({name: "say \"hi)\""})"#).unwrap();
        assert_eq!(call.args_raw, r#"{name: "say \"hi)\""}"#);
    }

    #[test]
    fn test_regex_literals_are_opaque() {
        let call = tokenize("db.users.find({name: /don't/i})").unwrap();
        assert_eq!(call.args_raw, "{name: /don't/i}");

        let call = tokenize(r"db.users.find({name: /^\(/}).limit(2)").unwrap();
        assert_eq!(call.args_raw, r"{name: /^\(/}");
        assert_eq!(call.remainder, ".limit(2)");

        let call = tokenize(r#"db.users.find({tag: {$in: [/[/)]x/, /"}/]}})"#).unwrap();
        assert_eq!(call.args_raw, r#"{tag: {$in: [/[/)]x/, /"}/]}}"#);

        let err = tokenize("db.users.find({name: /open(})").unwrap_err();
        assert!(matches!(err, QueryError::UnbalancedDelimiters { .. }));
    }

    #[test]
    fn test_literal_spans() {
        let text = r#"{a: "x(", b: /y'/i, c: 'z'}"#;
        let spans: Vec<&str> = literal_spans(text)
            .into_iter()
            .map(|(start, end)| &text[start..end])
            .collect();
        assert_eq!(spans, vec![r#""x(""#, "/y'/", "'z'"]);

        assert_eq!(literal_spans(r#"{a: "open"#), vec![(4, 9)]);
        assert!(literal_spans("{a: 1}").is_empty());
    }

    #[test]
    fn test_extracted_args_are_balanced() {
        let queries = [
            "db.a.find({x: {$in: [1, 2, (3)]}})",
            r#"db.a.aggregate([{$match: {s: "]"}}, {$project: {a: 1}}]).toArray()"#,
            r#"db.getCollection("a").updateOne({_id: 1}, {$set: {t: "}{"}})"#,
            "db.runCommand({count: 'a', query: {}}).n",
        ];
        for q in queries {
            let call = tokenize(q).unwrap();
            assert_eq!(depth_of(&call.args_raw), 0, "unbalanced args for {q}");
        }
    }

    #[test]
    fn test_comment_lines_stripped() {
        let text = "// count active users\n  // second comment\ndb.users.countDocuments({a: 1})\n";
        assert_eq!(clean_query(text), "db.users.countDocuments({a: 1})");
        let call = tokenize(text).unwrap();
        assert_eq!(call.method, "countDocuments");
    }

    #[test]
    fn test_unbalanced() {
        let err = tokenize("db.users.find({status: 1}").unwrap_err();
        assert!(matches!(err, QueryError::UnbalancedDelimiters { .. }));

        let err = tokenize(r#"db.users.find({name: "unterminated)})"#).unwrap_err();
        assert!(matches!(err, QueryError::UnbalancedDelimiters { .. }));
    }

    #[test]
    fn test_malformed() {
        for q in ["", "   ", "users.find({})", "db.users", "show collections", "db.find"] {
            let err = tokenize(q).unwrap_err();
            assert!(matches!(err, QueryError::MalformedQuery(_)), "{q}: {err:?}");
        }
        let err = tokenize("db.getCollection(users).find()").unwrap_err();
        assert!(matches!(err, QueryError::MalformedQuery(_)));
        let err = tokenize(r#"db.getCollection("").find()"#).unwrap_err();
        assert!(matches!(err, QueryError::MalformedQuery(_)));
    }
}
