//! Chained-modifier scanner and post-process paths.
//!
//! After the primary call, collection queries may carry `.limit(10).sort({a: 1})`
//! style calls, while admin calls may carry a property path such as
//! `.inprog.length` or `.databases[0].name`.

use bson::Bson;

use crate::args::parse_shell_args;
use crate::tokenizer::find_closing;
use crate::types::{
    ChainCall, ChainedModifier, ModifierMethod, PathSegment, PostProcessPath, QueryError,
    QueryResult,
};

/// Scan every `.name(args)` call in `remainder`, left to right.
pub fn scan_chain(remainder: &str) -> QueryResult<Vec<ChainCall>> {
    let bytes = remainder.as_bytes();
    let mut calls = Vec::new();
    let mut i = skip_ws(bytes, 0);

    while i < bytes.len() {
        if is_terminator(&remainder[i..]) {
            break;
        }
        if bytes[i] != b'.' {
            return Err(unexpected(&remainder[i..]));
        }
        i = skip_ws(bytes, i + 1);

        let name_start = i;
        while i < bytes.len() && is_ident_byte(bytes[i]) {
            i += 1;
        }
        if i == name_start {
            return Err(unexpected(&remainder[name_start - 1..]));
        }
        let method = remainder[name_start..i].to_string();

        i = skip_ws(bytes, i);
        if i >= bytes.len() || bytes[i] != b'(' {
            return Err(QueryError::MalformedQuery(format!(
                "expected '(' after chained method '{method}'"
            )));
        }
        let close = find_closing(remainder, i)?;
        let args = parse_shell_args(&remainder[i + 1..close])?;
        calls.push(ChainCall { method, args });

        i = skip_ws(bytes, close + 1);
    }

    Ok(calls)
}

/// Keep only the cursor modifiers honored by `find`, in order of appearance.
///
/// Other chained calls (`pretty()`, `toArray()`, ...) are dropped.
pub fn retained_modifiers(calls: &[ChainCall]) -> Vec<ChainedModifier> {
    calls
        .iter()
        .filter_map(|call| {
            ModifierMethod::from_name(&call.method).map(|method| ChainedModifier {
                method,
                value: call.args.first().cloned().unwrap_or(Bson::Null),
            })
        })
        .collect()
}

/// Parse a property path such as `.inprog.length`, `.result[0]` or `[2].name`.
pub fn parse_post_path(remainder: &str) -> QueryResult<PostProcessPath> {
    let bytes = remainder.as_bytes();
    let mut segments = Vec::new();
    let mut i = skip_ws(bytes, 0);

    while i < bytes.len() {
        if is_terminator(&remainder[i..]) {
            break;
        }
        match bytes[i] {
            b'.' => {
                let start = i + 1;
                i = start;
                while i < bytes.len() && is_ident_byte(bytes[i]) {
                    i += 1;
                }
                if i == start {
                    return Err(unexpected(&remainder[start - 1..]));
                }
                segments.push(PathSegment::Field(remainder[start..i].to_string()));
            }
            b'[' => {
                let start = i + 1;
                i = start;
                while i < bytes.len() && bytes[i].is_ascii_digit() {
                    i += 1;
                }
                if i == start || i >= bytes.len() || bytes[i] != b']' {
                    return Err(QueryError::MalformedQuery(format!(
                        "expected an array index in '{}'",
                        &remainder[start - 1..]
                    )));
                }
                let index = remainder[start..i].parse::<usize>().map_err(|_| {
                    QueryError::MalformedQuery(format!(
                        "array index out of range: {}",
                        &remainder[start..i]
                    ))
                })?;
                segments.push(PathSegment::Index(index));
                i += 1;
            }
            _ => return Err(unexpected(&remainder[i..])),
        }
    }

    Ok(PostProcessPath { segments })
}

/// Walk `value` along `path`. A missing step yields `None` rather than an error.
///
/// `length` on an array or string yields its length, mirroring the shell.
pub fn apply_post_path(value: Bson, path: &PostProcessPath) -> Option<Bson> {
    let mut current = value;
    for segment in &path.segments {
        current = match (segment, current) {
            (PathSegment::Field(name), Bson::Document(mut doc)) => doc.remove(name)?,
            (PathSegment::Field(name), Bson::Array(items)) if name == "length" => {
                Bson::Int64(items.len() as i64)
            }
            (PathSegment::Field(name), Bson::String(s)) if name == "length" => {
                Bson::Int64(s.chars().count() as i64)
            }
            (PathSegment::Index(index), Bson::Array(mut items)) => {
                if *index >= items.len() {
                    return None;
                }
                items.swap_remove(*index)
            }
            _ => return None,
        };
    }
    Some(current)
}

fn skip_ws(bytes: &[u8], mut i: usize) -> usize {
    while i < bytes.len() && bytes[i].is_ascii_whitespace() {
        i += 1;
    }
    i
}

fn is_ident_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'$'
}

/// Trailing semicolons and whitespace end a statement.
fn is_terminator(rest: &str) -> bool {
    rest.chars().all(|c| c == ';' || c.is_whitespace())
}

fn unexpected(rest: &str) -> QueryError {
    let shown: String = rest.chars().take(24).collect();
    QueryError::MalformedQuery(format!("unexpected text after call: '{shown}'"))
}
