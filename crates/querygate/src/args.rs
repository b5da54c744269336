//! Argument parser: recursive descent over shell literal syntax.
//!
//! Grammar:
//! ```text
//! args   := ε | value (',' value)* ','?
//! value  := object | array | string | number | regex | date
//!         | 'true' | 'false' | 'null' | 'undefined' | 'NaN' | 'Infinity'
//! object := '{' (key ':' value (',' key ':' value)* ','?)? '}'
//! key    := string | ident
//! array  := '[' (value (',' value)* ','?)? ']'
//! date   := 'new'? 'Date' '(' (string | number)? ')'
//! regex  := '/' body '/' flags
//! ```
//!
//! Nothing here evaluates code: the only values that can be produced are
//! documents, arrays and scalars.

use bson::{Bson, Document};
use chrono::{DateTime, NaiveDate, NaiveDateTime};

use crate::normalize::normalize_literals;
use crate::types::{QueryError, QueryResult};

const FRAGMENT_LEN: usize = 24;

/// Normalize shell wrappers, then parse the argument list.
pub fn parse_shell_args(raw: &str) -> QueryResult<Vec<Bson>> {
    parse_args(&normalize_literals(raw))
}

/// Parse a comma-separated list of literal values.
///
/// Blank input yields an empty list.
pub fn parse_args(text: &str) -> QueryResult<Vec<Bson>> {
    let mut parser = Parser::new(text);
    let mut values = Vec::new();

    parser.skip_ws();
    while !parser.at_end() {
        values.push(parser.parse_value()?);
        parser.skip_ws();
        if parser.at_end() {
            break;
        }
        parser.expect(',')?;
        parser.skip_ws();
    }

    Ok(values)
}

/// Parse exactly one literal value.
pub fn parse_value(text: &str) -> QueryResult<Bson> {
    let mut parser = Parser::new(text);
    parser.skip_ws();
    let value = parser.parse_value()?;
    parser.skip_ws();
    if !parser.at_end() {
        return Err(parser.error("unexpected trailing content"));
    }
    Ok(value)
}

struct Parser {
    chars: Vec<char>,
    pos: usize,
}

impl Parser {
    fn new(text: &str) -> Self {
        Self {
            chars: text.chars().collect(),
            pos: 0,
        }
    }

    fn at_end(&self) -> bool {
        self.pos >= self.chars.len()
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += 1;
        Some(c)
    }

    fn skip_ws(&mut self) {
        while matches!(self.peek(), Some(c) if c.is_whitespace()) {
            self.pos += 1;
        }
    }

    fn fragment(&self, at: usize) -> String {
        if at >= self.chars.len() {
            return "<end of input>".to_string();
        }
        let end = (at + FRAGMENT_LEN).min(self.chars.len());
        self.chars[at..end].iter().collect()
    }

    fn error(&self, reason: impl Into<String>) -> QueryError {
        self.error_at(self.pos, reason)
    }

    fn error_at(&self, at: usize, reason: impl Into<String>) -> QueryError {
        QueryError::argument(self.fragment(at), reason)
    }

    fn expect(&mut self, expected: char) -> QueryResult<()> {
        match self.peek() {
            Some(c) if c == expected => {
                self.pos += 1;
                Ok(())
            }
            Some(c) => Err(self.error(format!("expected '{expected}', found '{c}'"))),
            None => Err(self.error(format!("expected '{expected}' but reached end of input"))),
        }
    }

    fn parse_value(&mut self) -> QueryResult<Bson> {
        match self.peek() {
            Some('{') => self.parse_object().map(Bson::Document),
            Some('[') => self.parse_array(),
            Some('"') | Some('\'') => self.parse_string().map(Bson::String),
            Some('/') => self.parse_regex(),
            Some(c) if c.is_ascii_digit() || c == '-' || c == '+' || c == '.' => {
                self.parse_number()
            }
            Some(c) if is_ident_start(c) => self.parse_keyword(),
            Some(c) => Err(self.error(format!("unexpected character '{c}'"))),
            None => Err(self.error("expected a value")),
        }
    }

    fn parse_object(&mut self) -> QueryResult<Document> {
        self.expect('{')?;
        let mut doc = Document::new();

        loop {
            self.skip_ws();
            if self.peek() == Some('}') {
                self.pos += 1;
                return Ok(doc);
            }

            let key = self.parse_key()?;
            self.skip_ws();
            self.expect(':')?;
            self.skip_ws();
            let value = self.parse_value()?;
            doc.insert(key, value);

            self.skip_ws();
            match self.peek() {
                Some(',') => self.pos += 1,
                Some('}') => {
                    self.pos += 1;
                    return Ok(doc);
                }
                Some(c) => return Err(self.error(format!("expected ',' or '}}' in object, found '{c}'"))),
                None => return Err(self.error("unterminated object")),
            }
        }
    }

    fn parse_key(&mut self) -> QueryResult<String> {
        match self.peek() {
            Some('"') | Some('\'') => self.parse_string(),
            Some(c) if is_key_char(c) => {
                let start = self.pos;
                while matches!(self.peek(), Some(c) if is_key_char(c)) {
                    self.pos += 1;
                }
                Ok(self.chars[start..self.pos].iter().collect())
            }
            Some(c) => Err(self.error(format!("expected object key, found '{c}'"))),
            None => Err(self.error("unterminated object")),
        }
    }

    fn parse_array(&mut self) -> QueryResult<Bson> {
        self.expect('[')?;
        let mut items = Vec::new();

        loop {
            self.skip_ws();
            if self.peek() == Some(']') {
                self.pos += 1;
                return Ok(Bson::Array(items));
            }

            items.push(self.parse_value()?);

            self.skip_ws();
            match self.peek() {
                Some(',') => self.pos += 1,
                Some(']') => {
                    self.pos += 1;
                    return Ok(Bson::Array(items));
                }
                Some(c) => return Err(self.error(format!("expected ',' or ']' in array, found '{c}'"))),
                None => return Err(self.error("unterminated array")),
            }
        }
    }

    fn parse_string(&mut self) -> QueryResult<String> {
        let start = self.pos;
        let quote = self.bump().ok_or_else(|| self.error("expected string"))?;
        let mut out = String::new();

        loop {
            match self.bump() {
                None => return Err(self.error_at(start, "unterminated string literal")),
                Some(c) if c == quote => return Ok(out),
                Some('\\') => {
                    let escaped = self
                        .bump()
                        .ok_or_else(|| self.error_at(start, "unterminated string literal"))?;
                    match escaped {
                        'n' => out.push('\n'),
                        't' => out.push('\t'),
                        'r' => out.push('\r'),
                        'b' => out.push('\u{0008}'),
                        'f' => out.push('\u{000C}'),
                        '0' => out.push('\0'),
                        'u' => out.push(self.parse_unicode_escape()?),
                        other => out.push(other),
                    }
                }
                Some(c) => out.push(c),
            }
        }
    }

    fn parse_unicode_escape(&mut self) -> QueryResult<char> {
        let start = self.pos;
        let mut code = 0u32;
        for _ in 0..4 {
            let digit = self
                .bump()
                .and_then(|c| c.to_digit(16))
                .ok_or_else(|| self.error_at(start, "invalid \\u escape"))?;
            code = code * 16 + digit;
        }
        char::from_u32(code).ok_or_else(|| self.error_at(start, "invalid unicode code point"))
    }

    fn parse_number(&mut self) -> QueryResult<Bson> {
        let start = self.pos;
        if matches!(self.peek(), Some('-') | Some('+')) {
            self.pos += 1;
        }

        if self.peek() == Some('I') {
            let word = self.take_ident();
            if word != "Infinity" {
                return Err(self.error_at(start, format!("invalid number: {word}")));
            }
            let negative = self.chars[start] == '-';
            return Ok(Bson::Double(if negative {
                f64::NEG_INFINITY
            } else {
                f64::INFINITY
            }));
        }

        let mut is_float = false;
        while let Some(c) = self.peek() {
            if c.is_ascii_digit() {
                self.pos += 1;
            } else if c == '.' || c == 'e' || c == 'E' {
                is_float = true;
                self.pos += 1;
                if (c == 'e' || c == 'E') && matches!(self.peek(), Some('-') | Some('+')) {
                    self.pos += 1;
                }
            } else {
                break;
            }
        }

        let text: String = self.chars[start..self.pos].iter().collect();
        let literal = text.strip_prefix('+').unwrap_or(&text);

        if !is_float {
            if let Ok(n) = literal.parse::<i64>() {
                return Ok(match i32::try_from(n) {
                    Ok(small) => Bson::Int32(small),
                    Err(_) => Bson::Int64(n),
                });
            }
        }

        literal
            .parse::<f64>()
            .map(Bson::Double)
            .map_err(|_| self.error_at(start, format!("invalid number: {text}")))
    }

    fn parse_regex(&mut self) -> QueryResult<Bson> {
        let start = self.pos;
        self.expect('/')?;
        let mut pattern = String::new();
        let mut in_class = false;

        loop {
            match self.bump() {
                None => return Err(self.error_at(start, "unterminated regular expression")),
                Some('\\') => {
                    let next = self
                        .bump()
                        .ok_or_else(|| self.error_at(start, "unterminated regular expression"))?;
                    pattern.push('\\');
                    pattern.push(next);
                }
                Some('[') => {
                    in_class = true;
                    pattern.push('[');
                }
                Some(']') => {
                    in_class = false;
                    pattern.push(']');
                }
                Some('/') if !in_class => break,
                Some(c) => pattern.push(c),
            }
        }

        let mut options: Vec<char> = Vec::new();
        while let Some(c) = self.peek() {
            if !c.is_ascii_alphabetic() {
                break;
            }
            if !"imsxlu".contains(c) {
                return Err(self.error(format!("unsupported regular expression flag '{c}'")));
            }
            options.push(c);
            self.pos += 1;
        }
        options.sort_unstable();
        options.dedup();

        Ok(Bson::RegularExpression(bson::Regex {
            pattern,
            options: options.into_iter().collect(),
        }))
    }

    fn take_ident(&mut self) -> String {
        let start = self.pos;
        while matches!(self.peek(), Some(c) if is_ident_char(c)) {
            self.pos += 1;
        }
        self.chars[start..self.pos].iter().collect()
    }

    fn parse_keyword(&mut self) -> QueryResult<Bson> {
        let start = self.pos;
        let word = self.take_ident();
        match word.as_str() {
            "true" => Ok(Bson::Boolean(true)),
            "false" => Ok(Bson::Boolean(false)),
            "null" | "undefined" => Ok(Bson::Null),
            "NaN" => Ok(Bson::Double(f64::NAN)),
            "Infinity" => Ok(Bson::Double(f64::INFINITY)),
            "new" => {
                self.skip_ws();
                let ctor_at = self.pos;
                let ctor = self.take_ident();
                if ctor != "Date" {
                    return Err(self.error_at(
                        ctor_at,
                        format!("constructor '{ctor}' is not allowed, only Date"),
                    ));
                }
                self.parse_date_call()
            }
            "Date" => self.parse_date_call(),
            _ => Err(self.error_at(start, format!("unexpected identifier '{word}'"))),
        }
    }

    fn parse_date_call(&mut self) -> QueryResult<Bson> {
        self.skip_ws();
        self.expect('(')?;
        self.skip_ws();

        let millis = match self.peek() {
            Some(')') => bson::DateTime::now().timestamp_millis(),
            Some('"') | Some('\'') => {
                let at = self.pos;
                let text = self.parse_string()?;
                parse_date_millis(&text)
                    .ok_or_else(|| self.error_at(at, format!("invalid date '{text}'")))?
            }
            Some(c) if c.is_ascii_digit() || c == '-' => {
                let at = self.pos;
                match self.parse_number()? {
                    Bson::Int32(n) => i64::from(n),
                    Bson::Int64(n) => n,
                    _ => return Err(self.error_at(at, "date milliseconds must be an integer")),
                }
            }
            _ => return Err(self.error("expected a date string or milliseconds")),
        };

        self.skip_ws();
        self.expect(')')?;
        Ok(Bson::DateTime(bson::DateTime::from_millis(millis)))
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_' || c == '$'
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}

fn is_key_char(c: char) -> bool {
    is_ident_char(c) || c == '.'
}

/// Accepts RFC 3339 timestamps plus the date-only and zone-less forms the
/// shell allows, interpreting zone-less values as UTC.
fn parse_date_millis(text: &str) -> Option<i64> {
    let text = text.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.timestamp_millis());
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, format) {
            return Some(naive.and_utc().timestamp_millis());
        }
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc().timestamp_millis())
}
