//! Core data types for parsed shell queries.

use bson::Bson;
use serde::{Deserialize, Serialize};

/// Which call shape the query text matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetKind {
    /// `db.<collection>.<method>(...)`
    CollectionMethod,
    /// `db.getCollection("name").<method>(...)`
    GetCollectionMethod,
    /// `db.runCommand(...)`
    RunCommand,
    /// `db.adminCommand(...)`
    AdminCommand,
    /// `db.currentOp(...)`
    CurrentOp,
}

impl TargetKind {
    /// Admin-style calls take a post-process path instead of chained modifiers.
    pub fn is_admin(&self) -> bool {
        matches!(
            self,
            TargetKind::RunCommand | TargetKind::AdminCommand | TargetKind::CurrentOp
        )
    }
}

/// Output of the method-call tokenizer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedCall {
    pub target_kind: TargetKind,
    pub collection: Option<String>,
    pub method: String,
    /// Text between the primary call's parentheses, untouched.
    pub args_raw: String,
    /// Trimmed text after the primary call's closing parenthesis.
    pub remainder: String,
}

/// A `.name(args)` call following the primary call.
#[derive(Debug, Clone, PartialEq)]
pub struct ChainCall {
    pub method: String,
    pub args: Vec<Bson>,
}

/// Cursor modifiers honored on `find`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModifierMethod {
    Limit,
    Skip,
    Sort,
    Project,
}

impl ModifierMethod {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "limit" => Some(ModifierMethod::Limit),
            "skip" => Some(ModifierMethod::Skip),
            "sort" => Some(ModifierMethod::Sort),
            "project" => Some(ModifierMethod::Project),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ModifierMethod::Limit => "limit",
            ModifierMethod::Skip => "skip",
            ModifierMethod::Sort => "sort",
            ModifierMethod::Project => "project",
        }
    }
}

/// A retained cursor modifier, in order of appearance.
#[derive(Debug, Clone, PartialEq)]
pub struct ChainedModifier {
    pub method: ModifierMethod,
    pub value: Bson,
}

/// One step of a post-process path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PathSegment {
    Field(String),
    Index(usize),
}

/// Property/index access applied to an admin-command response, e.g. `.inprog.length`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostProcessPath {
    pub segments: Vec<PathSegment>,
}

impl PostProcessPath {
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }
}

impl std::fmt::Display for PostProcessPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for segment in &self.segments {
            match segment {
                PathSegment::Field(name) => write!(f, ".{name}")?,
                PathSegment::Index(i) => write!(f, "[{i}]")?,
            }
        }
        Ok(())
    }
}

/// Errors detected while turning query text into an operation.
///
/// None of these involve the network; they are raised before a connection
/// is requested.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum QueryError {
    #[error("Malformed query: {0}")]
    MalformedQuery(String),

    #[error("Unbalanced delimiters: no closing parenthesis for call opened at offset {open_at}")]
    UnbalancedDelimiters { open_at: usize },

    #[error("Failed to parse query arguments at `{fragment}`: {reason}")]
    ArgumentParse { fragment: String, reason: String },

    #[error("Unsupported method: {0}")]
    UnsupportedOperation(String),
}

impl QueryError {
    pub fn argument(fragment: impl Into<String>, reason: impl Into<String>) -> Self {
        QueryError::ArgumentParse {
            fragment: fragment.into(),
            reason: reason.into(),
        }
    }
}

/// Convenience result type.
pub type QueryResult<T> = Result<T, QueryError>;
