//! Error types and error kinds for the executor.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use querygate::QueryError;

/// Caller-facing classification carried by every failure result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    MalformedQuery,
    UnbalancedDelimiters,
    ArgumentParseError,
    UnsupportedOperation,
    TargetUnavailable,
    StoreExecutionError,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::MalformedQuery => "MalformedQuery",
            ErrorKind::UnbalancedDelimiters => "UnbalancedDelimiters",
            ErrorKind::ArgumentParseError => "ArgumentParseError",
            ErrorKind::UnsupportedOperation => "UnsupportedOperation",
            ErrorKind::TargetUnavailable => "TargetUnavailable",
            ErrorKind::StoreExecutionError => "StoreExecutionError",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure reported by a store binding, message kept verbatim.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct StoreError {
    pub message: String,
}

impl StoreError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Failure resolving a target id.
#[derive(thiserror::Error, Debug)]
pub enum RegistryError {
    #[error("Unknown target: {0}")]
    NotFound(String),

    #[error("Failed to read target file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid target file: {0}")]
    Json(#[from] serde_json::Error),
}

pub type RegistryResult<T> = Result<T, RegistryError>;

/// All errors that can occur while executing a query.
#[derive(thiserror::Error, Debug)]
pub enum ExecError {
    #[error(transparent)]
    Query(#[from] QueryError),

    #[error("Target '{target}' unavailable: {reason}")]
    TargetUnavailable { target: String, reason: String },

    #[error("{0}")]
    StoreExecution(String),

    #[error("Query exceeded its deadline of {} ms", .0.as_millis())]
    DeadlineExceeded(Duration),
}

impl ExecError {
    pub fn unavailable(target: &str, reason: impl std::fmt::Display) -> Self {
        ExecError::TargetUnavailable {
            target: target.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ExecError::Query(QueryError::MalformedQuery(_)) => ErrorKind::MalformedQuery,
            ExecError::Query(QueryError::UnbalancedDelimiters { .. }) => {
                ErrorKind::UnbalancedDelimiters
            }
            ExecError::Query(QueryError::ArgumentParse { .. }) => ErrorKind::ArgumentParseError,
            ExecError::Query(QueryError::UnsupportedOperation(_)) => {
                ErrorKind::UnsupportedOperation
            }
            ExecError::TargetUnavailable { .. } => ErrorKind::TargetUnavailable,
            ExecError::StoreExecution(_) | ExecError::DeadlineExceeded(_) => {
                ErrorKind::StoreExecutionError
            }
        }
    }

    /// True for errors raised before any connection was requested.
    pub fn is_pre_network(&self) -> bool {
        matches!(self, ExecError::Query(_))
    }
}

impl From<StoreError> for ExecError {
    fn from(e: StoreError) -> Self {
        ExecError::StoreExecution(e.message)
    }
}

pub type ExecResult<T> = Result<T, ExecError>;
