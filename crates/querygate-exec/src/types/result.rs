//! The uniform result returned for every query.

use std::time::Duration;

use bson::Bson;
use serde::{Deserialize, Serialize};

use super::error::{ErrorKind, ExecError};

/// Outcome of one `execute` call. Never an `Err`: failures are data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ExecutionResult {
    Success {
        /// Relaxed extended JSON rendering of the store's response.
        data: serde_json::Value,
        elapsed_millis: u64,
        /// Array length, or 1 for any other value.
        row_count: usize,
    },
    Failure {
        error_kind: ErrorKind,
        message: String,
    },
}

impl ExecutionResult {
    pub fn success(data: Bson, elapsed: Duration) -> Self {
        let row_count = match &data {
            Bson::Array(items) => items.len(),
            _ => 1,
        };
        ExecutionResult::Success {
            data: data.into_relaxed_extjson(),
            elapsed_millis: elapsed.as_millis() as u64,
            row_count,
        }
    }

    pub fn failure(error: &ExecError) -> Self {
        ExecutionResult::Failure {
            error_kind: error.kind(),
            message: error.to_string(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ExecutionResult::Success { .. })
    }

    pub fn data(&self) -> Option<&serde_json::Value> {
        match self {
            ExecutionResult::Success { data, .. } => Some(data),
            ExecutionResult::Failure { .. } => None,
        }
    }

    pub fn row_count(&self) -> Option<usize> {
        match self {
            ExecutionResult::Success { row_count, .. } => Some(*row_count),
            ExecutionResult::Failure { .. } => None,
        }
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        match self {
            ExecutionResult::Success { .. } => None,
            ExecutionResult::Failure { error_kind, .. } => Some(*error_kind),
        }
    }

    pub fn message(&self) -> Option<&str> {
        match self {
            ExecutionResult::Success { .. } => None,
            ExecutionResult::Failure { message, .. } => Some(message),
        }
    }
}
