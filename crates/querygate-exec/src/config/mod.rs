//! Configuration loading and resolution.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use querygate::DEFAULT_FIND_LIMIT;

/// Env var naming the target file.
pub const TARGETS_ENV: &str = "QUERYGATE_TARGETS";

/// Tunables for a [`crate::QueryExecutor`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Upper bound on establishing a new connection.
    pub connect_timeout_ms: u64,
    /// Upper bound on running one operation once connected.
    pub execution_deadline_ms: u64,
    /// Cap applied to `find` when no `.limit()` is chained.
    pub default_find_limit: i64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 5_000,
            execution_deadline_ms: 30_000,
            default_find_limit: DEFAULT_FIND_LIMIT,
        }
    }
}

impl ExecutorConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn execution_deadline(&self) -> Duration {
        Duration::from_millis(self.execution_deadline_ms)
    }
}

/// Resolve the target file path.
pub fn resolve_targets_path(explicit: Option<&str>) -> String {
    if let Some(path) = explicit {
        return path.to_string();
    }

    if let Ok(env_path) = std::env::var(TARGETS_ENV) {
        return env_path;
    }

    let cwd_targets = PathBuf::from(".querygate/targets.json");
    if cwd_targets.exists() {
        return cwd_targets.display().to_string();
    }

    resolve_default_targets_path()
}

fn resolve_default_targets_path() -> String {
    let home = std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .unwrap_or_else(|_| ".".to_string());

    format!("{home}/.querygate/targets.json")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ExecutorConfig::default();
        assert_eq!(config.connect_timeout(), Duration::from_secs(5));
        assert_eq!(config.execution_deadline(), Duration::from_secs(30));
        assert_eq!(config.default_find_limit, 100);
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let config: ExecutorConfig = serde_json::from_str(r#"{"default_find_limit": 20}"#).unwrap();
        assert_eq!(config.default_find_limit, 20);
        assert_eq!(config.connect_timeout_ms, 5_000);
    }

    #[test]
    fn test_explicit_path_wins() {
        assert_eq!(resolve_targets_path(Some("/tmp/t.json")), "/tmp/t.json");
    }
}
