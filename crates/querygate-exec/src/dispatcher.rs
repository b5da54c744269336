//! Query executor: plans a query, runs it on a cached handle, shapes the result.

use std::sync::Arc;
use std::time::{Duration, Instant};

use bson::Bson;

use querygate::{apply_post_path, plan_query, Operation, Plan, QueryPreview, QueryResult};

use crate::cache::ConnectionCache;
use crate::config::ExecutorConfig;
use crate::registry::TargetRegistry;
use crate::store::{MongoConnector, StoreConnector};
use crate::types::{ExecError, ExecResult, ExecutionResult};

/// Shared entry point for running shell-syntax queries against named targets.
///
/// `Send + Sync`; share one instance behind an `Arc`.
pub struct QueryExecutor {
    cache: ConnectionCache,
    config: ExecutorConfig,
}

impl QueryExecutor {
    pub fn new(
        registry: Arc<dyn TargetRegistry>,
        connector: Arc<dyn StoreConnector>,
        config: ExecutorConfig,
    ) -> Self {
        let cache = ConnectionCache::new(registry, connector, config.connect_timeout());
        Self { cache, config }
    }

    /// Executor backed by the MongoDB driver.
    pub fn with_mongo(registry: Arc<dyn TargetRegistry>, config: ExecutorConfig) -> Self {
        Self::new(registry, Arc::new(MongoConnector::new()), config)
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    pub fn cache(&self) -> &ConnectionCache {
        &self.cache
    }

    /// Run `query_text` against `target_id` under the configured deadline.
    pub async fn execute(&self, target_id: &str, query_text: &str) -> ExecutionResult {
        self.execute_with_deadline(target_id, query_text, self.config.execution_deadline())
            .await
    }

    /// Run `query_text` against `target_id`, failing once `deadline` elapses.
    pub async fn execute_with_deadline(
        &self,
        target_id: &str,
        query_text: &str,
        deadline: Duration,
    ) -> ExecutionResult {
        let started = Instant::now();
        match self.try_execute(target_id, query_text, deadline).await {
            Ok(data) => {
                let result = ExecutionResult::success(data, started.elapsed());
                tracing::debug!(
                    "Query on '{target_id}' returned {} row(s) in {:?}",
                    result.row_count().unwrap_or_default(),
                    started.elapsed()
                );
                result
            }
            Err(e) => {
                if e.is_pre_network() {
                    tracing::debug!("Rejected query for '{target_id}': {e}");
                } else {
                    tracing::error!("Query on '{target_id}' failed: {e}");
                }
                ExecutionResult::failure(&e)
            }
        }
    }

    async fn try_execute(
        &self,
        target_id: &str,
        query_text: &str,
        deadline: Duration,
    ) -> ExecResult<Bson> {
        let plan = plan_query(query_text, self.config.default_find_limit)?;
        let handle = self.cache.acquire(target_id).await?;

        tracing::info!(
            "Executing {} on '{target_id}'{}",
            plan.operation.kind().as_str(),
            plan.operation
                .collection()
                .map(|c| format!(" ({c})"))
                .unwrap_or_default()
        );

        let raw = tokio::time::timeout(deadline, handle.run(&plan.operation))
            .await
            .map_err(|_| ExecError::DeadlineExceeded(deadline))??;

        Ok(shape_output(&plan, raw))
    }

    /// Describe what `query_text` would run, without connecting.
    pub fn inspect(&self, query_text: &str) -> QueryResult<QueryPreview> {
        plan_query(query_text, self.config.default_find_limit).map(|plan| plan.preview())
    }

    /// Connect to `target_id` and list its collections.
    pub async fn probe_target(&self, target_id: &str) -> ExecResult<Vec<String>> {
        let handle = self.cache.acquire(target_id).await?;
        let deadline = self.config.execution_deadline();
        let names = tokio::time::timeout(deadline, handle.list_collections())
            .await
            .map_err(|_| ExecError::DeadlineExceeded(deadline))??;
        tracing::info!("Target '{target_id}' has {} collection(s)", names.len());
        Ok(names)
    }

    /// Close one target's cached connection. Returns whether one was open.
    pub async fn close_connection(&self, target_id: &str) -> bool {
        self.cache.close(target_id).await
    }

    /// Close every cached connection.
    pub async fn close_all(&self) {
        self.cache.close_all().await
    }
}

/// Apply the post-process path, or unwrap `inprog` for a bare `currentOp`.
fn shape_output(plan: &Plan, raw: Bson) -> Bson {
    if let Some(path) = &plan.post_process {
        return apply_post_path(raw, path).unwrap_or(Bson::Null);
    }
    match (&plan.operation, raw) {
        (Operation::CurrentOp(_), Bson::Document(mut response)) => response
            .remove("inprog")
            .unwrap_or(Bson::Array(Vec::new())),
        (_, raw) => raw,
    }
}
