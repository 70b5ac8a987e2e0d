//! Multi-target query router.
//!
//! Maps a validated read query onto the pools of the configured targets and
//! aggregates the rows. SQL text is never rewritten.

use std::sync::Arc;
use std::time::Instant;

use clap::ValueEnum;
use common::errors::{AppError, AppResult};
use common::models::{QueryResult, TargetTable};
use common::utils::SqlValidator;

use crate::pool_manager::PoolRegistry;

/// How a query is spread over several targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum DispatchPolicy {
    /// Run the query on every target's pool, concatenate rows in target order.
    FanOut,
    /// Run the query once on the first target's pool; the caller writes the
    /// `UNION ALL` across `dbX.table` references itself.
    CallerUnion,
}

impl std::fmt::Display for DispatchPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DispatchPolicy::FanOut => write!(f, "fan-out"),
            DispatchPolicy::CallerUnion => write!(f, "caller-union"),
        }
    }
}

pub struct QueryRouter {
    registry: Arc<PoolRegistry>,
    targets: Vec<TargetTable>,
    policy: DispatchPolicy,
}

impl QueryRouter {
    /// # Errors
    /// `AppError::Config` when `targets` is empty.
    pub fn new(
        registry: Arc<PoolRegistry>,
        targets: Vec<TargetTable>,
        policy: DispatchPolicy,
    ) -> AppResult<Self> {
        if targets.is_empty() {
            return Err(AppError::Config("至少需要配置一个目标表".into()));
        }
        Ok(Self {
            registry,
            targets,
            policy,
        })
    }

    pub fn targets(&self) -> &[TargetTable] {
        &self.targets
    }

    pub fn policy(&self) -> DispatchPolicy {
        self.policy
    }

    /// The target whose structure stands in for all of them.
    pub fn representative(&self) -> &TargetTable {
        &self.targets[0]
    }

    /// Targets a query is dispatched to under the current policy.
    pub fn dispatch_targets(&self) -> &[TargetTable] {
        match self.policy {
            DispatchPolicy::FanOut => &self.targets,
            DispatchPolicy::CallerUnion => &self.targets[..1],
        }
    }

    /// Validates and executes `sql`.
    ///
    /// Validation happens before any pool is touched. Any database failure
    /// is logged and returned as-is; rows already fetched from earlier
    /// targets are discarded.
    pub async fn execute(&self, sql: &str) -> AppResult<QueryResult> {
        let sql = SqlValidator::validate_select(sql)?;
        let start = Instant::now();
        let mut result = QueryResult::empty();

        for target in self.dispatch_targets() {
            let pool = self.registry.acquire_target(target).await?;
            let rows = pool.fetch_all(sql).await.map_err(|e| {
                tracing::error!(table = %target, error = %e, "查询执行失败");
                e
            })?;
            tracing::debug!(table = %target, pool = pool.database(), rows = rows.len(), "查询完成");
            result.extend_from_target(rows);
        }

        result.execution_time_ms = start.elapsed().as_millis() as u64;
        tracing::info!(
            policy = %self.policy,
            targets = result.targets_queried,
            rows = result.row_count,
            elapsed_ms = result.execution_time_ms,
            "查询已执行"
        );
        Ok(result)
    }
}
