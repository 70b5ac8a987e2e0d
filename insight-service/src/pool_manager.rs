//! Database connection pool registry.
//!
//! Owns one pool per database name. Pools are created lazily on first
//! reference and torn down together at shutdown. The pool itself (connection
//! reuse, acquire timeout) is sqlx's; this module only keys and caches them.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use common::config::{DatabaseConfig, PoolSettings};
use common::errors::{AppError, AppResult};
use common::models::{database_of, Row, TargetTable};
use serde_json::Value;
use sqlx::mysql::{MySqlPoolOptions, MySqlRow};
use sqlx::types::chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use sqlx::{Column, MySqlPool, Row as _, TypeInfo, ValueRef};
use tokio::sync::Mutex;

/// Shared handle to one database's pool.
pub type PoolHandle = Arc<dyn ConnectionPool>;

/// A pooled set of connections to a single database.
#[async_trait]
pub trait ConnectionPool: Send + Sync {
    /// Database this pool is bound to.
    fn database(&self) -> &str;

    /// Checks out one connection, runs `sql` verbatim and returns every row.
    async fn fetch_all(&self, sql: &str) -> AppResult<Vec<Row>>;

    /// Closes the pool and waits for checked-out connections to drain.
    async fn close(&self);
}

/// Opens pools. The only component that touches the network.
#[async_trait]
pub trait PoolConnector: Send + Sync {
    async fn connect(&self, database: &str) -> AppResult<PoolHandle>;
}

// ============== Registry ==============

/// Database-name keyed pool cache.
///
/// At most one pool exists per database name. The map lock is held across
/// pool creation so two concurrent first references cannot both connect.
pub struct PoolRegistry {
    connector: Arc<dyn PoolConnector>,
    pools: Mutex<HashMap<String, PoolHandle>>,
}

impl PoolRegistry {
    pub fn new(connector: Arc<dyn PoolConnector>) -> Self {
        Self {
            connector,
            pools: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the pool for `database`, creating it on first use.
    pub async fn pool_for_database(&self, database: &str) -> AppResult<PoolHandle> {
        let database = database.trim();
        if database.is_empty() {
            return Err(AppError::Config("数据库名称不能为空".into()));
        }

        // Lookups of other databases wait behind a slow first connect. Every
        // target connects during warm-up, before the first tool call.
        let mut pools = self.pools.lock().await;
        if let Some(pool) = pools.get(database) {
            return Ok(pool.clone());
        }

        let pool = self.connector.connect(database).await.map_err(|e| {
            tracing::error!(database = %database, error = %e, "连接池创建失败");
            e
        })?;
        pools.insert(database.to_string(), pool.clone());
        tracing::info!(database = %database, pools = pools.len(), "连接池已创建");
        Ok(pool)
    }

    /// Resolves a bare database name or a `database.table` name.
    pub async fn acquire(&self, name: &str) -> AppResult<PoolHandle> {
        self.pool_for_database(database_of(name.trim())).await
    }

    pub async fn acquire_target(&self, target: &TargetTable) -> AppResult<PoolHandle> {
        self.pool_for_database(&target.database).await
    }

    /// Opens the pools of every configured target up front.
    pub async fn warm_up(&self, targets: &[TargetTable]) -> AppResult<()> {
        for target in targets {
            self.acquire_target(target).await?;
        }
        Ok(())
    }

    /// Number of live pools.
    pub async fn pool_count(&self) -> usize {
        self.pools.lock().await.len()
    }

    /// Database names with a live pool, sorted.
    pub async fn databases(&self) -> Vec<String> {
        let mut names: Vec<String> = self.pools.lock().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Closes every pool. Calling it again is a no-op.
    pub async fn close_all(&self) {
        let drained: Vec<(String, PoolHandle)> = self.pools.lock().await.drain().collect();
        for (database, pool) in drained {
            pool.close().await;
            tracing::info!(database = %database, "连接池已关闭");
        }
    }
}

// ============== MySQL ==============

/// Creates sqlx MySQL pools from the process-wide `DatabaseConfig`.
pub struct MySqlConnector {
    config: DatabaseConfig,
    settings: PoolSettings,
}

impl MySqlConnector {
    pub fn new(config: DatabaseConfig, settings: PoolSettings) -> Self {
        Self { config, settings }
    }
}

#[async_trait]
impl PoolConnector for MySqlConnector {
    async fn connect(&self, database: &str) -> AppResult<PoolHandle> {
        let pool = MySqlPoolOptions::new()
            .max_connections(self.settings.max_connections)
            .acquire_timeout(self.settings.acquire_timeout)
            .after_connect(|conn, _meta| {
                Box::pin(async move {
                    sqlx::query("SET autocommit = 1").execute(conn).await?;
                    Ok(())
                })
            })
            .connect_with(self.config.connect_options(database))
            .await
            .map_err(|e| AppError::DatabaseConnection(format!("{}: {}", database, e)))?;

        Ok(Arc::new(MySqlConnectionPool {
            database: database.to_string(),
            pool,
        }))
    }
}

/// sqlx pool bound to one database.
pub struct MySqlConnectionPool {
    database: String,
    pool: MySqlPool,
}

#[async_trait]
impl ConnectionPool for MySqlConnectionPool {
    fn database(&self) -> &str {
        &self.database
    }

    async fn fetch_all(&self, sql: &str) -> AppResult<Vec<Row>> {
        let mut conn = self.pool.acquire().await?;
        // Prepared, so a payload carrying a second statement is refused by the server.
        let rows = sqlx::query(sql)
            .persistent(false)
            .fetch_all(&mut *conn)
            .await?;
        Ok(rows.iter().map(decode_row).collect())
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

// ---- row decoding ----

/// Converts a driver row into a column-name keyed JSON map.
fn decode_row(row: &MySqlRow) -> Row {
    let mut out = Row::new();
    for (idx, column) in row.columns().iter().enumerate() {
        let value = decode_column(row, idx, column.type_info().name());
        out.insert(column.name().to_string(), value);
    }
    out
}

fn decode_column(row: &MySqlRow, idx: usize, type_name: &str) -> Value {
    match row.try_get_raw(idx) {
        Ok(raw) if !raw.is_null() => {}
        _ => return Value::Null,
    }

    let decoded = match type_name {
        "BOOLEAN" => row.try_get::<bool, _>(idx).ok().map(Value::Bool),
        t if t.ends_with("UNSIGNED") => row.try_get_unchecked::<u64, _>(idx).ok().map(Value::from),
        "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "BIGINT" | "YEAR" => {
            row.try_get_unchecked::<i64, _>(idx).ok().map(Value::from)
        }
        "FLOAT" | "DOUBLE" => row.try_get_unchecked::<f64, _>(idx).ok().map(float_value),
        "DECIMAL" => row
            .try_get_unchecked::<String, _>(idx)
            .ok()
            .map(|s| s.parse::<f64>().map(float_value).unwrap_or(Value::String(s))),
        "DATETIME" | "TIMESTAMP" => row
            .try_get_unchecked::<NaiveDateTime, _>(idx)
            .ok()
            .map(|v| Value::String(v.format("%Y-%m-%d %H:%M:%S").to_string())),
        "DATE" => row
            .try_get_unchecked::<NaiveDate, _>(idx)
            .ok()
            .map(|v| Value::String(v.format("%Y-%m-%d").to_string())),
        "TIME" => row
            .try_get_unchecked::<NaiveTime, _>(idx)
            .ok()
            .map(|v| Value::String(v.format("%H:%M:%S").to_string())),
        "JSON" => row.try_get_unchecked::<Value, _>(idx).ok(),
        "BINARY" | "VARBINARY" | "TINYBLOB" | "BLOB" | "MEDIUMBLOB" | "LONGBLOB" | "BIT"
        | "GEOMETRY" => row
            .try_get_unchecked::<Vec<u8>, _>(idx)
            .ok()
            .map(|bytes| Value::String(String::from_utf8_lossy(&bytes).into_owned())),
        _ => None,
    };

    decoded
        .or_else(|| row.try_get_unchecked::<String, _>(idx).ok().map(Value::String))
        .unwrap_or(Value::Null)
}

fn float_value(v: f64) -> Value {
    serde_json::Number::from_f64(v)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}
