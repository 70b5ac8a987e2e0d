//! In-memory connector for tests.
//!
//! Serves canned rows per database and understands just enough SQL for the
//! statements the service issues: `SHOW CREATE TABLE`, `SHOW TABLES`,
//! `SELECT 1` and `... FROM db.table [UNION ALL ...]`.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use common::errors::{AppError, AppResult};
use common::models::Row;
use serde_json::{json, Value};

use crate::pool_manager::{ConnectionPool, PoolConnector, PoolHandle};

#[derive(Default)]
struct MockData {
    rows: HashMap<String, Vec<Row>>,
    ddl: HashMap<String, String>,
    tables: HashMap<String, Vec<String>>,
    failing_databases: HashSet<String>,
    failing_queries: bool,
    executed: Mutex<Vec<(String, String)>>,
    connects: AtomicUsize,
    closes: AtomicUsize,
}

pub struct MockConnector {
    data: Arc<MockData>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self {
            data: Arc::new(MockData::default()),
        }
    }

    fn data_mut(&mut self) -> &mut MockData {
        Arc::get_mut(&mut self.data).expect("mock configured after first use")
    }

    pub fn with_rows(mut self, database: &str, rows: Vec<Row>) -> Self {
        self.data_mut().rows.insert(database.to_string(), rows);
        self
    }

    pub fn with_ddl(mut self, database: &str, ddl: &str) -> Self {
        self.data_mut().ddl.insert(database.to_string(), ddl.to_string());
        self
    }

    pub fn with_tables(mut self, database: &str, tables: &[&str]) -> Self {
        self.data_mut()
            .tables
            .insert(database.to_string(), tables.iter().map(|t| t.to_string()).collect());
        self
    }

    pub fn failing_database(mut self, database: &str) -> Self {
        self.data_mut().failing_databases.insert(database.to_string());
        self
    }

    pub fn failing_queries(mut self) -> Self {
        self.data_mut().failing_queries = true;
        self
    }

    pub fn connect_count(&self) -> usize {
        self.data.connects.load(Ordering::SeqCst)
    }

    pub fn close_count(&self) -> usize {
        self.data.closes.load(Ordering::SeqCst)
    }

    /// `(database, sql)` pairs in execution order.
    pub fn executed(&self) -> Vec<(String, String)> {
        self.data.executed.lock().unwrap().clone()
    }
}

#[async_trait]
impl PoolConnector for MockConnector {
    async fn connect(&self, database: &str) -> AppResult<PoolHandle> {
        self.data.connects.fetch_add(1, Ordering::SeqCst);
        if self.data.failing_databases.contains(database) {
            return Err(AppError::DatabaseConnection(format!("{}: connection refused", database)));
        }
        // Yield so concurrent first references really interleave.
        tokio::task::yield_now().await;
        Ok(Arc::new(MockPool {
            database: database.to_string(),
            data: self.data.clone(),
        }))
    }
}

struct MockPool {
    database: String,
    data: Arc<MockData>,
}

impl MockPool {
    fn rows_for_branch(&self, branch: &str) -> Vec<Row> {
        let upper = branch.to_ascii_uppercase();
        let database = upper
            .find("FROM ")
            .map(|pos| branch[pos + 5..].trim_start())
            .and_then(|rest| rest.split_whitespace().next())
            .and_then(|name| name.split_once('.').map(|(db, _)| db.to_string()))
            .unwrap_or_else(|| self.database.clone());
        self.data.rows.get(&database).cloned().unwrap_or_default()
    }
}

#[async_trait]
impl ConnectionPool for MockPool {
    fn database(&self) -> &str {
        &self.database
    }

    async fn fetch_all(&self, sql: &str) -> AppResult<Vec<Row>> {
        self.data
            .executed
            .lock()
            .unwrap()
            .push((self.database.clone(), sql.to_string()));
        if self.data.failing_queries {
            return Err(AppError::DatabaseQuery("Table doesn't exist".into()));
        }

        let upper = sql.trim().to_ascii_uppercase();
        if let Some(rest) = upper.strip_prefix("SHOW CREATE TABLE") {
            let table = rest.trim().trim_matches('`').to_lowercase();
            let ddl = self
                .data
                .ddl
                .get(&self.database)
                .cloned()
                .ok_or_else(|| AppError::DatabaseQuery(format!("Table '{}' doesn't exist", table)))?;
            let row = json!({ "Table": table, "Create Table": ddl });
            return Ok(vec![row.as_object().cloned().unwrap_or_default()]);
        }
        if upper.starts_with("SHOW TABLES") {
            let column = format!("Tables_in_{}", self.database);
            return Ok(self
                .data
                .tables
                .get(&self.database)
                .map(|tables| {
                    tables
                        .iter()
                        .map(|t| {
                            let mut row = Row::new();
                            row.insert(column.clone(), Value::String(t.clone()));
                            row
                        })
                        .collect()
                })
                .unwrap_or_default());
        }
        if upper == "SELECT 1" {
            let mut row = Row::new();
            row.insert("1".into(), json!(1));
            return Ok(vec![row]);
        }

        let mut rows = Vec::new();
        let mut rest = sql;
        loop {
            match rest.to_ascii_uppercase().find("UNION ALL") {
                Some(pos) => {
                    rows.extend(self.rows_for_branch(&rest[..pos]));
                    rest = &rest[pos + "UNION ALL".len()..];
                }
                None => {
                    rows.extend(self.rows_for_branch(rest));
                    break;
                }
            }
        }
        Ok(rows)
    }

    async fn close(&self) {
        self.data.closes.fetch_add(1, Ordering::SeqCst);
    }
}

/// Builds a row from `(column, value)` pairs.
pub fn row(pairs: &[(&str, Value)]) -> Row {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}
