//! SQL query models.
//!
//! Contains the argument and result shapes of the read-only query tools.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// One result row: column name to JSON value, in column order.
pub type Row = serde_json::Map<String, serde_json::Value>;

/// Arguments of the `query` and `report` tools.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct QueryRequest {
    /// SQL statement; must start with SELECT.
    pub query: String,
}

/// Rows collected from one or more targets.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct QueryResult {
    /// Rows in database order, concatenated in target order.
    #[schema(value_type = Vec<Object>)]
    pub rows: Vec<Row>,

    /// Number of rows returned.
    pub row_count: usize,

    /// Number of targets the statement was dispatched to.
    pub targets_queried: usize,

    /// Wall time spent in the database, in milliseconds.
    #[serde(default)]
    pub execution_time_ms: u64,
}

impl QueryResult {
    /// Creates a new empty query result.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Appends rows from one target.
    pub fn extend_from_target(&mut self, rows: Vec<Row>) {
        self.row_count += rows.len();
        self.targets_queried += 1;
        self.rows.extend(rows);
    }
}
