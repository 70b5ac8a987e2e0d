//! Target table models.
//!
//! A target is one physical `database.table` the service reads from. When
//! several are configured they are shards with one shared table structure.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::errors::{AppError, AppResult};

/// A fully-qualified `database.table` reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
pub struct TargetTable {
    /// Database (schema) name; selects the connection pool.
    pub database: String,
    /// Table name inside that database.
    pub table: String,
}

impl TargetTable {
    /// Creates a target from its parts.
    pub fn new(database: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            table: table.into(),
        }
    }

    /// Parses `database.table`, splitting on the first `.`.
    ///
    /// # Errors
    /// Returns `AppError::Config` when the separator is missing or either
    /// side is empty.
    pub fn parse(qualified: &str) -> AppResult<Self> {
        let qualified = qualified.trim();
        let (database, table) = qualified.split_once('.').ok_or_else(|| {
            AppError::Config(format!("目标表必须是 database.table 格式: {}", qualified))
        })?;
        if database.is_empty() || table.is_empty() {
            return Err(AppError::Config(format!(
                "目标表的库名和表名都不能为空: {}",
                qualified
            )));
        }
        Ok(Self::new(database, table))
    }

    /// `database.table` form.
    pub fn qualified(&self) -> String {
        format!("{}.{}", self.database, self.table)
    }
}

impl std::fmt::Display for TargetTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.database, self.table)
    }
}

/// Extracts the database portion of a bare or qualified name.
pub fn database_of(name: &str) -> &str {
    match name.split_once('.') {
        Some((database, _)) => database,
        None => name,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_splits_on_first_dot() {
        let target = TargetTable::parse("test1.wx.record").unwrap();
        assert_eq!(target.database, "test1");
        assert_eq!(target.table, "wx.record");
    }

    #[test]
    fn test_missing_separator_is_config_error() {
        let err = TargetTable::parse("onlytablename").unwrap_err();
        assert!(matches!(err, AppError::Config(_)));
    }

    #[test]
    fn test_empty_side_rejected() {
        assert!(TargetTable::parse(".wx_record").is_err());
        assert!(TargetTable::parse("test1.").is_err());
    }

    #[test]
    fn test_database_of() {
        assert_eq!(database_of("test1.wx_record"), "test1");
        assert_eq!(database_of("test1"), "test1");
    }
}
