//! SQL statement validator.
//!
//! Read-only guard applied before any statement reaches a pool.
//!
//! This is a syntactic prefix check only: it does not parse the statement,
//! and a `SELECT` that calls a function with side effects still passes.
//! Multi-statement payloads are additionally refused by the server because
//! statements are sent as single prepared statements.

use crate::errors::{AppError, AppResult};

/// Validates SQL statements for read-only use.
pub struct SqlValidator;

impl SqlValidator {
    /// Accepts `sql` only if its trimmed, upper-cased text starts with `SELECT`.
    ///
    /// # Returns
    /// The statement text, untouched.
    ///
    /// # Errors
    /// Returns `AppError::NotReadQuery` for any other leading token.
    pub fn validate_select(sql: &str) -> AppResult<&str> {
        if Self::is_select(sql) {
            Ok(sql)
        } else {
            Err(AppError::NotReadQuery(Self::leading_token(sql)))
        }
    }

    /// Checks if the SQL is a SELECT query.
    pub fn is_select(sql: &str) -> bool {
        sql.trim().to_uppercase().starts_with("SELECT")
    }

    fn leading_token(sql: &str) -> String {
        match sql.split_whitespace().next() {
            Some(token) => token.chars().take(32).collect::<String>().to_uppercase(),
            None => "<empty>".to_string(),
        }
    }
}
