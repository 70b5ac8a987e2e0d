//! Shared data models.

pub mod query;
pub mod target;

// Re-export commonly used types
pub use query::{QueryRequest, QueryResult, Row};
pub use target::{database_of, TargetTable};
