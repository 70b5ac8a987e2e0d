//! Application error types.
//!
//! Every failure a tool invocation can surface maps onto one `AppError`
//! variant. Validation-class errors are raised before any database contact.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

use crate::response::ApiResponse;

/// Result alias used across all crates.
pub type AppResult<T> = Result<T, AppError>;

/// Unified error type.
#[derive(Debug, Error)]
pub enum AppError {
    /// Malformed arguments supplied by the caller.
    #[error("参数校验失败: {0}")]
    Validation(String),

    /// Statement rejected by the read-only guard.
    #[error("只允许 SELECT 查询: {0}")]
    NotReadQuery(String),

    /// Startup / target configuration problem.
    #[error("配置错误: {0}")]
    Config(String),

    /// Pool creation or connection acquisition failed.
    #[error("数据库连接失败: {0}")]
    DatabaseConnection(String),

    /// Statement execution failed.
    #[error("数据库查询失败: {0}")]
    DatabaseQuery(String),

    /// Configured targets do not share one table structure.
    #[error("表结构不一致: {0}")]
    SchemaMismatch(String),

    /// Requested resource URI is not served.
    #[error("未知的资源路径: {0}")]
    UnknownResource(String),

    /// A message was posted for an SSE session that is not open.
    #[error("会话不存在: {0}")]
    SessionNotFound(String),

    /// Requested tool is not registered.
    #[error("未知的工具: {0}")]
    UnknownTool(String),

    /// A delegated collaborator (report backend) failed.
    #[error("外部服务错误: {0}")]
    ExternalService(String),

    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),

    #[error("内部错误: {0}")]
    Internal(String),
}

impl AppError {
    /// Stable error code for clients.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Validation(_) => "VALIDATION_ERROR",
            AppError::NotReadQuery(_) => "NOT_READ_QUERY",
            AppError::Config(_) => "CONFIG_ERROR",
            AppError::DatabaseConnection(_) => "DATABASE_CONNECTION_ERROR",
            AppError::DatabaseQuery(_) => "DATABASE_QUERY_ERROR",
            AppError::SchemaMismatch(_) => "SCHEMA_MISMATCH",
            AppError::UnknownResource(_) => "UNKNOWN_RESOURCE",
            AppError::SessionNotFound(_) => "SESSION_NOT_FOUND",
            AppError::UnknownTool(_) => "UNKNOWN_TOOL",
            AppError::ExternalService(_) => "EXTERNAL_SERVICE_ERROR",
            AppError::Io(_) => "IO_ERROR",
            AppError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// True for errors reported before any database round-trip.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            AppError::Validation(_)
                | AppError::NotReadQuery(_)
                | AppError::Config(_)
                | AppError::UnknownResource(_)
                | AppError::SessionNotFound(_)
                | AppError::UnknownTool(_)
        )
    }

    fn status(&self) -> StatusCode {
        match self {
            AppError::Validation(_)
            | AppError::NotReadQuery(_)
            | AppError::UnknownTool(_) => StatusCode::BAD_REQUEST,
            AppError::UnknownResource(_) | AppError::SessionNotFound(_) => StatusCode::NOT_FOUND,
            AppError::DatabaseConnection(_) | AppError::ExternalService(_) => {
                StatusCode::BAD_GATEWAY
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => AppError::DatabaseConnection(err.to_string()),
            other => AppError::DatabaseQuery(other.to_string()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(code = self.code(), error = %self, "请求处理失败");
        }
        let body = ApiResponse::err(self.code(), self.to_string());
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_class() {
        assert!(AppError::NotReadQuery("DROP".into()).is_validation());
        assert!(AppError::Config("x".into()).is_validation());
        assert!(!AppError::DatabaseQuery("x".into()).is_validation());
    }

    #[test]
    fn test_pool_timeout_is_connection_error() {
        let err: AppError = sqlx::Error::PoolTimedOut.into();
        assert_eq!(err.code(), "DATABASE_CONNECTION_ERROR");

        let err: AppError = sqlx::Error::RowNotFound.into();
        assert_eq!(err.code(), "DATABASE_QUERY_ERROR");
    }

    #[test]
    fn test_status_mapping() {
        let resp = AppError::UnknownResource("memo://x".into()).into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}
