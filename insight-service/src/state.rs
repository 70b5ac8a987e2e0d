//! Server context.
//!
//! Constructed once at startup and shared by both transports.

use std::sync::Arc;

use common::errors::AppResult;

use crate::cli::ServerOptions;
use crate::mcp::McpDispatcher;
use crate::pool_manager::{PoolConnector, PoolRegistry};
use crate::report::ReportGenerator;
use crate::router::QueryRouter;
use crate::schema::{SchemaIntrospector, SchemaSnapshot};
use crate::service::InsightService;

pub struct ServerContext {
    pub registry: Arc<PoolRegistry>,
    pub service: Arc<InsightService>,
    pub snapshot: SchemaSnapshot,
    pub options: ServerOptions,
}

impl ServerContext {
    pub fn new(
        options: ServerOptions,
        connector: Arc<dyn PoolConnector>,
        reporter: Arc<dyn ReportGenerator>,
    ) -> AppResult<Self> {
        let registry = Arc::new(PoolRegistry::new(connector));
        let router = QueryRouter::new(registry.clone(), options.targets.clone(), options.dispatch)?;
        let schema = SchemaIntrospector::new(registry.clone(), options.targets.clone());
        let service = Arc::new(InsightService::new(
            router,
            schema,
            reporter,
            options.description.clone(),
        ));

        Ok(Self {
            registry,
            service,
            snapshot: SchemaSnapshot::in_dir(&options.snapshot_dir),
            options,
        })
    }

    /// Opens a pool per target database, optionally checks that all target
    /// tables share one structure, then writes the DDL snapshot and builds
    /// the dispatcher from it. A snapshot that cannot be fetched or written
    /// only drops the schema section from the tool descriptions.
    pub async fn start(&self) -> AppResult<McpDispatcher> {
        self.registry.warm_up(&self.options.targets).await?;

        if self.options.verify_schema {
            self.service.schema().verify_identical().await?;
        }

        let representative = self.service.router().representative().clone();
        let schema_ddl = match self.service.schema().fetch_ddl(&representative).await {
            Ok(ddl) => match self.snapshot.write(&ddl).await {
                Ok(()) => self.snapshot.read(),
                Err(e) => {
                    tracing::warn!(
                        path = %self.snapshot.path().display(),
                        error = %e,
                        "无法写入表结构快照，工具描述中将不包含 DDL"
                    );
                    None
                }
            },
            Err(e) => {
                tracing::warn!(table = %representative, error = %e, "无法获取表结构，工具描述中将不包含 DDL");
                None
            }
        };

        Ok(McpDispatcher::new(self.service.clone(), schema_ddl.as_deref()))
    }

    pub async fn shutdown(&self) {
        self.registry.close_all().await;
        tracing::info!("所有连接池已关闭");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::{DbMode, Transport};
    use crate::report::{PromptReportGenerator, ReportBackend};
    use crate::router::DispatchPolicy;
    use crate::testing::MockConnector;
    use common::errors::AppError;
    use common::models::TargetTable;
    use std::path::PathBuf;

    fn options(databases: &[&str], verify_schema: bool, snapshot_dir: PathBuf) -> ServerOptions {
        ServerOptions {
            mode: if databases.len() > 1 { DbMode::CrossDb } else { DbMode::SingleDb },
            targets: databases.iter().map(|db| TargetTable::new(*db, "wx_record")).collect(),
            description: "测试群".into(),
            dispatch: DispatchPolicy::FanOut,
            verify_schema,
            report_backend: ReportBackend::Prompt,
            ollama_url: "http://localhost:11434".into(),
            ollama_model: "deepseek-r1:latest".into(),
            transport: Transport::Stdio,
            host: "127.0.0.1".into(),
            port: 8000,
            sse_path: "/mcp-wx-chatinsight/sse".into(),
            snapshot_dir,
        }
    }

    fn scratch_dir(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("chatinsight-{}-{}", name, std::process::id()))
    }

    #[tokio::test]
    async fn test_start_writes_snapshot_into_tool_descriptions() {
        let dir = scratch_dir("start");
        let connector = Arc::new(
            MockConnector::new().with_ddl("test1", "CREATE TABLE `wx_record` (`id` bigint)"),
        );
        let ctx = ServerContext::new(
            options(&["test1"], false, dir.clone()),
            connector.clone(),
            Arc::new(PromptReportGenerator),
        )
        .unwrap();

        let dispatcher = ctx.start().await.unwrap();

        assert_eq!(connector.connect_count(), 1);
        let query = dispatcher.tools().get("query").unwrap();
        assert!(query.description.contains("CREATE TABLE `wx_record`"));

        ctx.shutdown().await;
        assert_eq!(connector.close_count(), 1);
        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn test_unwritable_snapshot_dir_degrades() {
        let blocker = scratch_dir("blocker");
        std::fs::write(&blocker, "not a directory").unwrap();
        let connector = Arc::new(
            MockConnector::new().with_ddl("test1", "CREATE TABLE `wx_record` (`id` bigint)"),
        );
        let ctx = ServerContext::new(
            options(&["test1"], false, blocker.join("snapshots")),
            connector,
            Arc::new(PromptReportGenerator),
        )
        .unwrap();

        let dispatcher = ctx.start().await.unwrap();

        let query = dispatcher.tools().get("query").unwrap();
        assert!(!query.description.contains("CREATE TABLE"));
        assert!(!query.description.contains("表结构："));
        let _ = std::fs::remove_file(blocker);
    }

    #[tokio::test]
    async fn test_verify_schema_mismatch_aborts_start() {
        let connector = Arc::new(
            MockConnector::new()
                .with_ddl("test1", "CREATE TABLE `wx_record` (`id` bigint)")
                .with_ddl("test2", "CREATE TABLE `wx_record` (`id` int)"),
        );
        let ctx = ServerContext::new(
            options(&["test1", "test2"], true, scratch_dir("verify")),
            connector,
            Arc::new(PromptReportGenerator),
        )
        .unwrap();

        let err = ctx.start().await.err().unwrap();
        assert!(matches!(err, AppError::SchemaMismatch(_)));
    }

    #[tokio::test]
    async fn test_unreachable_database_aborts_start() {
        let connector = Arc::new(MockConnector::new().failing_database("test2"));
        let ctx = ServerContext::new(
            options(&["test1", "test2"], false, scratch_dir("unreachable")),
            connector,
            Arc::new(PromptReportGenerator),
        )
        .unwrap();

        let err = ctx.start().await.err().unwrap();
        assert!(matches!(err, AppError::DatabaseConnection(_)));
    }
}
