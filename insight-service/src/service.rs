//! 聊天洞察服务模块
//!
//! Operations behind every protocol tool and resource. Handlers stay thin
//! and call into here.

use std::sync::Arc;

use common::errors::AppResult;
use common::models::{Row, TargetTable};
use serde_json::{json, Value};
use tokio::sync::broadcast;

use crate::mcp::protocol::notification;
use crate::memo::{InsightMemo, MEMO_URI};
use crate::report::{generate_or_degrade, ReportGenerator};
use crate::router::QueryRouter;
use crate::schema::SchemaIntrospector;

const NOTIFICATION_CAPACITY: usize = 64;

/// 聊天洞察服务
pub struct InsightService {
    router: QueryRouter,
    schema: SchemaIntrospector,
    memo: InsightMemo,
    reporter: Arc<dyn ReportGenerator>,
    description: String,
    notifications: broadcast::Sender<Value>,
}

impl InsightService {
    pub fn new(
        router: QueryRouter,
        schema: SchemaIntrospector,
        reporter: Arc<dyn ReportGenerator>,
        description: impl Into<String>,
    ) -> Self {
        let (notifications, _) = broadcast::channel(NOTIFICATION_CAPACITY);
        Self {
            router,
            schema,
            memo: InsightMemo::new(),
            reporter,
            description: description.into(),
            notifications,
        }
    }

    pub fn targets(&self) -> &[TargetTable] {
        self.router.targets()
    }

    pub fn router(&self) -> &QueryRouter {
        &self.router
    }

    pub fn schema(&self) -> &SchemaIntrospector {
        &self.schema
    }

    /// 执行只读查询
    pub async fn query(&self, sql: &str) -> AppResult<Vec<Row>> {
        Ok(self.router.execute(sql).await?.rows)
    }

    /// 列出配置数据库中的所有表
    pub async fn list_tables(&self) -> AppResult<Vec<String>> {
        self.schema.list_tables().await
    }

    /// 获取代表表的建表语句
    pub async fn describe_table(&self) -> AppResult<String> {
        self.schema.describe().await
    }

    /// 执行查询并生成报告；报告后端失败时返回降级文本
    pub async fn report(&self, sql: &str) -> AppResult<String> {
        let result = self.router.execute(sql).await?;
        Ok(generate_or_degrade(self.reporter.as_ref(), &result.rows, &self.description).await)
    }

    /// 添加业务洞察并通知订阅者
    pub async fn append_insight(&self, insight: &str) -> String {
        let count = self.memo.append(insight).await;
        tracing::info!(count, "业务洞察已添加");

        let updated = notification("notifications/resources/updated", json!({ "uri": MEMO_URI }));
        // No subscriber is fine.
        let _ = self.notifications.send(updated);

        "洞察已添加到备忘录".to_string()
    }

    /// 当前备忘录
    pub async fn read_memo(&self) -> String {
        self.memo.render().await
    }

    pub async fn insight_count(&self) -> usize {
        self.memo.len().await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Value> {
        self.notifications.subscribe()
    }
}
