//! Fixed tool table.
//!
//! Built once when the server starts; maps a tool name to its description,
//! input schema and handler function.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

use common::errors::{AppError, AppResult};
use common::models::QueryRequest;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::router::DispatchPolicy;
use crate::service::InsightService;

pub type ToolFuture<'a> = Pin<Box<dyn Future<Output = AppResult<ToolOutput>> + Send + 'a>>;
pub type ToolHandler = for<'a> fn(&'a InsightService, Value) -> ToolFuture<'a>;

/// What a handler hands back to the dispatcher.
#[derive(Debug)]
pub enum ToolOutput {
    Json(Value),
    Text(String),
}

impl ToolOutput {
    pub fn into_text(self) -> String {
        match self {
            ToolOutput::Text(text) => text,
            ToolOutput::Json(value) => value.to_string(),
        }
    }
}

pub struct ToolEntry {
    pub name: &'static str,
    pub description: String,
    pub input_schema: Value,
    pub handler: ToolHandler,
}

pub struct ToolTable {
    entries: HashMap<&'static str, ToolEntry>,
    order: Vec<&'static str>,
}

impl ToolTable {
    /// Builds the table. `schema_ddl`, when present, is appended to the
    /// descriptions of the query tools.
    pub fn build(policy: DispatchPolicy, multi_target: bool, schema_ddl: Option<&str>) -> Self {
        let schema_section = schema_ddl
            .map(|ddl| format!("\n\n表结构：\n{}", ddl.trim()))
            .unwrap_or_default();

        let union_hint = match (multi_target, policy) {
            (true, DispatchPolicy::CallerUnion) => {
                "\n    - 多库查询：查询只在第一个库上执行，需用 UNION ALL 合并 db1.table 与 db2.table"
            }
            (true, DispatchPolicy::FanOut) => "\n    - 多库查询：查询会在每个库上分别执行，结果按库的顺序合并",
            _ => "",
        };

        let query_schema = json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "description": "SQL SELECT 查询语句" }
            },
            "required": ["query"],
        });
        let empty_schema = json!({ "type": "object", "properties": {} });

        let entries = vec![
            ToolEntry {
                name: "query",
                description: format!(
                    "执行 SQL SELECT 查询并返回结果。\n格式要求：\n    - 必须以 SELECT 开头\n    - 支持多表查询：SELECT column1, column2 FROM db1.table1 WHERE condition{}\n返回查询结果列表，每个元素的键为列名，值为对应的数据。{}",
                    union_hint, schema_section
                ),
                input_schema: query_schema.clone(),
                handler: query_tool,
            },
            ToolEntry {
                name: "list_tables",
                description: "获取所有配置的数据库中的表列表，格式为 \"db_name.table_name\"。".to_string(),
                input_schema: empty_schema.clone(),
                handler: list_tables_tool,
            },
            ToolEntry {
                name: "describe_table",
                description: "获取数据表的详细表结构（DDL）信息。".to_string(),
                input_schema: empty_schema,
                handler: describe_table_tool,
            },
            ToolEntry {
                name: "report",
                description: format!(
                    "执行 SQL SELECT 查询，并基于查询结果生成一份结构化的总结报告（主题、关键发现、问题风险、趋势建议）。{}",
                    schema_section
                ),
                input_schema: query_schema,
                handler: report_tool,
            },
            ToolEntry {
                name: "append_insight",
                description: "添加新的业务洞察记录到备忘录中。添加的洞察会被整合到 memo://business_insights，并通知客户端更新。".to_string(),
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "insight": {
                            "type": "string",
                            "description": "业务洞察内容，例如：本月用户活跃度较上月提升20%"
                        }
                    },
                    "required": ["insight"],
                }),
                handler: append_insight_tool,
            },
        ];

        let order = entries.iter().map(|e| e.name).collect();
        let entries = entries.into_iter().map(|e| (e.name, e)).collect();
        Self { entries, order }
    }

    pub fn get(&self, name: &str) -> Option<&ToolEntry> {
        self.entries.get(name)
    }

    /// `tools/list` payload, in registration order.
    pub fn list(&self) -> Vec<Value> {
        self.order
            .iter()
            .filter_map(|name| self.entries.get(name))
            .map(|entry| {
                json!({
                    "name": entry.name,
                    "description": entry.description,
                    "inputSchema": entry.input_schema,
                })
            })
            .collect()
    }
}

fn parse_args<T: DeserializeOwned>(args: Value) -> AppResult<T> {
    serde_json::from_value(args).map_err(|e| AppError::Validation(format!("工具参数无效: {}", e)))
}

#[derive(Deserialize)]
struct AppendInsightArgs {
    insight: String,
}

fn query_tool(service: &InsightService, args: Value) -> ToolFuture<'_> {
    Box::pin(async move {
        let req: QueryRequest = parse_args(args)?;
        let rows = service.query(&req.query).await?;
        Ok(ToolOutput::Json(Value::Array(rows.into_iter().map(Value::Object).collect())))
    })
}

fn list_tables_tool(service: &InsightService, _args: Value) -> ToolFuture<'_> {
    Box::pin(async move {
        let tables = service.list_tables().await?;
        Ok(ToolOutput::Json(json!(tables)))
    })
}

fn describe_table_tool(service: &InsightService, _args: Value) -> ToolFuture<'_> {
    Box::pin(async move { Ok(ToolOutput::Text(service.describe_table().await?)) })
}

fn report_tool(service: &InsightService, args: Value) -> ToolFuture<'_> {
    Box::pin(async move {
        let req: QueryRequest = parse_args(args)?;
        Ok(ToolOutput::Text(service.report(&req.query).await?))
    })
}

fn append_insight_tool(service: &InsightService, args: Value) -> ToolFuture<'_> {
    Box::pin(async move {
        let args: AppendInsightArgs = parse_args(args)?;
        Ok(ToolOutput::Text(service.append_insight(&args.insight).await))
    })
}
