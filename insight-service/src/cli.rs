//! Command-line options.
//!
//! `Cli` is what clap parses; `ServerOptions` is the validated form the
//! server is built from.

use std::borrow::Cow;
use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use common::errors::{AppError, AppResult};
use common::models::TargetTable;
use validator::{Validate, ValidationError};

use crate::report::ReportBackend;
use crate::router::DispatchPolicy;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum DbMode {
    /// One database.
    #[value(name = "single_db")]
    SingleDb,
    /// Several databases holding shards of the same table.
    #[value(name = "cross_db")]
    CrossDb,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Transport {
    Stdio,
    Sse,
}

/// MCP WX ChatInsight - 一个用于微信数据分析的模型上下文协议服务器
#[derive(Debug, Parser)]
#[command(name = "mcp-wx-chatinsight", version, about)]
pub struct Cli {
    /// 数据库模式: cross_db (跨库) 或 single_db (不跨库)
    #[arg(long, value_enum, default_value_t = DbMode::SingleDb)]
    pub mode: DbMode,

    /// 数据库名称。跨库模式下为逗号分隔列表或 JSON 数组 ["db1", "db2"]
    #[arg(long)]
    pub db: String,

    /// 要分析的表名（例如：wx_record）
    #[arg(long)]
    pub table: String,

    /// 数据描述，用于生成报告
    #[arg(long, default_value = "微信群聊天记录")]
    pub desc: String,

    /// 多库查询的分发策略
    #[arg(long, value_enum, default_value_t = DispatchPolicy::FanOut)]
    pub dispatch: DispatchPolicy,

    /// 启动时校验所有目标表结构一致
    #[arg(long)]
    pub verify_schema: bool,

    /// 报告生成后端
    #[arg(long, value_enum, default_value_t = ReportBackend::Prompt)]
    pub report_backend: ReportBackend,

    #[arg(long, env = "OLLAMA_HOST", default_value = "http://localhost:11434")]
    pub ollama_url: String,

    #[arg(long, env = "OLLAMA_MODEL", default_value = "deepseek-r1:latest")]
    pub ollama_model: String,

    /// 传输模式: stdio 或 sse
    #[arg(long, value_enum, default_value_t = Transport::Stdio)]
    pub transport: Transport,

    /// SSE 模式的监听地址
    #[arg(long, default_value = "0.0.0.0")]
    pub host: String,

    /// SSE 模式的端口号
    #[arg(long, default_value_t = 8000)]
    pub port: u16,

    /// SSE 端点路径
    #[arg(long, alias = "sse_path", default_value = "/mcp-wx-chatinsight/sse")]
    pub sse_path: String,

    /// 表结构快照目录（默认为系统临时目录下的 mcp-wx-chatinsight）
    #[arg(long)]
    pub snapshot_dir: Option<PathBuf>,

    /// 启用调试日志
    #[arg(long)]
    pub debug: bool,

    /// 以 JSON 格式输出日志
    #[arg(long)]
    pub log_json: bool,
}

/// Validated server configuration.
#[derive(Debug, Clone, Validate)]
#[validate(schema(function = "validate_transport"))]
pub struct ServerOptions {
    pub mode: DbMode,
    #[validate(length(min = 1, message = "至少需要一个目标表"))]
    pub targets: Vec<TargetTable>,
    pub description: String,
    pub dispatch: DispatchPolicy,
    pub verify_schema: bool,
    pub report_backend: ReportBackend,
    pub ollama_url: String,
    pub ollama_model: String,
    pub transport: Transport,
    pub host: String,
    pub port: u16,
    pub sse_path: String,
    pub snapshot_dir: PathBuf,
}

impl ServerOptions {
    /// Path of the JSON-RPC POST endpoint paired with `sse_path`.
    pub fn messages_path(&self) -> String {
        let base = self.sse_path.trim_end_matches("/sse");
        format!("{}/messages", base)
    }
}

impl TryFrom<Cli> for ServerOptions {
    type Error = AppError;

    fn try_from(cli: Cli) -> AppResult<Self> {
        let databases = parse_db_names(&cli.db, cli.mode)?;
        let table = cli.table.trim();
        if table.is_empty() {
            return Err(AppError::Validation("表名不能为空".into()));
        }
        let targets = databases
            .iter()
            .map(|db| TargetTable::new(db.as_str(), table))
            .collect();

        let options = Self {
            mode: cli.mode,
            targets,
            description: cli.desc,
            dispatch: cli.dispatch,
            verify_schema: cli.verify_schema,
            report_backend: cli.report_backend,
            ollama_url: cli.ollama_url,
            ollama_model: cli.ollama_model,
            transport: cli.transport,
            host: cli.host,
            port: cli.port,
            sse_path: cli.sse_path,
            snapshot_dir: cli.snapshot_dir.unwrap_or_else(default_snapshot_dir),
        };
        options
            .validate()
            .map_err(|e| AppError::Validation(e.to_string()))?;
        Ok(options)
    }
}

/// `<temp dir>/mcp-wx-chatinsight`, independent of the working directory.
pub fn default_snapshot_dir() -> PathBuf {
    std::env::temp_dir().join("mcp-wx-chatinsight")
}

/// Splits `--db` according to the database mode.
pub fn parse_db_names(raw: &str, mode: DbMode) -> AppResult<Vec<String>> {
    let raw = raw.trim();
    match mode {
        DbMode::CrossDb => {
            let names: Vec<String> = if raw.starts_with('[') {
                serde_json::from_str::<Vec<String>>(raw)
                    .map_err(|_| {
                        AppError::Validation(
                            "在跨库模式下，--db 必须是逗号分隔的字符串或数据库名称列表".into(),
                        )
                    })?
                    .into_iter()
                    .map(|name| name.trim().to_string())
                    .collect()
            } else {
                raw.split(',').map(|name| name.trim().to_string()).collect()
            };

            if names.iter().any(String::is_empty) {
                return Err(AppError::Validation("不允许空的数据库名称".into()));
            }
            if names.len() < 2 {
                return Err(AppError::Validation("跨库模式至少需要2个数据库名称".into()));
            }
            Ok(names)
        }
        DbMode::SingleDb => {
            if raw.is_empty() {
                return Err(AppError::Validation("不允许空的数据库名称".into()));
            }
            if raw.contains(',') || raw.starts_with('[') {
                return Err(AppError::Validation(
                    "在单库模式下，--db 必须是单个数据库名称字符串".into(),
                ));
            }
            Ok(vec![raw.to_string()])
        }
    }
}

fn validate_transport(options: &ServerOptions) -> Result<(), ValidationError> {
    if options.transport != Transport::Sse {
        return Ok(());
    }
    if !(1024..=65535).contains(&options.port) {
        return Err(ValidationError::new("port_range")
            .with_message(Cow::Borrowed("端口必须在1024到65535之间")));
    }
    if !options.sse_path.starts_with('/') {
        return Err(ValidationError::new("sse_path_prefix")
            .with_message(Cow::Borrowed("SSE路径必须以'/'开头")));
    }
    if !options.sse_path.ends_with("/sse") {
        return Err(ValidationError::new("sse_path_suffix")
            .with_message(Cow::Borrowed("SSE路径必须以'/sse'结尾")));
    }
    Ok(())
}
