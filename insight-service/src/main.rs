//! MCP WX ChatInsight 服务
//!
//! 面向微信聊天记录的模型上下文协议服务器，提供：
//! - 跨库/单库的只读 SELECT 查询
//! - 表结构查询与表清单
//! - 业务洞察备忘录资源
//! - 基于查询结果的总结报告

mod cli;
mod mcp;
mod memo;
mod pool_manager;
mod prompt;
mod report;
mod router;
mod schema;
mod service;
mod state;
mod transport;

#[cfg(test)]
mod testing;

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use common::config::{load_dotenv, DatabaseConfig, PoolSettings};
use common::errors::AppResult;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use cli::{Cli, ServerOptions, Transport};
use pool_manager::MySqlConnector;
use report::{OllamaReportGenerator, PromptReportGenerator, ReportBackend, ReportGenerator};
use state::ServerContext;
use transport::http::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_dotenv();

    let cli = Cli::parse();
    init_tracing(cli.debug, cli.log_json);

    let options = match ServerOptions::try_from(cli) {
        Ok(options) => options,
        Err(e) => {
            eprintln!("错误: {}", e);
            std::process::exit(1);
        }
    };

    let db_config = DatabaseConfig::from_env().context("读取数据库配置失败")?;
    let connector = Arc::new(MySqlConnector::new(db_config, PoolSettings::from_env()));

    let reporter: Arc<dyn ReportGenerator> = match options.report_backend {
        ReportBackend::Prompt => Arc::new(PromptReportGenerator),
        ReportBackend::Ollama => Arc::new(
            OllamaReportGenerator::new(&options.ollama_url, &options.ollama_model)
                .context("初始化报告生成器失败")?,
        ),
    };

    let target_names: Vec<String> = options.targets.iter().map(|t| t.qualified()).collect();
    info!(
        mode = ?options.mode,
        targets = ?target_names,
        dispatch = %options.dispatch,
        transport = ?options.transport,
        report_backend = ?options.report_backend,
        "启动 MCP WX ChatInsight"
    );

    let ctx = ServerContext::new(options, connector, reporter)?;
    let outcome = run(&ctx).await;
    ctx.shutdown().await;

    outcome.context("服务异常退出")
}

async fn run(ctx: &ServerContext) -> AppResult<()> {
    let dispatcher = Arc::new(ctx.start().await?);

    match ctx.options.transport {
        Transport::Stdio => transport::stdio::serve(dispatcher).await,
        Transport::Sse => {
            let state = AppState::new(dispatcher, ctx.registry.clone(), &ctx.options.messages_path());
            transport::http::serve(
                state,
                &ctx.options.host,
                ctx.options.port,
                &ctx.options.sse_path,
            )
            .await
        }
    }
}

/// Logs go to stderr; in stdio mode stdout carries protocol frames.
fn init_tracing(debug: bool, json: bool) {
    let filter = if debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into())
    };
    let registry = tracing_subscriber::registry().with(filter);

    if json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}
