//! Report generation backends.
//!
//! The `report` tool hands query rows plus the configured data description
//! to a `ReportGenerator`. A failing generator never fails the tool call:
//! the caller receives `FAILURE_PREFIX` followed by the error text.

use std::time::Duration;

use async_trait::async_trait;
use clap::ValueEnum;
use common::errors::{AppError, AppResult};
use common::models::Row;
use serde::{Deserialize, Serialize};

/// Leading text of every degraded report.
pub const FAILURE_PREFIX: &str = "报告生成失败: ";

const REPORT_INSTRUCTIONS: &str = "1. 主要主题和核心内容；\n\
2. 关键发现或亮点；\n\
3. 存在的问题或风险（如有）；\n\
4. 未来趋势或建议（如适用）。\n\
请用简明扼要的语言输出，适用于日报、周报或月报场景。";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ReportBackend {
    /// Return a ready-made prompt; the calling agent writes the report.
    Prompt,
    /// Ask an Ollama model to write the report.
    Ollama,
}

#[async_trait]
pub trait ReportGenerator: Send + Sync {
    async fn generate(&self, rows: &[Row], description: &str) -> AppResult<String>;
}

/// Runs `generator`, folding any error into a degraded report text.
pub async fn generate_or_degrade(
    generator: &dyn ReportGenerator,
    rows: &[Row],
    description: &str,
) -> String {
    match generator.generate(rows, description).await {
        Ok(report) => {
            tracing::info!(rows = rows.len(), chars = report.chars().count(), "报告已生成");
            report
        }
        Err(e) => {
            tracing::error!(error = %e, "报告生成失败");
            format!("{}{}", FAILURE_PREFIX, e)
        }
    }
}

fn rows_as_documents(rows: &[Row]) -> Vec<String> {
    rows.iter()
        .map(|row| serde_json::to_string(row).unwrap_or_default())
        .collect()
}

// ============== Prompt ==============

#[derive(Debug, Default)]
pub struct PromptReportGenerator;

#[async_trait]
impl ReportGenerator for PromptReportGenerator {
    async fn generate(&self, rows: &[Row], description: &str) -> AppResult<String> {
        let data = serde_json::to_string(rows)
            .map_err(|e| AppError::Internal(format!("数据序列化失败: {}", e)))?;
        Ok(format!(
            "数据背景：{}\n请基于上述背景和以下数据，使用`工件工具生成一份结构化的总结报告，内容包括：\n{}\n数据：{}",
            description, REPORT_INSTRUCTIONS, data
        ))
    }
}

// ============== Ollama ==============

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: String,
    stream: bool,
}

#[derive(Deserialize)]
struct GenerateResponse {
    response: String,
}

/// Summarises rows with a model served by Ollama's `/api/generate`.
pub struct OllamaReportGenerator {
    base_url: String,
    model: String,
    http_client: reqwest::Client,
}

impl OllamaReportGenerator {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> AppResult<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(300))
            .build()
            .map_err(|e| AppError::Config(format!("无法创建 HTTP 客户端: {}", e)))?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            http_client,
        })
    }

    fn build_prompt(rows: &[Row], description: &str) -> String {
        let documents = rows_as_documents(rows).join("\n");
        format!(
            "以下是待分析的数据，每行一条记录：\n{}\n\n数据背景：{}\n请基于上述背景和数据，生成一份结构化的总结报告，内容包括：\n{}",
            documents, description, REPORT_INSTRUCTIONS
        )
    }
}

#[async_trait]
impl ReportGenerator for OllamaReportGenerator {
    async fn generate(&self, rows: &[Row], description: &str) -> AppResult<String> {
        let url = format!("{}/api/generate", self.base_url);
        let request = GenerateRequest {
            model: &self.model,
            prompt: Self::build_prompt(rows, description),
            stream: false,
        };

        let response = self
            .http_client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| AppError::ExternalService(format!("无法连接到模型服务: {}", e)))?;

        if !response.status().is_success() {
            return Err(AppError::ExternalService(format!(
                "模型服务返回状态 {}",
                response.status()
            )));
        }

        let body: GenerateResponse = response
            .json()
            .await
            .map_err(|e| AppError::ExternalService(format!("模型服务返回无效响应: {}", e)))?;
        Ok(body.response)
    }
}
