//! MCP method dispatch.
//!
//! Transport-agnostic: takes one decoded JSON-RPC message, returns the
//! response (or nothing for notifications).

use std::sync::Arc;

use common::errors::AppError;
use serde::Deserialize;
use serde_json::{json, Map, Value};

use super::protocol::{
    tool_result, JsonRpcRequest, JsonRpcResponse, RpcFailure, INVALID_REQUEST, JSONRPC_VERSION,
    METHOD_NOT_FOUND, PARSE_ERROR, PROTOCOL_VERSION,
};
use super::session::Peer;
use super::tools::ToolTable;
use crate::memo::MEMO_URI;
use crate::prompt::{render_chatinsight, CHATINSIGHT_PROMPT};
use crate::service::InsightService;

pub const SERVER_NAME: &str = "mcp-wx-chatinsight";

#[derive(Debug, Deserialize)]
struct CallToolParams {
    name: String,
    #[serde(default)]
    arguments: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct UriParams {
    uri: String,
}

#[derive(Debug, Deserialize)]
struct GetPromptParams {
    name: String,
    #[serde(default)]
    arguments: Map<String, Value>,
}

pub struct McpDispatcher {
    service: Arc<InsightService>,
    tools: ToolTable,
}

impl McpDispatcher {
    /// Tool descriptions are fixed here. `schema_ddl` is the snapshot text,
    /// or `None` to leave the schema section out.
    pub fn new(service: Arc<InsightService>, schema_ddl: Option<&str>) -> Self {
        let router = service.router();
        let tools = ToolTable::build(router.policy(), router.targets().len() > 1, schema_ddl);
        Self { service, tools }
    }

    pub fn service(&self) -> &Arc<InsightService> {
        &self.service
    }

    pub fn tools(&self) -> &ToolTable {
        &self.tools
    }

    /// Decodes and handles one raw frame sent by `peer`.
    pub async fn handle_message(&self, raw: &str, peer: &Peer) -> Option<Value> {
        let value: Value = match serde_json::from_str(raw) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(error = %e, "无法解析的 JSON-RPC 消息");
                let resp = JsonRpcResponse::failure(
                    Value::Null,
                    RpcFailure::new(PARSE_ERROR, format!("Parse error: {}", e)),
                );
                return serde_json::to_value(resp).ok();
            }
        };

        let id = value.get("id").cloned().unwrap_or(Value::Null);
        let request: JsonRpcRequest = match serde_json::from_value(value) {
            Ok(request) => request,
            Err(e) => {
                let resp = JsonRpcResponse::failure(
                    id,
                    RpcFailure::new(INVALID_REQUEST, format!("Invalid request: {}", e)),
                );
                return serde_json::to_value(resp).ok();
            }
        };

        let response = self.handle(request, peer).await?;
        serde_json::to_value(response).ok()
    }

    pub async fn handle(&self, request: JsonRpcRequest, peer: &Peer) -> Option<JsonRpcResponse> {
        if request.is_notification() {
            tracing::debug!(method = %request.method, "收到通知");
            return None;
        }
        if request.jsonrpc != JSONRPC_VERSION {
            tracing::debug!(version = %request.jsonrpc, "非标准 jsonrpc 版本字段");
        }

        let id = request.id.clone().unwrap_or(Value::Null);
        let outcome = match request.method.as_str() {
            "initialize" => Ok(self.initialize()),
            "ping" => Ok(json!({})),
            "tools/list" => Ok(json!({ "tools": self.tools.list() })),
            "tools/call" => self.call_tool(request.params).await,
            "resources/list" => Ok(self.list_resources()),
            "resources/templates/list" => Ok(json!({ "resourceTemplates": [] })),
            "resources/read" => self.read_resource(request.params).await,
            "resources/subscribe" => parse_params::<UriParams>(request.params).and_then(|p| {
                known_uri(&p.uri)?;
                peer.subscribe(&p.uri);
                Ok(json!({}))
            }),
            "resources/unsubscribe" => parse_params::<UriParams>(request.params).map(|p| {
                peer.unsubscribe(&p.uri);
                json!({})
            }),
            "prompts/list" => Ok(list_prompts()),
            "prompts/get" => get_prompt(request.params),
            other => Err(RpcFailure::new(METHOD_NOT_FOUND, format!("Method not found: {}", other))),
        };

        Some(match outcome {
            Ok(result) => JsonRpcResponse::success(id, result),
            Err(failure) => {
                tracing::warn!(method = %request.method, code = failure.code, error = %failure.message, "请求处理失败");
                JsonRpcResponse::failure(id, failure)
            }
        })
    }

    fn initialize(&self) -> Value {
        json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {
                "tools": { "listChanged": false },
                "resources": { "subscribe": true, "listChanged": false },
                "prompts": { "listChanged": false },
            },
            "serverInfo": {
                "name": SERVER_NAME,
                "version": env!("CARGO_PKG_VERSION"),
            },
        })
    }

    async fn call_tool(&self, params: Value) -> Result<Value, RpcFailure> {
        let params: CallToolParams = parse_params(params)?;
        let entry = self
            .tools
            .get(&params.name)
            .ok_or_else(|| RpcFailure::from(AppError::UnknownTool(params.name.clone())))?;

        let args = params.arguments.unwrap_or_else(|| json!({}));
        tracing::info!(tool = entry.name, "调用工具");

        // Tool failures travel inside the result so the model can read them.
        match (entry.handler)(&self.service, args).await {
            Ok(output) => Ok(tool_result(output.into_text(), false)),
            Err(e) => {
                tracing::error!(tool = entry.name, error = %e, "工具执行失败");
                Ok(tool_result(e.to_string(), true))
            }
        }
    }

    fn list_resources(&self) -> Value {
        json!({
            "resources": [{
                "uri": MEMO_URI,
                "name": "业务洞察备忘录",
                "description": "记录分析过程中发现的业务洞察",
                "mimeType": "text/plain",
            }]
        })
    }

    async fn read_resource(&self, params: Value) -> Result<Value, RpcFailure> {
        let params: UriParams = parse_params(params)?;
        known_uri(&params.uri)?;
        let text = self.service.read_memo().await;
        Ok(json!({
            "contents": [{
                "uri": params.uri,
                "mimeType": "text/plain",
                "text": text,
            }]
        }))
    }
}

fn parse_params<T: serde::de::DeserializeOwned>(params: Value) -> Result<T, RpcFailure> {
    serde_json::from_value(params).map_err(|e| RpcFailure::invalid_params(format!("参数无效: {}", e)))
}

fn known_uri(uri: &str) -> Result<(), RpcFailure> {
    if uri == MEMO_URI {
        Ok(())
    } else {
        Err(AppError::UnknownResource(uri.to_string()).into())
    }
}

fn list_prompts() -> Value {
    json!({
        "prompts": [{
            "name": CHATINSIGHT_PROMPT,
            "description": "用于微信聊天记录分析的提示模板",
            "arguments": [{
                "name": "topic",
                "description": "要分析的主题",
                "required": true,
            }],
        }]
    })
}

fn get_prompt(params: Value) -> Result<Value, RpcFailure> {
    let params: GetPromptParams = parse_params(params)?;
    if params.name != CHATINSIGHT_PROMPT {
        return Err(RpcFailure::invalid_params(format!("未知提示: {}", params.name)));
    }
    let topic = params
        .arguments
        .get("topic")
        .and_then(Value::as_str)
        .filter(|t| !t.trim().is_empty())
        .ok_or_else(|| RpcFailure::invalid_params("缺少必需参数: topic"))?;

    Ok(json!({
        "description": format!("{} 主题分析", topic),
        "messages": [{
            "role": "user",
            "content": { "type": "text", "text": render_chatinsight(topic) },
        }],
    }))
}
