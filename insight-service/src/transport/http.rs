//! HTTP transport
//!
//! - `GET <sse-path>`: opens an SSE session. The first event is `endpoint`,
//!   carrying `<messages-path>?session_id=<id>`; JSON-RPC responses and
//!   subscribed resource updates follow as `message` events.
//! - `POST <messages-path>?session_id=<id>`: one JSON-RPC message, answered
//!   with `202 Accepted`; the reply goes out on that session's stream.
//! - `GET /api/health`, `GET /api/insights`: plain REST endpoints

use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::{Arc, Mutex, MutexGuard};

use axum::{
    extract::{Query, State},
    http::StatusCode,
    middleware,
    response::sse::{Event, KeepAlive, Sse},
    routing::{get, post},
    Extension, Json, Router,
};
use chrono::{DateTime, Utc};
use common::errors::{AppError, AppResult};
use common::middleware::request_id::{request_id_middleware, RequestId};
use common::response::ApiResponse;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::{Stream, StreamExt as _};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use utoipa::{OpenApi, ToSchema};

use crate::mcp::dispatcher::SERVER_NAME;
use crate::mcp::{McpDispatcher, Peer};
use crate::memo::MEMO_URI;
use crate::pool_manager::PoolRegistry;

const SESSION_CAPACITY: usize = 64;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "MCP WX ChatInsight API",
        version = "0.1.0",
        description = "微信聊天记录洞察 MCP 服务"
    ),
    paths(health_check, get_insights),
    components(schemas(HealthResponse, InsightsSnapshot)),
    tags(
        (name = "health", description = "健康检查端点"),
        (name = "insights", description = "业务洞察端点")
    )
)]
struct ApiDoc;

/// Shared by every HTTP handler.
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<McpDispatcher>,
    pub registry: Arc<PoolRegistry>,
    pub messages_path: Arc<str>,
    pub sessions: SessionMap,
}

impl AppState {
    pub fn new(dispatcher: Arc<McpDispatcher>, registry: Arc<PoolRegistry>, messages_path: &str) -> Self {
        Self {
            dispatcher,
            registry,
            messages_path: Arc::from(messages_path),
            sessions: SessionMap::default(),
        }
    }
}

/// An open SSE stream: the client's subscriptions and the sender feeding
/// its `message` events.
#[derive(Clone)]
struct SseSession {
    peer: Arc<Peer>,
    tx: mpsc::Sender<Value>,
}

/// Open SSE sessions keyed by session id.
#[derive(Clone, Default)]
pub struct SessionMap {
    inner: Arc<Mutex<HashMap<String, SseSession>>>,
}

impl SessionMap {
    fn sessions(&self) -> MutexGuard<'_, HashMap<String, SseSession>> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn insert(&self, id: String, session: SseSession) {
        self.sessions().insert(id, session);
    }

    fn get(&self, id: &str) -> Option<SseSession> {
        self.sessions().get(id).cloned()
    }

    fn remove(&self, id: &str) {
        self.sessions().remove(id);
    }

    pub fn len(&self) -> usize {
        self.sessions().len()
    }
}

/// Drops the session entry when its stream goes away.
struct SessionGuard {
    id: String,
    sessions: SessionMap,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.sessions.remove(&self.id);
        tracing::debug!(session = %self.id, "SSE 会话已关闭");
    }
}

#[derive(Debug, Deserialize)]
struct SessionQuery {
    session_id: Option<String>,
}

#[derive(Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
    pub timestamp: DateTime<Utc>,
    /// Open connection pools.
    pub pools: usize,
    pub databases: Vec<String>,
    pub targets: Vec<String>,
    /// Open SSE sessions.
    pub sessions: usize,
}

#[derive(Serialize, ToSchema)]
pub struct InsightsSnapshot {
    pub uri: String,
    pub count: usize,
    pub memo: String,
}

pub fn create_router(state: AppState, sse_path: &str) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);
    let messages_path = state.messages_path.to_string();

    Router::new()
        .route(sse_path, get(sse_stream))
        .route(&messages_path, post(post_message))
        .route("/api/health", get(health_check))
        .route("/api/insights", get(get_insights))
        .route("/api-docs/openapi.json", get(openapi_json))
        .layer(middleware::from_fn(request_id_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Binds `host:port` and serves until Ctrl-C.
pub async fn serve(state: AppState, host: &str, port: u16, sse_path: &str) -> AppResult<()> {
    let app = create_router(state.clone(), sse_path);
    let addr = format!("{}:{}", host, port);
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| AppError::Config(format!("绑定地址 {} 失败: {}", addr, e)))?;

    tracing::info!(
        address = %addr,
        sse_path = %sse_path,
        messages_path = %state.messages_path,
        "启动 SSE 传输"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    tracing::info!("SSE 传输已停止");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "无法监听 Ctrl-C 信号");
        std::future::pending::<()>().await;
    }
    tracing::info!("收到 Ctrl-C，开始关闭");
}

async fn sse_stream(State(state): State<AppState>) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let session_id = uuid::Uuid::new_v4().simple().to_string();
    let peer = Arc::new(Peer::new(session_id.clone()));
    let (tx, rx) = mpsc::channel::<Value>(SESSION_CAPACITY);

    state.sessions.insert(
        session_id.clone(),
        SseSession {
            peer: peer.clone(),
            tx: tx.clone(),
        },
    );
    tokio::spawn(forward_notifications(state.dispatcher.service().subscribe(), peer, tx));
    tracing::debug!(session = %session_id, "SSE 会话已建立");

    let endpoint = Event::default()
        .event("endpoint")
        .data(format!("{}?session_id={}", state.messages_path, session_id));
    let guard = SessionGuard {
        id: session_id,
        sessions: state.sessions.clone(),
    };
    let messages = ReceiverStream::new(rx).map(move |msg| {
        let _session = &guard;
        Ok::<_, Infallible>(Event::default().event("message").data(msg.to_string()))
    });

    Sse::new(tokio_stream::once(Ok(endpoint)).chain(messages)).keep_alive(KeepAlive::default())
}

/// Pushes the session's subscribed resource updates until its stream closes.
async fn forward_notifications(
    mut notifications: broadcast::Receiver<Value>,
    peer: Arc<Peer>,
    tx: mpsc::Sender<Value>,
) {
    loop {
        tokio::select! {
            _ = tx.closed() => break,
            msg = notifications.recv() => match msg {
                Ok(msg) => {
                    if peer.wants(&msg) && tx.send(msg).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(session = %peer.id(), skipped, "通知积压，部分通知被丢弃");
                }
                Err(RecvError::Closed) => break,
            },
        }
    }
}

async fn post_message(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    Query(query): Query<SessionQuery>,
    body: String,
) -> AppResult<StatusCode> {
    let session_id = query
        .session_id
        .ok_or_else(|| AppError::Validation("缺少 session_id 参数".into()))?;
    let session = state
        .sessions
        .get(&session_id)
        .ok_or(AppError::SessionNotFound(session_id))?;

    tracing::debug!(request_id = %request_id, session = %session.peer.id(), "收到 JSON-RPC 消息");
    let dispatcher = state.dispatcher.clone();
    tokio::spawn(async move {
        if let Some(reply) = dispatcher.handle_message(&body, &session.peer).await {
            if session.tx.send(reply).await.is_err() {
                tracing::debug!(session = %session.peer.id(), "SSE 会话已断开，响应被丢弃");
            }
        }
    });

    Ok(StatusCode::ACCEPTED)
}

/// 健康检查
#[utoipa::path(
    get,
    path = "/api/health",
    tag = "health",
    responses(
        (status = 200, description = "服务运行正常", body = HealthResponse)
    )
)]
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let targets = state
        .dispatcher
        .service()
        .targets()
        .iter()
        .map(|t| t.qualified())
        .collect();

    Json(HealthResponse {
        status: "healthy".to_string(),
        service: SERVER_NAME.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: Utc::now(),
        pools: state.registry.pool_count().await,
        databases: state.registry.databases().await,
        targets,
        sessions: state.sessions.len(),
    })
}

/// 当前业务洞察备忘录
#[utoipa::path(
    get,
    path = "/api/insights",
    tag = "insights",
    responses(
        (status = 200, description = "备忘录内容", body = ApiResponse<InsightsSnapshot>)
    )
)]
pub async fn get_insights(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
) -> Json<ApiResponse<InsightsSnapshot>> {
    let service = state.dispatcher.service();
    let snapshot = InsightsSnapshot {
        uri: MEMO_URI.to_string(),
        count: service.insight_count().await,
        memo: service.read_memo().await,
    };
    Json(ApiResponse::ok_with_service(snapshot, SERVER_NAME).with_request_id(request_id.0))
}

async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}
