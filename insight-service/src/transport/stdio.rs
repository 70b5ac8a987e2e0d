//! Newline-delimited JSON-RPC over stdin/stdout.

use std::sync::Arc;

use common::errors::{AppError, AppResult};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinSet;

use crate::mcp::{McpDispatcher, Peer};

const OUTBOUND_CAPACITY: usize = 256;

/// Serves the process's stdin/stdout until stdin reaches EOF.
pub async fn serve(dispatcher: Arc<McpDispatcher>) -> AppResult<()> {
    tracing::info!("stdio 传输已启动");
    let peer = Arc::new(Peer::new("stdio"));
    serve_io(dispatcher, peer, tokio::io::stdin(), tokio::io::stdout()).await?;
    tracing::info!("stdin 已关闭，stdio 传输结束");
    Ok(())
}

/// Each inbound line is handled on its own task. A single writer task owns
/// `output`, so frames never interleave. Resource updates are forwarded only
/// for URIs `peer` subscribed to. Returns `output` once every in-flight
/// request has been answered.
pub async fn serve_io<R, W>(
    dispatcher: Arc<McpDispatcher>,
    peer: Arc<Peer>,
    input: R,
    output: W,
) -> AppResult<W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::channel::<Value>(OUTBOUND_CAPACITY);
    let writer = tokio::spawn(write_frames(rx, output));

    let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
    let mut notifications = dispatcher.service().subscribe();
    let notify_tx = tx.clone();
    let notify_peer = peer.clone();
    let forwarder = tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;
                msg = notifications.recv() => match msg {
                    Ok(msg) => {
                        if notify_peer.wants(&msg) && notify_tx.send(msg).await.is_err() {
                            break;
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "通知积压，部分通知被丢弃");
                    }
                    Err(RecvError::Closed) => break,
                },
                _ = &mut stop_rx => {
                    while let Ok(msg) = notifications.try_recv() {
                        if notify_peer.wants(&msg) {
                            let _ = notify_tx.send(msg).await;
                        }
                    }
                    break;
                }
            }
        }
    });

    let mut lines = BufReader::new(input).lines();
    let mut in_flight = JoinSet::new();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let dispatcher = dispatcher.clone();
        let peer = peer.clone();
        let tx = tx.clone();
        in_flight.spawn(async move {
            if let Some(response) = dispatcher.handle_message(&line, &peer).await {
                let _ = tx.send(response).await;
            }
        });
    }

    while let Some(joined) = in_flight.join_next().await {
        if let Err(e) = joined {
            tracing::error!(error = %e, "请求任务异常退出");
        }
    }

    let _ = stop_tx.send(());
    let _ = forwarder.await;
    drop(tx);

    writer
        .await
        .map_err(|e| AppError::Internal(format!("写出任务异常退出: {}", e)))?
}

async fn write_frames<W>(mut rx: mpsc::Receiver<Value>, mut output: W) -> AppResult<W>
where
    W: AsyncWrite + Unpin,
{
    while let Some(frame) = rx.recv().await {
        let mut line = frame.to_string();
        line.push('\n');
        output.write_all(line.as_bytes()).await?;
        output.flush().await?;
    }
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memo::MEMO_URI;
    use crate::mcp::protocol::PARSE_ERROR;
    use crate::pool_manager::PoolRegistry;
    use crate::report::PromptReportGenerator;
    use crate::router::{DispatchPolicy, QueryRouter};
    use crate::schema::SchemaIntrospector;
    use crate::service::InsightService;
    use crate::testing::MockConnector;
    use common::models::TargetTable;

    fn dispatcher() -> Arc<McpDispatcher> {
        let registry = Arc::new(PoolRegistry::new(Arc::new(MockConnector::new())));
        let targets = vec![TargetTable::new("test1", "wx_record")];
        let router = QueryRouter::new(registry.clone(), targets.clone(), DispatchPolicy::FanOut).unwrap();
        let schema = SchemaIntrospector::new(registry, targets);
        let service = Arc::new(InsightService::new(router, schema, Arc::new(PromptReportGenerator), "测试群"));
        Arc::new(McpDispatcher::new(service, None))
    }

    fn peer() -> Arc<Peer> {
        Arc::new(Peer::new("stdio"))
    }

    fn frames(output: Vec<u8>) -> Vec<Value> {
        String::from_utf8(output)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    const APPEND: &str = r#"{"jsonrpc":"2.0","id":2,"method":"tools/call","params":{"name":"append_insight","arguments":{"insight":"周末活跃度下降"}}}"#;

    #[tokio::test]
    async fn test_answers_requests_and_forwards_subscribed_updates() {
        let input = format!(
            "{}\n{}\n\n{}\n",
            r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{}}"#,
            r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#,
            APPEND,
        );
        let peer = peer();
        peer.subscribe(MEMO_URI);

        let output = serve_io(dispatcher(), peer, input.as_bytes(), Vec::new()).await.unwrap();
        let frames = frames(output);

        assert_eq!(frames.len(), 3);
        assert!(frames.iter().any(|f| f["id"] == 1 && f["result"]["protocolVersion"].is_string()));
        assert!(frames.iter().any(|f| f["id"] == 2 && f["result"]["content"][0]["text"] == "洞察已添加到备忘录"));
        assert!(frames
            .iter()
            .any(|f| f["method"] == "notifications/resources/updated" && f["params"]["uri"] == MEMO_URI));
    }

    #[tokio::test]
    async fn test_unsubscribed_peer_gets_no_update() {
        let input = format!("{}\n", APPEND);
        let output = serve_io(dispatcher(), peer(), input.as_bytes(), Vec::new()).await.unwrap();
        let frames = frames(output);

        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0]["id"], 2);
    }

    #[tokio::test]
    async fn test_garbage_line_gets_parse_error() {
        let output = serve_io(dispatcher(), peer(), "not json\n".as_bytes(), Vec::new()).await.unwrap();
        let frames = frames(output);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0]["error"]["code"], PARSE_ERROR);
    }

    #[tokio::test]
    async fn test_eof_without_input() {
        let output = serve_io(dispatcher(), peer(), "".as_bytes(), Vec::new()).await.unwrap();
        assert!(output.is_empty());
    }
}
