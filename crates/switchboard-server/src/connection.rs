use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::ws::{Message as WsMessage, WebSocket};
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use switchboard_engine::Broker;

use crate::handlers::{self, ConnectionContext, SESSION_CLOSE};
use crate::rpc::{RpcRequest, RpcResponse};
use crate::server::ServerConfig;
use crate::wire;

/// How long the writer may keep flushing after the reader has stopped.
const WRITER_DRAIN: Duration = Duration::from_secs(5);

/// Parse and dispatch one text message. Returns the serialized response and
/// whether the client asked to end the session.
async fn handle_text(ctx: &ConnectionContext, text: &str) -> (Option<String>, bool) {
    let (response, closing) = match serde_json::from_str::<RpcRequest>(text) {
        Ok(request) => {
            let params = request.params.unwrap_or_else(|| serde_json::json!({}));
            let response = handlers::dispatch(ctx, &request.method, &params, request.id).await;
            let closing = request.method == SESSION_CLOSE && response.success;
            (response, closing)
        }
        Err(e) => {
            debug!(session_id = %ctx.session.id(), error = %e, "unparseable request");
            (RpcResponse::parse_error(), false)
        }
    };
    (serde_json::to_string(&response).ok(), closing)
}

/// Drive one WebSocket connection: one broker session for its lifetime.
///
/// The reader dispatches requests in arrival order; the writer forwards
/// responses and session events and sends heartbeat pings. Either side
/// ending closes the session.
pub async fn handle_ws_connection(socket: WebSocket, broker: Arc<Broker>, config: Arc<ServerConfig>) {
    let (session, mut events) = broker.connect();
    let session_id = session.id().clone();
    info!(session_id = %session_id, "WebSocket client connected");

    let ctx = ConnectionContext {
        broker: Arc::clone(&broker),
        session,
    };
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (out_tx, mut out_rx) = mpsc::channel::<String>(config.max_send_queue);
    let last_seen = Arc::new(Mutex::new(Instant::now()));

    // Writer: responses, events, heartbeat.
    let writer_sid = session_id.clone();
    let writer_seen = Arc::clone(&last_seen);
    let heartbeat = config.heartbeat_interval;
    let client_timeout = config.client_timeout;
    let mut writer = tokio::spawn(async move {
        let mut ping_interval = tokio::time::interval(heartbeat);
        ping_interval.tick().await;

        loop {
            tokio::select! {
                msg = out_rx.recv() => {
                    match msg {
                        Some(text) => {
                            if ws_tx.send(WsMessage::Text(text.into())).await.is_err() {
                                return;
                            }
                        }
                        None => break,
                    }
                }
                Some(event) = events.recv() => {
                    if let Some(text) = wire::serialize_event(&event) {
                        if ws_tx.send(WsMessage::Text(text.into())).await.is_err() {
                            return;
                        }
                    }
                }
                _ = ping_interval.tick() => {
                    let idle = writer_seen.lock().elapsed();
                    if idle > client_timeout {
                        warn!(session_id = %writer_sid, idle_ms = idle.as_millis() as u64, "client timed out");
                        return;
                    }
                    if ws_tx.send(WsMessage::Ping(Vec::new().into())).await.is_err() {
                        return;
                    }
                    tracing::trace!(session_id = %writer_sid, "sent ping");
                }
            }
        }

        // Reader is done: flush events already queued, then close the socket.
        while let Ok(event) = events.try_recv() {
            let Some(text) = wire::serialize_event(&event) else {
                continue;
            };
            if ws_tx.send(WsMessage::Text(text.into())).await.is_err() {
                return;
            }
        }
        let _ = ws_tx.send(WsMessage::Close(None)).await;
    });

    // Reader: requests in, responses out through the writer.
    let reader_seen = Arc::clone(&last_seen);
    let mut reader = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_rx.next().await {
            *reader_seen.lock() = Instant::now();
            match msg {
                WsMessage::Text(text) => {
                    let (response, closing) = handle_text(&ctx, text.as_str()).await;
                    if let Some(json) = response {
                        if out_tx.send(json).await.is_err() {
                            break;
                        }
                    }
                    if closing {
                        break;
                    }
                }
                WsMessage::Close(_) => break,
                // Pings are answered by axum; pongs only refresh liveness.
                _ => {}
            }
        }
    });

    let reader_finished = tokio::select! {
        _ = &mut writer => {
            reader.abort();
            false
        }
        _ = &mut reader => true,
    };

    broker.disconnect(&session_id).await;
    if reader_finished && tokio::time::timeout(WRITER_DRAIN, &mut writer).await.is_err() {
        writer.abort();
    }
    info!(session_id = %session_id, "WebSocket client disconnected");
}

#[cfg(test)]
mod tests {
    use super::*;
    use switchboard_core::tools::Adapter;
    use switchboard_engine::mock::EchoTool;
    use switchboard_engine::{DispatchConfig, ToolRegistry};

    fn ctx() -> ConnectionContext {
        let registry = Arc::new(ToolRegistry::new());
        registry
            .register(Adapter::Call(Arc::new(EchoTool::new("echo"))))
            .unwrap();
        let broker = Arc::new(Broker::new(registry, DispatchConfig::default()));
        let (session, _events) = broker.connect();
        ConnectionContext { broker, session }
    }

    #[tokio::test]
    async fn garbage_is_a_parse_error() {
        let (response, closing) = handle_text(&ctx(), "not json").await;
        let json: serde_json::Value = serde_json::from_str(&response.unwrap()).unwrap();
        assert_eq!(json["error"]["code"], "PARSE_ERROR");
        assert!(!closing);
    }

    #[tokio::test]
    async fn missing_params_default_to_empty_object() {
        let (response, _) = handle_text(&ctx(), r#"{"id": 7, "method": "tools/list"}"#).await;
        let json: serde_json::Value = serde_json::from_str(&response.unwrap()).unwrap();
        assert_eq!(json["id"], 7);
        assert_eq!(json["result"]["tools"][0]["name"], "echo");
    }

    #[tokio::test]
    async fn session_close_ends_the_connection() {
        let (_, closing) = handle_text(&ctx(), r#"{"id": 1, "method": "session/close"}"#).await;
        assert!(closing);
    }
}
