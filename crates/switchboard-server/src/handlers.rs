//! RPC method handlers. Every connection owns exactly one broker session,
//! so handlers act on that session directly.

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use switchboard_core::ids::InvocationId;
use switchboard_core::protocol::InvocationRequest;
use switchboard_engine::{Broker, Session};

use crate::rpc::{self, RpcResponse};
use crate::wire;

pub const SESSION_CLOSE: &str = "session/close";

/// What a handler can reach: the shared broker and this connection's session.
pub struct ConnectionContext {
    pub broker: Arc<Broker>,
    pub session: Arc<Session>,
}

/// Dispatch an RPC method to its handler.
pub async fn dispatch(
    ctx: &ConnectionContext,
    method: &str,
    params: &serde_json::Value,
    id: Option<serde_json::Value>,
) -> RpcResponse {
    debug!(session_id = %ctx.session.id(), method, "rpc request");
    match method {
        "initialize" => initialize(ctx, id),
        "tools/list" => tools_list(ctx, id),
        "session/negotiate" => session_negotiate(ctx, params, id).await,
        "tools/call" => tools_call(ctx, params, id),
        "stream/close" => stream_close(ctx, params, id),
        "invocation/status" => invocation_status(ctx, params, id),
        "invocation/ack" => invocation_ack(ctx, params, id),
        SESSION_CLOSE => session_close(ctx, id).await,
        "ping" => RpcResponse::success(id, serde_json::json!({ "pong": true })),
        _ => RpcResponse::method_not_found(id, method),
    }
}

fn tools_json(ctx: &ConnectionContext) -> serde_json::Value {
    serde_json::Value::Array(
        ctx.broker
            .registry()
            .list()
            .iter()
            .map(wire::descriptor_json)
            .collect(),
    )
}

fn initialize(ctx: &ConnectionContext, id: Option<serde_json::Value>) -> RpcResponse {
    RpcResponse::success(
        id,
        serde_json::json!({
            "sessionId": ctx.session.id(),
            "server": {
                "name": "switchboard",
                "version": env!("CARGO_PKG_VERSION"),
            },
            "tools": tools_json(ctx),
        }),
    )
}

fn tools_list(ctx: &ConnectionContext, id: Option<serde_json::Value>) -> RpcResponse {
    RpcResponse::success(id, serde_json::json!({ "tools": tools_json(ctx) }))
}

async fn session_negotiate(
    ctx: &ConnectionContext,
    params: &serde_json::Value,
    id: Option<serde_json::Value>,
) -> RpcResponse {
    let names = match rpc::require_str_array(params, "tools") {
        Ok(names) => names,
        Err(e) => return RpcResponse::invalid_params(id, e),
    };
    match ctx.session.negotiate(&names).await {
        Ok(response) => RpcResponse::success(
            id,
            serde_json::json!({
                "accepted": response.accepted,
                "rejected": response.rejected,
            }),
        ),
        Err(err) => RpcResponse::broker_error(id, &err),
    }
}

fn parse_invocation_request(params: &serde_json::Value) -> Result<InvocationRequest, String> {
    let invocation_id = rpc::require_str(params, "invocationId")?;
    let name = rpc::require_str(params, "name")?;
    let arguments = params
        .get("arguments")
        .cloned()
        .unwrap_or_else(|| serde_json::json!({}));
    let mut request = match rpc::optional_str(params, "mode").unwrap_or("call") {
        "call" => InvocationRequest::call(invocation_id, name, arguments),
        "stream" => InvocationRequest::stream(invocation_id, name, arguments),
        other => return Err(format!("Invalid mode: {other} (expected call or stream)")),
    };
    if let Some(ms) = rpc::optional_u64(params, "timeoutMs") {
        if ms == 0 {
            return Err("timeoutMs must be positive".into());
        }
        request = request.with_deadline(Duration::from_millis(ms));
    }
    Ok(request)
}

fn tools_call(
    ctx: &ConnectionContext,
    params: &serde_json::Value,
    id: Option<serde_json::Value>,
) -> RpcResponse {
    let request = match parse_invocation_request(params) {
        Ok(request) => request,
        Err(e) => return RpcResponse::invalid_params(id, e),
    };
    match ctx.session.submit(request) {
        Ok(accepted) => RpcResponse::success(
            id,
            serde_json::json!({
                "invocationId": accepted.invocation_id,
                "status": accepted.status,
            }),
        ),
        Err(err) => RpcResponse::broker_error(id, &err),
    }
}

fn invocation_id_param(params: &serde_json::Value) -> Result<InvocationId, String> {
    rpc::require_str(params, "invocationId").map(InvocationId::from)
}

fn stream_close(
    ctx: &ConnectionContext,
    params: &serde_json::Value,
    id: Option<serde_json::Value>,
) -> RpcResponse {
    match invocation_id_param(params) {
        Ok(invocation_id) => RpcResponse::success(
            id,
            serde_json::json!({ "closed": ctx.session.close_stream(&invocation_id) }),
        ),
        Err(e) => RpcResponse::invalid_params(id, e),
    }
}

fn invocation_status(
    ctx: &ConnectionContext,
    params: &serde_json::Value,
    id: Option<serde_json::Value>,
) -> RpcResponse {
    let invocation_id = match invocation_id_param(params) {
        Ok(invocation_id) => invocation_id,
        Err(e) => return RpcResponse::invalid_params(id, e),
    };
    match ctx.session.invocation(&invocation_id) {
        Some(record) => RpcResponse::success(id, wire::record_json(&record)),
        None => RpcResponse::invalid_params(id, format!("Unknown invocation: {invocation_id}")),
    }
}

fn invocation_ack(
    ctx: &ConnectionContext,
    params: &serde_json::Value,
    id: Option<serde_json::Value>,
) -> RpcResponse {
    match invocation_id_param(params) {
        Ok(invocation_id) => RpcResponse::success(
            id,
            serde_json::json!({ "acknowledged": ctx.session.acknowledge(&invocation_id) }),
        ),
        Err(e) => RpcResponse::invalid_params(id, e),
    }
}

async fn session_close(ctx: &ConnectionContext, id: Option<serde_json::Value>) -> RpcResponse {
    ctx.session.close().await;
    RpcResponse::success(id, serde_json::json!({ "closed": true }))
}
