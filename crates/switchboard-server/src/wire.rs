//! Session events and broker records in their client-facing JSON shape.

use base64::Engine as _;
use serde::Serialize;

use switchboard_core::errors::BrokerError;
use switchboard_core::invocation::InvocationRecord;
use switchboard_core::protocol::SessionEvent;
use switchboard_core::tools::ToolDescriptor;

/// Server-pushed message: `{ method, params }`, no id.
#[derive(Debug, Serialize)]
pub struct Notification {
    pub method: &'static str,
    pub params: serde_json::Value,
}

fn error_json(err: &BrokerError) -> serde_json::Value {
    serde_json::json!({
        "code": err.kind.as_str(),
        "message": err.message,
        "retryable": err.retryable,
    })
}

pub fn event_to_notification(event: &SessionEvent) -> Notification {
    match event {
        SessionEvent::Result {
            invocation_id,
            value,
        } => Notification {
            method: "invocation/result",
            params: serde_json::json!({ "invocationId": invocation_id, "result": value }),
        },
        SessionEvent::Error {
            invocation_id,
            error,
        } => Notification {
            method: "invocation/error",
            params: serde_json::json!({ "invocationId": invocation_id, "error": error_json(error) }),
        },
        SessionEvent::Frame {
            invocation_id,
            frame,
        } => Notification {
            method: "stream/frame",
            params: serde_json::json!({
                "invocationId": invocation_id,
                "sequence": frame.sequence,
                "contentType": frame.content_type,
                "data": base64::engine::general_purpose::STANDARD.encode(&frame.payload),
            }),
        },
        SessionEvent::StreamClosed {
            invocation_id,
            reason,
        } => Notification {
            method: "stream/closed",
            params: serde_json::json!({ "invocationId": invocation_id, "reason": reason }),
        },
    }
}

/// Serialize an event straight to a text frame.
pub fn serialize_event(event: &SessionEvent) -> Option<String> {
    serde_json::to_string(&event_to_notification(event)).ok()
}

pub fn record_json(record: &InvocationRecord) -> serde_json::Value {
    serde_json::json!({
        "invocationId": record.invocation_id,
        "toolName": record.tool_name,
        "mode": record.mode,
        "status": record.status,
        "startedAt": record.started_at.to_rfc3339(),
    })
}

pub fn descriptor_json(tool: &ToolDescriptor) -> serde_json::Value {
    serde_json::json!({
        "name": tool.name,
        "description": tool.description,
        "inputSchema": tool.input_schema,
        "outputKind": tool.output_kind,
    })
}
