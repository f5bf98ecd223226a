//! Messages exchanged across the session boundary, independent of any wire
//! encoding.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{BrokerError, ErrorKind};
use crate::ids::InvocationId;
use crate::invocation::{InvocationStatus, RequestedMode};
use crate::stream::{Frame, StreamCloseReason};

/// A tool name the session could not resolve.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rejection {
    pub name: String,
    pub reason: ErrorKind,
}

/// Outcome of capability negotiation.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NegotiationResponse {
    pub accepted: Vec<String>,
    pub rejected: Vec<Rejection>,
}

/// A client's request to run a tool.
#[derive(Clone, Debug, PartialEq)]
pub struct InvocationRequest {
    pub invocation_id: InvocationId,
    pub tool_name: String,
    pub arguments: serde_json::Value,
    pub mode: RequestedMode,
    /// Per-request override of the session's default deadline.
    pub deadline: Option<Duration>,
}

impl InvocationRequest {
    pub fn call(
        invocation_id: impl Into<InvocationId>,
        tool_name: impl Into<String>,
        arguments: serde_json::Value,
    ) -> Self {
        Self {
            invocation_id: invocation_id.into(),
            tool_name: tool_name.into(),
            arguments,
            mode: RequestedMode::Call,
            deadline: None,
        }
    }

    pub fn stream(
        invocation_id: impl Into<InvocationId>,
        tool_name: impl Into<String>,
        arguments: serde_json::Value,
    ) -> Self {
        Self {
            mode: RequestedMode::Stream,
            ..Self::call(invocation_id, tool_name, arguments)
        }
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

/// Synchronous acknowledgement that a request was admitted.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Accepted {
    pub invocation_id: InvocationId,
    /// `Running` when a slot was free, `Pending` when queued.
    pub status: InvocationStatus,
}

/// Asynchronous event delivered to the client, correlated by invocation id.
#[derive(Clone, Debug, PartialEq)]
pub enum SessionEvent {
    Result {
        invocation_id: InvocationId,
        value: serde_json::Value,
    },
    Error {
        invocation_id: InvocationId,
        error: BrokerError,
    },
    Frame {
        invocation_id: InvocationId,
        frame: Frame,
    },
    StreamClosed {
        invocation_id: InvocationId,
        reason: StreamCloseReason,
    },
}

impl SessionEvent {
    pub fn invocation_id(&self) -> &InvocationId {
        match self {
            Self::Result { invocation_id, .. }
            | Self::Error { invocation_id, .. }
            | Self::Frame { invocation_id, .. }
            | Self::StreamClosed { invocation_id, .. } => invocation_id,
        }
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Result { .. } => "result",
            Self::Error { .. } => "error",
            Self::Frame { .. } => "frame",
            Self::StreamClosed { .. } => "stream_closed",
        }
    }

    /// Whether this event ends its invocation.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Frame { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_request_keeps_fields() {
        let req = InvocationRequest::stream("cam-1", "camera_stream", serde_json::json!({}))
            .with_deadline(Duration::from_secs(2));
        assert_eq!(req.mode, RequestedMode::Stream);
        assert_eq!(req.invocation_id.as_str(), "cam-1");
        assert_eq!(req.deadline, Some(Duration::from_secs(2)));
    }

    #[test]
    fn negotiation_response_serde() {
        let resp = NegotiationResponse {
            accepted: vec!["weather".into()],
            rejected: vec![Rejection {
                name: "unknown-tool".into(),
                reason: ErrorKind::UnknownTool,
            }],
        };
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["accepted"][0], "weather");
        assert_eq!(json["rejected"][0]["name"], "unknown-tool");
        assert_eq!(json["rejected"][0]["reason"], "unknown_tool");
    }

    #[test]
    fn frame_events_are_not_terminal() {
        let frame = SessionEvent::Frame {
            invocation_id: "s".into(),
            frame: Frame::new(1, "image/x-test", vec![0u8; 4]),
        };
        assert!(!frame.is_terminal());
        assert_eq!(frame.event_type(), "frame");

        let closed = SessionEvent::StreamClosed {
            invocation_id: "s".into(),
            reason: StreamCloseReason::EndOfStream,
        };
        assert!(closed.is_terminal());
        assert_eq!(closed.invocation_id().as_str(), "s");
    }
}
