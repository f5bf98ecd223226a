use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::ids::InvocationId;

/// Every error kind the broker can surface to a client.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    DuplicateTool,
    /// Non-fatal: reported per name during negotiation.
    UnknownTool,
    ToolNotNegotiated,
    DuplicateInvocation,
    InvalidArguments,
    Overloaded,
    Timeout,
    AdapterFailure,
    StreamAlreadyActive,
    StreamProtocolViolation,
    SessionClosed,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DuplicateTool => "duplicate_tool",
            Self::UnknownTool => "unknown_tool",
            Self::ToolNotNegotiated => "tool_not_negotiated",
            Self::DuplicateInvocation => "duplicate_invocation",
            Self::InvalidArguments => "invalid_arguments",
            Self::Overloaded => "overloaded",
            Self::Timeout => "timeout",
            Self::AdapterFailure => "adapter_failure",
            Self::StreamAlreadyActive => "stream_already_active",
            Self::StreamProtocolViolation => "stream_protocol_violation",
            Self::SessionClosed => "session_closed",
        }
    }

    /// Kinds whose retryability does not depend on the adapter.
    pub fn always_retryable(&self) -> bool {
        matches!(self, Self::Overloaded | Self::Timeout)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What an error refers to: one invocation, or the session as a whole.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "invocation_id", rename_all = "snake_case")]
pub enum ErrorScope {
    Invocation(InvocationId),
    Session,
}

/// Error delivered to clients, synchronously or as an invocation outcome.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct BrokerError {
    pub kind: ErrorKind,
    pub scope: ErrorScope,
    pub message: String,
    pub retryable: bool,
}

impl BrokerError {
    pub fn new(kind: ErrorKind, scope: ErrorScope, message: impl Into<String>) -> Self {
        Self {
            kind,
            scope,
            message: message.into(),
            retryable: kind.always_retryable(),
        }
    }

    pub fn for_invocation(kind: ErrorKind, id: &InvocationId, message: impl Into<String>) -> Self {
        Self::new(kind, ErrorScope::Invocation(id.clone()), message)
    }

    pub fn session(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self::new(kind, ErrorScope::Session, message)
    }

    pub fn session_closed(id: &InvocationId) -> Self {
        Self::for_invocation(ErrorKind::SessionClosed, id, "session closed")
    }

    pub fn timeout(id: &InvocationId, after: Duration) -> Self {
        Self::for_invocation(
            ErrorKind::Timeout,
            id,
            format!("invocation exceeded its deadline of {}ms", after.as_millis()),
        )
    }

    /// Wrap an adapter-reported failure, keeping the adapter's classification.
    pub fn adapter(id: &InvocationId, err: &AdapterError) -> Self {
        Self {
            kind: ErrorKind::AdapterFailure,
            scope: ErrorScope::Invocation(id.clone()),
            message: err.to_string(),
            retryable: err.is_retryable(),
        }
    }

    pub fn invocation_id(&self) -> Option<&InvocationId> {
        match &self.scope {
            ErrorScope::Invocation(id) => Some(id),
            ErrorScope::Session => None,
        }
    }
}

/// Failure reported by a tool adapter. The adapter decides retryability.
#[derive(Clone, Debug, thiserror::Error)]
pub enum AdapterError {
    // Retryable
    #[error("network error: {0}")]
    Network(String),
    #[error("upstream error {status}: {body}")]
    Upstream { status: u16, body: String },
    #[error("adapter timed out after {0:?}")]
    Timeout(Duration),
    #[error("device busy: {0}")]
    DeviceBusy(String),

    // Not retryable
    #[error("malformed input: {0}")]
    MalformedInput(String),
    #[error("rejected by upstream: {0}")]
    Rejected(String),
    #[error("device error: {0}")]
    Device(String),
    #[error("not configured: {0}")]
    NotConfigured(String),
}

impl AdapterError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Network(_) | Self::Upstream { .. } | Self::Timeout(_) | Self::DeviceBusy(_)
        )
    }

    /// Short classification string for logging.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Network(_) => "network",
            Self::Upstream { .. } => "upstream",
            Self::Timeout(_) => "timeout",
            Self::DeviceBusy(_) => "device_busy",
            Self::MalformedInput(_) => "malformed_input",
            Self::Rejected(_) => "rejected",
            Self::Device(_) => "device",
            Self::NotConfigured(_) => "not_configured",
        }
    }

    /// Classify an HTTP status code from an upstream API.
    pub fn from_status(status: u16, body: String) -> Self {
        match status {
            429 | 500..=599 => Self::Upstream { status, body },
            _ => Self::Rejected(format!("HTTP {status}: {body}")),
        }
    }
}
