use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::errors::AdapterError;
use crate::ids::{InvocationId, SessionId};
use crate::stream::FrameSource;

/// How a tool produces output.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputKind {
    /// One result per invocation (weather, search).
    SingleResult,
    /// A sequence of frames until closed (camera).
    Stream,
}

/// Static description of a tool, advertised during discovery.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
    pub output_kind: OutputKind,
}

impl ToolDescriptor {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        input_schema: serde_json::Value,
        output_kind: OutputKind,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema,
            output_kind,
        }
    }
}

/// Context handed to adapters for one invocation.
#[derive(Clone, Debug)]
pub struct InvocationContext {
    pub session_id: SessionId,
    pub invocation_id: InvocationId,
    /// Fires when the owning session closes or the capability is withdrawn.
    pub cancel: CancellationToken,
}

/// Request/response tool (weather, search).
#[async_trait]
pub trait CallAdapter: Send + Sync {
    fn descriptor(&self) -> ToolDescriptor;

    async fn invoke(
        &self,
        args: serde_json::Value,
        ctx: &InvocationContext,
    ) -> Result<serde_json::Value, AdapterError>;
}

/// Continuous-output tool (camera).
#[async_trait]
pub trait StreamAdapter: Send + Sync {
    fn descriptor(&self) -> ToolDescriptor;

    async fn open(
        &self,
        args: serde_json::Value,
        ctx: &InvocationContext,
    ) -> Result<Box<dyn FrameSource>, AdapterError>;
}

/// The two adapter capability variants. Dispatch picks the path from the
/// descriptor's [`OutputKind`], never from the concrete adapter type.
#[derive(Clone)]
pub enum Adapter {
    Call(Arc<dyn CallAdapter>),
    Stream(Arc<dyn StreamAdapter>),
}

impl Adapter {
    pub fn descriptor(&self) -> ToolDescriptor {
        match self {
            Self::Call(a) => a.descriptor(),
            Self::Stream(a) => a.descriptor(),
        }
    }
}

impl std::fmt::Debug for Adapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Call(a) => write!(f, "Adapter::Call({})", a.descriptor().name),
            Self::Stream(a) => write!(f, "Adapter::Stream({})", a.descriptor().name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    #[async_trait]
    impl CallAdapter for Echo {
        fn descriptor(&self) -> ToolDescriptor {
            ToolDescriptor::new(
                "echo",
                "Echo the arguments",
                serde_json::json!({"type": "object"}),
                OutputKind::SingleResult,
            )
        }

        async fn invoke(
            &self,
            args: serde_json::Value,
            _ctx: &InvocationContext,
        ) -> Result<serde_json::Value, AdapterError> {
            Ok(args)
        }
    }

    #[test]
    fn output_kind_serde() {
        let json = serde_json::to_string(&OutputKind::SingleResult).unwrap();
        assert_eq!(json, r#""single_result""#);
        let json = serde_json::to_string(&OutputKind::Stream).unwrap();
        assert_eq!(json, r#""stream""#);
    }

    #[test]
    fn adapter_exposes_descriptor() {
        let adapter = Adapter::Call(Arc::new(Echo));
        let desc = adapter.descriptor();
        assert_eq!(desc.name, "echo");
        assert_eq!(desc.output_kind, OutputKind::SingleResult);
        assert_eq!(format!("{adapter:?}"), "Adapter::Call(echo)");
    }

    #[tokio::test]
    async fn call_adapter_invokes() {
        let ctx = InvocationContext {
            session_id: SessionId::new(),
            invocation_id: InvocationId::from("1"),
            cancel: CancellationToken::new(),
        };
        let out = Echo.invoke(serde_json::json!({"x": 1}), &ctx).await.unwrap();
        assert_eq!(out["x"], 1);
    }
}
