use std::sync::{Arc, Weak};

use async_trait::async_trait;

use switchboard_core::errors::AdapterError;
use switchboard_core::tools::{CallAdapter, InvocationContext, OutputKind, ToolDescriptor};
use switchboard_engine::ToolRegistry;

/// `help`: lists every registered tool with its description.
///
/// Holds a weak reference so the registry can own this adapter without a
/// cycle.
pub struct HelpTool {
    registry: Weak<ToolRegistry>,
}

impl HelpTool {
    pub fn new(registry: &Arc<ToolRegistry>) -> Self {
        Self {
            registry: Arc::downgrade(registry),
        }
    }
}

#[async_trait]
impl CallAdapter for HelpTool {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor::new(
            "help",
            "List the available tools and what they do.",
            serde_json::json!({"type": "object", "additionalProperties": false}),
            OutputKind::SingleResult,
        )
    }

    async fn invoke(
        &self,
        _args: serde_json::Value,
        _ctx: &InvocationContext,
    ) -> Result<serde_json::Value, AdapterError> {
        let registry = self
            .registry
            .upgrade()
            .ok_or_else(|| AdapterError::NotConfigured("tool registry is gone".into()))?;
        let tools = registry.list();

        let mut summary = String::from("Available tools:\n");
        for tool in &tools {
            summary.push_str(&format!("- {}: {}\n", tool.name, tool.description));
        }
        let entries: Vec<_> = tools
            .iter()
            .map(|t| {
                serde_json::json!({
                    "name": t.name,
                    "description": t.description,
                    "outputKind": t.output_kind,
                })
            })
            .collect();
        Ok(serde_json::json!({ "tools": entries, "summary": summary }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use switchboard_core::ids::{InvocationId, SessionId};
    use switchboard_core::tools::Adapter;
    use switchboard_engine::mock::EchoTool;
    use tokio_util::sync::CancellationToken;

    fn ctx() -> InvocationContext {
        InvocationContext {
            session_id: SessionId::new(),
            invocation_id: InvocationId::from("h"),
            cancel: CancellationToken::new(),
        }
    }

    #[tokio::test]
    async fn lists_tools_including_itself() {
        let registry = Arc::new(ToolRegistry::new());
        registry
            .register(Adapter::Call(Arc::new(EchoTool::new("echo"))))
            .unwrap();
        let help = Arc::new(HelpTool::new(&registry));
        registry.register(Adapter::Call(help.clone())).unwrap();

        let out = help.invoke(serde_json::json!({}), &ctx()).await.unwrap();
        let names: Vec<_> = out["tools"]
            .as_array()
            .unwrap()
            .iter()
            .map(|t| t["name"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["echo", "help"]);
        assert_eq!(out["tools"][1]["outputKind"], "single_result");
        assert!(out["summary"].as_str().unwrap().contains("- echo: Echo tool echo"));
    }

    #[tokio::test]
    async fn dropped_registry_is_an_error() {
        let registry = Arc::new(ToolRegistry::new());
        let help = HelpTool::new(&registry);
        drop(registry);
        let err = help.invoke(serde_json::json!({}), &ctx()).await.unwrap_err();
        assert!(!err.is_retryable());
    }
}
