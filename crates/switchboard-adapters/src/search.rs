use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::debug;

use switchboard_core::errors::AdapterError;
use switchboard_core::tools::{CallAdapter, InvocationContext, OutputKind, ToolDescriptor};
use switchboard_settings::HttpAdapterSettings;

use crate::http::{build_client, check_status, classify, endpoint};

const SEARCH_PATH: &str = "/res/v1/web/search";
const DEFAULT_COUNT: u64 = 5;
const MAX_COUNT: u64 = 20;

/// Web search against a Brave-compatible JSON API.
pub struct WebSearchTool {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    timeout: Duration,
}

impl WebSearchTool {
    pub fn new(settings: &HttpAdapterSettings) -> Self {
        let timeout = Duration::from_millis(settings.timeout_ms);
        Self {
            client: build_client(timeout),
            base_url: settings.base_url.clone(),
            api_key: settings.api_key.clone(),
            timeout,
        }
    }
}

#[derive(Debug, Serialize, PartialEq)]
pub struct SearchHit {
    pub title: String,
    pub url: String,
    pub description: String,
}

fn extract_hits(body: &serde_json::Value) -> Vec<SearchHit> {
    body["web"]["results"]
        .as_array()
        .map(|results| {
            results
                .iter()
                .map(|r| SearchHit {
                    title: r["title"].as_str().unwrap_or("(untitled)").to_string(),
                    url: r["url"].as_str().unwrap_or_default().to_string(),
                    description: r["description"].as_str().unwrap_or_default().to_string(),
                })
                .collect()
        })
        .unwrap_or_default()
}

#[async_trait]
impl CallAdapter for WebSearchTool {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor::new(
            "web_search",
            "Search the web and return the top results' titles, links and snippets.",
            serde_json::json!({
                "type": "object",
                "required": ["query"],
                "properties": {
                    "query": {"type": "string", "minLength": 1, "description": "The search query"},
                    "count": {
                        "type": "integer",
                        "minimum": 1,
                        "maximum": MAX_COUNT,
                        "description": "Number of results (default 5)"
                    }
                }
            }),
            OutputKind::SingleResult,
        )
    }

    async fn invoke(
        &self,
        args: serde_json::Value,
        ctx: &InvocationContext,
    ) -> Result<serde_json::Value, AdapterError> {
        let query = args["query"]
            .as_str()
            .ok_or_else(|| AdapterError::MalformedInput("query is required".into()))?;
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| AdapterError::NotConfigured("BRAVE_SEARCH_API_KEY not set".into()))?;
        let count = args["count"]
            .as_u64()
            .unwrap_or(DEFAULT_COUNT)
            .clamp(1, MAX_COUNT);

        debug!(invocation_id = %ctx.invocation_id, query, count, "web search");
        let response = self
            .client
            .get(endpoint(&self.base_url, SEARCH_PATH))
            .header("X-Subscription-Token", api_key)
            .header("Accept", "application/json")
            .query(&[("q", query), ("count", &count.to_string())])
            .send()
            .await
            .map_err(|e| classify(e, self.timeout))?;
        let body: serde_json::Value = check_status(response)
            .await?
            .json()
            .await
            .map_err(|e| classify(e, self.timeout))?;

        Ok(serde_json::json!({
            "query": query,
            "results": extract_hits(&body),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use switchboard_core::ids::{InvocationId, SessionId};
    use tokio_util::sync::CancellationToken;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn ctx() -> InvocationContext {
        InvocationContext {
            session_id: SessionId::new(),
            invocation_id: InvocationId::from("q1"),
            cancel: CancellationToken::new(),
        }
    }

    fn tool(server: &MockServer, key: Option<&str>) -> WebSearchTool {
        WebSearchTool::new(&HttpAdapterSettings {
            enabled: true,
            base_url: server.uri(),
            api_key: key.map(str::to_string),
            timeout_ms: 2_000,
        })
    }

    #[tokio::test]
    async fn maps_results() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(SEARCH_PATH))
            .and(query_param("q", "rust tokio"))
            .and(query_param("count", "2"))
            .and(header("X-Subscription-Token", "key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "web": {"results": [
                    {"title": "Tokio", "url": "https://tokio.rs", "description": "An async runtime"},
                    {"url": "https://docs.rs/tokio"}
                ]}
            })))
            .mount(&server)
            .await;

        let out = tool(&server, Some("key"))
            .invoke(serde_json::json!({"query": "rust tokio", "count": 2}), &ctx())
            .await
            .unwrap();
        let results = out["results"].as_array().unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0]["title"], "Tokio");
        assert_eq!(results[1]["title"], "(untitled)");
        assert_eq!(results[1]["description"], "");
    }

    #[tokio::test]
    async fn rate_limit_is_retryable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(429).set_body_string("slow down"))
            .mount(&server)
            .await;
        let err = tool(&server, Some("key"))
            .invoke(serde_json::json!({"query": "x"}), &ctx())
            .await
            .unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn unauthorized_not_retryable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(401).set_body_string("bad token"))
            .mount(&server)
            .await;
        let err = tool(&server, Some("key"))
            .invoke(serde_json::json!({"query": "x"}), &ctx())
            .await
            .unwrap_err();
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn missing_key_not_configured() {
        let server = MockServer::start().await;
        let err = tool(&server, None)
            .invoke(serde_json::json!({"query": "x"}), &ctx())
            .await
            .unwrap_err();
        assert!(matches!(err, AdapterError::NotConfigured(_)));
    }

    #[test]
    fn no_results_is_empty_list() {
        assert!(extract_hits(&serde_json::json!({})).is_empty());
    }
}
