//! HTTP client for the peer tool service
//!
//! The peer exposes the same contract this engine serves:
//! - `POST /api/tool/execute` with `{task_id, tool_name, params}`
//! - `GET /api/tools` returning `{success, data: [names]}`
//! - `GET /health`
//!
//! Transport failures never escape `forward`; they come back as failure
//! envelopes whose error starts with `proxy_unreachable:`.

use crate::errors::{EngineError, Result};
use crate::proxy::wire::{DispatchRequest, HealthResponse, ToolListResponse};
use crate::tools::retry::RetryManager;
use crate::tools::types::{ExecutionEnvelope, Tool, ToolContext, ToolDescriptor};
use async_trait::async_trait;
use reqwest::{Client, Response};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Client of the peer tool service
#[derive(Debug, Clone)]
pub struct ProxyBridge {
    client: Client,
    base_url: String,
    retry: RetryManager,
}

impl ProxyBridge {
    /// Create a bridge with a per-request timeout
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(EngineError::HttpError)?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            retry: RetryManager::new(),
        })
    }

    /// Override the retry policy used for discovery
    pub fn with_retry(mut self, retry: RetryManager) -> Self {
        self.retry = retry;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Execute `tool_name` on the peer. Never retried.
    pub async fn forward(&self, task_id: &str, tool_name: &str, params: Value) -> ExecutionEnvelope {
        self.forward_request(&DispatchRequest::new(task_id, tool_name, params))
            .await
    }

    /// Execute a prepared request on the peer
    pub async fn forward_request(&self, request: &DispatchRequest) -> ExecutionEnvelope {
        match self.try_forward(request).await {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(tool = %request.tool_name, task_id = %request.task_id, error = %e, "proxy call failed");
                match e {
                    EngineError::Execution(message) => ExecutionEnvelope::failure(message),
                    other => ExecutionEnvelope::failure(other.to_string()),
                }
            }
        }
    }

    async fn try_forward(&self, request: &DispatchRequest) -> Result<ExecutionEnvelope> {
        let url = format!("{}/api/tool/execute", self.base_url);
        debug!(%url, tool = %request.tool_name, "forwarding tool call");

        let response = self
            .client
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(unreachable)?;

        let response = check_status(response).await?;
        let body: Value = response
            .json()
            .await
            .map_err(|e| EngineError::Execution(format!("Invalid proxy response: {}", e)))?;

        Ok(ExecutionEnvelope::from_remote(body))
    }

    /// Names of the tools the peer offers (single attempt)
    pub async fn list_tools(&self) -> Result<Vec<String>> {
        let url = format!("{}/api/tools", self.base_url);
        let response = self.client.get(&url).send().await.map_err(unreachable)?;
        let response = check_status(response).await?;

        let listing: ToolListResponse = response
            .json()
            .await
            .map_err(|e| EngineError::Execution(format!("Invalid tool list: {}", e)))?;
        if !listing.success {
            return Err(EngineError::Execution(
                "Proxy reported failure listing tools".to_string(),
            ));
        }
        Ok(listing.data)
    }

    /// `list_tools` with backoff on transport failures
    pub async fn discover_tools(&self) -> Result<Vec<String>> {
        self.retry.execute_with_retry(|| self.list_tools()).await
    }

    pub async fn health(&self) -> Result<HealthResponse> {
        let url = format!("{}/health", self.base_url);
        let response = self.client.get(&url).send().await.map_err(unreachable)?;
        let response = check_status(response).await?;
        response
            .json()
            .await
            .map_err(|e| EngineError::Execution(format!("Invalid health response: {}", e)))
    }
}

fn unreachable(e: reqwest::Error) -> EngineError {
    EngineError::ProxyUnreachable(e.to_string())
}

/// Turn a non-2xx response into an execution error carrying the peer's detail
async fn check_status(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let text = response.text().await.unwrap_or_default();
    let detail = serde_json::from_str::<Value>(&text)
        .ok()
        .and_then(|body| {
            ["detail", "error", "message"]
                .iter()
                .find_map(|key| body[*key].as_str().map(String::from))
        })
        .unwrap_or(text);

    Err(EngineError::Execution(format!(
        "Proxy tool execution failed: {} - {}",
        status.as_u16(),
        detail
    )))
}

/// A catalog entry whose calls are forwarded to the peer
pub struct ProxyTool {
    descriptor: ToolDescriptor,
    bridge: Arc<ProxyBridge>,
}

impl ProxyTool {
    pub fn new(name: impl Into<String>, bridge: Arc<ProxyBridge>) -> Self {
        Self {
            descriptor: ToolDescriptor::proxy(name, bridge.base_url()),
            bridge,
        }
    }
}

#[async_trait]
impl Tool for ProxyTool {
    fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    async fn execute(&self, ctx: &ToolContext, params: Value) -> Result<ExecutionEnvelope> {
        Ok(self
            .bridge
            .forward(&ctx.task_id, &self.descriptor.name, params)
            .await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    /// A port nothing listens on
    async fn closed_port_url() -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn test_forward_to_closed_port_is_unreachable() {
        let bridge = ProxyBridge::new(&closed_port_url().await, Duration::from_secs(2)).unwrap();
        let envelope = bridge.forward("demo", "render_pdf", json!({})).await;

        assert!(!envelope.success);
        assert!(envelope.error.unwrap().starts_with("proxy_unreachable:"));
    }

    #[tokio::test]
    async fn test_discovery_gives_up_with_unreachable() {
        let bridge = ProxyBridge::new(&closed_port_url().await, Duration::from_secs(1))
            .unwrap()
            .with_retry(RetryManager::with_config(2, 1));
        let err = bridge.discover_tools().await.unwrap_err();
        assert!(matches!(err, EngineError::ProxyUnreachable(_)));
    }

    #[test]
    fn test_base_url_trailing_slash() {
        let bridge = ProxyBridge::new("http://localhost:8892/", Duration::from_secs(1)).unwrap();
        assert_eq!(bridge.base_url(), "http://localhost:8892");

        let tool = ProxyTool::new("render_pdf", Arc::new(bridge));
        assert_eq!(tool.descriptor().name, "render_pdf");
        assert!(tool.descriptor().description.contains("localhost:8892"));
    }
}
