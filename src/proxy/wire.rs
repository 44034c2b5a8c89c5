//! JSON bodies shared by the HTTP surface and the peer client

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Body of `POST /api/tool/execute`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchRequest {
    pub task_id: String,
    pub tool_name: String,

    #[serde(default = "empty_params")]
    pub params: Value,

    /// Idempotency key; a repeated id returns the first envelope
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

impl DispatchRequest {
    pub fn new(task_id: impl Into<String>, tool_name: impl Into<String>, params: Value) -> Self {
        Self {
            task_id: task_id.into(),
            tool_name: tool_name.into(),
            params,
            request_id: None,
        }
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }
}

fn empty_params() -> Value {
    Value::Object(Default::default())
}

/// Body of `GET /api/tools`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolListResponse {
    #[serde(default)]
    pub success: bool,

    #[serde(default)]
    pub data: Vec<String>,
}

/// Body of `GET /health`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,

    #[serde(default)]
    pub service: String,

    #[serde(default)]
    pub version: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_dispatch_request_defaults() {
        let request: DispatchRequest =
            serde_json::from_value(json!({"task_id": "demo", "tool_name": "dir_list"})).unwrap();
        assert_eq!(request.params, json!({}));
        assert!(request.request_id.is_none());

        let body = serde_json::to_value(DispatchRequest::new("demo", "file_read", json!({}))).unwrap();
        assert!(body.get("request_id").is_none());
    }

    #[test]
    fn test_dispatch_request_rejects_missing_tool() {
        let parsed = serde_json::from_value::<DispatchRequest>(json!({"task_id": "demo"}));
        assert!(parsed.is_err());
    }
}
