//! HTTP handlers
//!
//! Tool execution always answers 200 with an envelope once the body parses;
//! task management maps engine errors onto status codes.

use crate::engine::Engine;
use crate::errors::EngineError;
use crate::proxy::{DispatchRequest, HealthResponse};
use crate::task::TaskRegistry;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{error, info};

pub const SERVICE_NAME: &str = "toolgate";

pub type AppState = Arc<Engine>;

/// Engine error rendered as `{success: false, error, error_type}`
pub struct ApiError(pub EngineError);

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            EngineError::Validation(_) => StatusCode::BAD_REQUEST,
            EngineError::NotFound(_) => StatusCode::NOT_FOUND,
            EngineError::Conflict(_) => StatusCode::CONFLICT,
            EngineError::AccessDenied { .. } => StatusCode::FORBIDDEN,
            EngineError::ProxyUnreachable(_) => StatusCode::BAD_GATEWAY,
            EngineError::ConfigError(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            error!(error = %self.0, "request failed");
        }
        let body = json!({
            "success": false,
            "error": self.0.to_string(),
            "error_type": self.0.kind(),
        });
        (status, Json(body)).into_response()
    }
}

type ApiResult = Result<Json<Value>, ApiError>;

fn ok(data: impl serde::Serialize) -> ApiResult {
    Ok(Json(json!({ "success": true, "data": data })))
}

/// Run registry work that walks whole trees on the blocking pool
async fn blocking<T, F>(tasks: &Arc<TaskRegistry>, work: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce(&TaskRegistry) -> crate::errors::Result<T> + Send + 'static,
{
    let tasks = tasks.clone();
    tokio::task::spawn_blocking(move || work(&*tasks))
        .await
        .map_err(|e| ApiError(EngineError::Generic(format!("worker failed: {}", e))))?
        .map_err(ApiError)
}

pub async fn root(State(engine): State<AppState>) -> Json<Value> {
    Json(json!({
        "message": "Tool dispatch service",
        "tools": engine.catalog().names().await,
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        service: SERVICE_NAME.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

pub async fn execute_tool(
    State(engine): State<AppState>,
    payload: Result<Json<DispatchRequest>, JsonRejection>,
) -> Response {
    let request = match payload {
        Ok(Json(request)) => request,
        Err(rejection) => {
            let body = json!({
                "success": false,
                "error": rejection.body_text(),
                "error_type": "validation_error",
            });
            return (StatusCode::UNPROCESSABLE_ENTITY, Json(body)).into_response();
        }
    };

    let envelope = engine.dispatcher().execute_request(request).await;
    Json(envelope).into_response()
}

#[derive(Debug, Deserialize)]
pub struct CreateTaskRequest {
    pub task_id: String,

    #[serde(default)]
    pub task_name: String,

    #[serde(default)]
    pub requirements: Option<String>,
}

pub async fn create_task(
    State(engine): State<AppState>,
    Json(request): Json<CreateTaskRequest>,
) -> ApiResult {
    let created = blocking(engine.tasks(), move |tasks| {
        tasks.create(&request.task_id, &request.task_name, request.requirements)
    })
    .await?;
    ok(created)
}

pub async fn delete_task(State(engine): State<AppState>, Path(task_id): Path<String>) -> ApiResult {
    let deleted = blocking(engine.tasks(), move |tasks| tasks.delete(&task_id)).await?;
    ok(deleted)
}

pub async fn list_tasks(State(engine): State<AppState>) -> ApiResult {
    ok(engine.tasks().list()?)
}

pub async fn task_status(State(engine): State<AppState>, Path(task_id): Path<String>) -> ApiResult {
    let status = blocking(engine.tasks(), move |tasks| tasks.get_status(&task_id)).await?;
    ok(status)
}

pub async fn list_tools(State(engine): State<AppState>) -> ApiResult {
    ok(engine.catalog().names().await)
}

/// Catalog summary plus dispatch counters
pub async fn tools_info(State(engine): State<AppState>) -> ApiResult {
    let mut info = serde_json::to_value(engine.catalog().info().await).map_err(EngineError::from)?;
    info["stats"] = json!(engine.dispatcher().stats());
    ok(info)
}

pub async fn refresh_tools(State(engine): State<AppState>) -> ApiResult {
    let proxy_count = engine.catalog().refresh_proxy_tools().await?;
    info!(proxy_count, "proxy tools refreshed on request");
    ok(json!({
        "proxy_count": proxy_count,
        "total_count": engine.catalog().len().await,
    }))
}
