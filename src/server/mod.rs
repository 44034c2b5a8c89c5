//! HTTP surface (axum)
//!
//! ```text
//! GET    /                        service banner with tool names
//! GET    /health
//! POST   /api/tool/execute        {task_id, tool_name, params, request_id?}
//! POST   /api/task/create
//! DELETE /api/task/{task_id}
//! GET    /api/task/list
//! GET    /api/task/{task_id}/status
//! GET    /api/tools
//! GET    /api/tools/info
//! POST   /api/tools/refresh
//! ```

pub mod routes;

use crate::engine::Engine;
use axum::routing::{delete, get, post};
use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

pub use routes::{ApiError, AppState, SERVICE_NAME};

pub fn router(engine: Arc<Engine>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(routes::root))
        .route("/health", get(routes::health))
        .route("/api/tool/execute", post(routes::execute_tool))
        .route("/api/task/create", post(routes::create_task))
        .route("/api/task/list", get(routes::list_tasks))
        .route("/api/task/{task_id}", delete(routes::delete_task))
        .route("/api/task/{task_id}/status", get(routes::task_status))
        .route("/api/tools", get(routes::list_tools))
        .route("/api/tools/info", get(routes::tools_info))
        .route("/api/tools/refresh", post(routes::refresh_tools))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(engine)
}

/// Serve until ctrl-c
pub async fn serve(addr: SocketAddr, engine: Arc<Engine>) -> anyhow::Result<()> {
    let app = router(engine);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if tokio::signal::ctrl_c().await.is_err() {
                std::future::pending::<()>().await;
            }
            info!("shutdown signal received");
        })
        .await?;
    Ok(())
}
