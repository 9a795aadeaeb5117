//! HTTP server setup

use std::future::Future;
use std::sync::Arc;

use axum::{
    http::Method,
    routing::{get, post},
    Router,
};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::app::options::ServerOptions;
use crate::errors::DeployError;
use crate::server::handlers::{
    cancel_deployment_handler, get_deployment_handler, health_handler,
    list_deployments_handler, start_deployment_handler, start_rollback_handler,
    version_handler,
};
use crate::server::state::ServerState;
use crate::server::ws::logs_ws_handler;

/// Relay routes over the given state
pub fn router(state: Arc<ServerState>) -> Router {
    Router::new()
        // Health and version
        .route("/health", get(health_handler))
        .route("/version", get(version_handler))
        // Attempts
        .route(
            "/deployments",
            get(list_deployments_handler).post(start_deployment_handler),
        )
        .route("/deployments/{id}", get(get_deployment_handler))
        .route("/deployments/{id}/cancel", post(cancel_deployment_handler))
        .route("/rollbacks", post(start_rollback_handler))
        // Live frames
        .route("/ws/deployments/{id}/logs", get(logs_ws_handler))
        // State and middleware
        .with_state(state)
        .layer(
            // Only reads are open to other origins
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods([Method::GET]),
        )
        .layer(TraceLayer::new_for_http())
}

/// Start the HTTP server
pub async fn serve(
    options: &ServerOptions,
    state: Arc<ServerState>,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<JoinHandle<Result<(), DeployError>>, DeployError> {
    let app = router(state);

    let addr = format!("{}:{}", options.host, options.port);
    info!("Starting relay server on {}", addr);

    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| DeployError::ServerError(e.to_string()))?;

    let handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal)
            .await
            .map_err(|e| DeployError::ServerError(e.to_string()))
    });

    Ok(handle)
}
