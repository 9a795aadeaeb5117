//! HTTP request handlers

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use relay_models::{
    DeploymentListResponse, ErrorResponse, HealthResponse, StartDeploymentRequest,
    StartResponse, StartRollbackRequest, VersionResponse,
};
use secrecy::ExposeSecret;
use uuid::Uuid;

use crate::errors::DeployError;
use crate::server::launcher;
use crate::server::state::ServerState;
use crate::utils::version_info;

/// Error response with a JSON body
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(ErrorResponse {
                error: self.message,
            }),
        )
            .into_response()
    }
}

impl From<DeployError> for ApiError {
    fn from(err: DeployError) -> Self {
        let status = match err {
            DeployError::ConfigError(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        ApiError::new(status, err.to_string())
    }
}

/// Route under which an attempt's frames are streamed
pub fn logs_url(id: Uuid) -> String {
    format!("/ws/deployments/{}/logs", id)
}

/// Require `Authorization: Bearer <token>` when a token is configured
fn authorize(state: &ServerState, headers: &HeaderMap) -> Result<(), ApiError> {
    let Some(expected) = &state.options.api_token else {
        return Ok(());
    };
    let provided = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));
    match provided {
        Some(token) if token == expected.expose_secret() => Ok(()),
        Some(_) => Err(ApiError::new(StatusCode::UNAUTHORIZED, "invalid token")),
        None => Err(ApiError::new(StatusCode::UNAUTHORIZED, "missing bearer token")),
    }
}

/// Health check handler
pub async fn health_handler() -> impl IntoResponse {
    let version = version_info();
    Json(HealthResponse {
        status: "healthy".to_string(),
        service: "sparkdeploy".to_string(),
        version: version.version,
    })
}

/// Version handler
pub async fn version_handler() -> impl IntoResponse {
    let version = version_info();
    Json(VersionResponse {
        version: version.version,
        git_hash: version.git_hash,
        build_time: version.build_time,
    })
}

/// Deployments list handler, newest first
pub async fn list_deployments_handler(
    State(state): State<Arc<ServerState>>,
) -> impl IntoResponse {
    let deployments = state.registry.list().await;
    let total = deployments.len();
    Json(DeploymentListResponse { deployments, total })
}

/// Single deployment handler
pub async fn get_deployment_handler(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let entry = state
        .registry
        .get(id)
        .await
        .ok_or_else(|| ApiError::new(StatusCode::NOT_FOUND, format!("no attempt {}", id)))?;
    Ok(Json(entry.summary().await))
}

/// Start a deployment
pub async fn start_deployment_handler(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    Json(request): Json<StartDeploymentRequest>,
) -> Result<impl IntoResponse, ApiError> {
    authorize(&state, &headers)?;
    let id = launcher::start_deployment(&state, request).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(StartResponse {
            id,
            logs_url: logs_url(id),
        }),
    ))
}

/// Start a rollback
pub async fn start_rollback_handler(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    Json(request): Json<StartRollbackRequest>,
) -> Result<impl IntoResponse, ApiError> {
    authorize(&state, &headers)?;
    let id = launcher::start_rollback(&state, request).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(StartResponse {
            id,
            logs_url: logs_url(id),
        }),
    ))
}

/// Abort a running attempt. The lease is released by the pipeline itself.
pub async fn cancel_deployment_handler(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    authorize(&state, &headers)?;
    let entry = state
        .registry
        .get(id)
        .await
        .ok_or_else(|| ApiError::new(StatusCode::NOT_FOUND, format!("no attempt {}", id)))?;
    if entry.cancel().await {
        Ok(StatusCode::ACCEPTED)
    } else {
        Err(ApiError::new(
            StatusCode::CONFLICT,
            format!("attempt {} is not running", id),
        ))
    }
}
