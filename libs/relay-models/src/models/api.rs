//! Relay HTTP API models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::pipeline::{AttemptKind, Outcome, Provider, Step};

/// Health response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
}

/// Version response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionResponse {
    pub version: String,
    pub git_hash: String,
    pub build_time: String,
}

/// Snapshot of one deploy or rollback attempt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentSummary {
    pub id: Uuid,
    pub kind: AttemptKind,
    pub provider: Provider,
    pub host: String,
    /// Requested version; for rollbacks without an explicit version this is
    /// filled in once the version is resolved
    pub version: Option<String>,
    pub current_step: Option<Step>,
    pub outcome: Option<Outcome>,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// Deployment list response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentListResponse {
    pub deployments: Vec<DeploymentSummary>,
    pub total: usize,
}

/// Target fields shared by deploy and rollback requests. Anything left out
/// falls back to the server's settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TargetRequest {
    pub provider: Option<Provider>,
    pub host: String,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub app_dir: Option<String>,
}

/// Start deployment request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartDeploymentRequest {
    #[serde(flatten)]
    pub target: TargetRequest,
    pub version: String,
    #[serde(default)]
    pub org: Option<String>,
    #[serde(default)]
    pub skip_backup: bool,
    #[serde(default)]
    pub skip_migrate: bool,
    /// Object storage URI the pre-deploy dump is copied to
    #[serde(default)]
    pub backup_upload: Option<String>,
}

/// Start rollback request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartRollbackRequest {
    #[serde(flatten)]
    pub target: TargetRequest,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub org: Option<String>,
    #[serde(default)]
    pub restore_db: bool,
    #[serde(default)]
    pub db_backup: Option<String>,
    /// Must be true; the relay has no interactive prompt
    #[serde(default)]
    pub confirm: bool,
}

/// Response to a start request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartResponse {
    pub id: Uuid,
    pub logs_url: String,
}

/// Error body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}
