//! Error types for sparkdeploy

use relay_models::Step;
use thiserror::Error;

/// Exit code for a successful run
pub const EXIT_OK: i32 = 0;
/// Exit code for any pipeline or check failure
pub const EXIT_FAILURE: i32 = 1;
/// Exit code for missing required configuration
pub const EXIT_CONFIG: i32 = 2;

/// Main error type for sparkdeploy
#[derive(Error, Debug)]
pub enum DeployError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Remote command failed on {host}: {message}")]
    RemoteError { host: String, message: String },

    #[error("Host unreachable: {0}")]
    Unreachable(String),

    #[error("Step {step} failed: {message}")]
    StepFailed { step: Step, message: String },

    #[error("Health check failed after {attempts} attempts")]
    HealthExhausted { attempts: u32 },

    #[error("Deployment lock held by {owner}")]
    LockHeld { owner: String },

    #[error("No database backup found: {0}")]
    MissingBackup(String),

    #[error("No rollback version found: {0}")]
    MissingVersion(String),

    #[error("Release record is corrupt: {0}")]
    CorruptRecord(String),

    #[error("Provisioning failed: {0}")]
    ProvisionError(String),

    #[error("Invalid transition: {0}")]
    InvalidTransition(String),

    #[error("Aborted: {0}")]
    Aborted(String),

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Relay error: {0}")]
    RelayError(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl DeployError {
    /// Process exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            DeployError::ConfigError(_) => EXIT_CONFIG,
            _ => EXIT_FAILURE,
        }
    }

    /// The pipeline step this error is attributed to, if any
    pub fn step(&self) -> Option<Step> {
        match self {
            DeployError::StepFailed { step, .. } => Some(*step),
            DeployError::HealthExhausted { .. } => Some(Step::HealthCheck),
            DeployError::LockHeld { .. } => Some(Step::Lock),
            DeployError::Unreachable(_) => Some(Step::Preflight),
            DeployError::MissingBackup(_) => Some(Step::RestoreDatabase),
            DeployError::MissingVersion(_) => Some(Step::ResolveVersion),
            _ => None,
        }
    }
}
