//! Pipeline vocabulary: providers, steps, step statuses and outcomes

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Cloud provider hosting a target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Aws,
    Azure,
    Gcp,
}

impl Provider {
    pub fn all() -> [Provider; 3] {
        [Provider::Aws, Provider::Azure, Provider::Gcp]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Aws => "aws",
            Provider::Azure => "azure",
            Provider::Gcp => "gcp",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "aws" => Ok(Provider::Aws),
            "azure" => Ok(Provider::Azure),
            "gcp" | "google" => Ok(Provider::Gcp),
            other => Err(format!(
                "Invalid provider: {} (expected aws, azure or gcp)",
                other
            )),
        }
    }
}

/// A single stage of a deploy or rollback
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    Preflight,
    Lock,
    ResolveVersion,
    Backup,
    BackupUpload,
    RestoreDatabase,
    VersionUpdate,
    ImagePull,
    Restart,
    Migrate,
    HealthCheck,
    Cleanup,
}

impl Step {
    pub fn as_str(&self) -> &'static str {
        match self {
            Step::Preflight => "preflight",
            Step::Lock => "lock",
            Step::ResolveVersion => "resolve_version",
            Step::Backup => "backup",
            Step::BackupUpload => "backup_upload",
            Step::RestoreDatabase => "restore_database",
            Step::VersionUpdate => "version_update",
            Step::ImagePull => "image_pull",
            Step::Restart => "restart",
            Step::Migrate => "migrate",
            Step::HealthCheck => "health_check",
            Step::Cleanup => "cleanup",
        }
    }

    /// Human readable label used by progress trackers
    pub fn label(&self) -> &'static str {
        match self {
            Step::Preflight => "Checking connectivity",
            Step::Lock => "Acquiring deployment lock",
            Step::ResolveVersion => "Resolving rollback version",
            Step::Backup => "Backing up database",
            Step::BackupUpload => "Uploading backup",
            Step::RestoreDatabase => "Restoring database",
            Step::VersionUpdate => "Updating release version",
            Step::ImagePull => "Pulling images",
            Step::Restart => "Restarting services",
            Step::Migrate => "Running migrations",
            Step::HealthCheck => "Verifying health",
            Step::Cleanup => "Cleaning up",
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status reported at a step boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Started,
    Succeeded,
    /// The step failed but its policy let the pipeline continue
    Warned,
    Skipped,
    Failed,
}

impl StepStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, StepStatus::Started)
    }
}

/// Final outcome of an attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Success,
    Failed,
    Aborted,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Success => f.write_str("success"),
            Outcome::Failed => f.write_str("failed"),
            Outcome::Aborted => f.write_str("aborted"),
        }
    }
}

/// Whether an attempt moves forward or back
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttemptKind {
    Deploy,
    Rollback,
}

impl fmt::Display for AttemptKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttemptKind::Deploy => f.write_str("deploy"),
            AttemptKind::Rollback => f.write_str("rollback"),
        }
    }
}
