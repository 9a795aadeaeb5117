//! Database backup artifacts: off-host copies and selection for restore

use std::fmt;
use std::str::FromStr;

use uuid::Uuid;

use crate::errors::DeployError;
use crate::remote::shell_quote;
use crate::storage::layout::{backup_attempt_id, is_backup_name};

/// Object storage a dump is copied to after it is written
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackupDestination {
    /// `--s3 <bucket>`
    S3 { bucket: String },
    /// `--blob <container>`
    Blob { container: String },
    /// `--gcs <bucket>`
    Gcs { bucket: String },
}

impl BackupDestination {
    /// Upload command run on the host with the provider's CLI
    pub fn upload_command(&self, backup_path: &str) -> String {
        let name = backup_path.rsplit('/').next().unwrap_or(backup_path);
        match self {
            BackupDestination::S3 { bucket } => format!(
                "aws s3 cp {} {}",
                shell_quote(backup_path),
                shell_quote(&format!("s3://{}/backups/{}", bucket, name))
            ),
            BackupDestination::Blob { container } => format!(
                "az storage blob upload --auth-mode login --overwrite --container-name {} --name {} --file {}",
                shell_quote(container),
                shell_quote(&format!("backups/{}", name)),
                shell_quote(backup_path)
            ),
            BackupDestination::Gcs { bucket } => format!(
                "gsutil cp {} {}",
                shell_quote(backup_path),
                shell_quote(&format!("gs://{}/backups/{}", bucket, name))
            ),
        }
    }
}

impl fmt::Display for BackupDestination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackupDestination::S3 { bucket } => write!(f, "s3://{}", bucket),
            BackupDestination::Blob { container } => write!(f, "blob://{}", container),
            BackupDestination::Gcs { bucket } => write!(f, "gs://{}", bucket),
        }
    }
}

impl FromStr for BackupDestination {
    type Err = DeployError;

    /// Parses the URI form used by the relay API: `s3://bucket`,
    /// `blob://container` or `gs://bucket`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (scheme, rest) = s.split_once("://").ok_or_else(|| {
            DeployError::ConfigError(format!("Invalid backup destination: {}", s))
        })?;
        let name = rest.trim_end_matches('/');
        if name.is_empty() {
            return Err(DeployError::ConfigError(format!(
                "Backup destination has no bucket or container: {}",
                s
            )));
        }
        match scheme {
            "s3" => Ok(BackupDestination::S3 {
                bucket: name.to_string(),
            }),
            "blob" | "az" => Ok(BackupDestination::Blob {
                container: name.to_string(),
            }),
            "gs" | "gcs" => Ok(BackupDestination::Gcs {
                bucket: name.to_string(),
            }),
            other => Err(DeployError::ConfigError(format!(
                "Unsupported backup destination scheme: {}",
                other
            ))),
        }
    }
}

/// Pick the dump to restore from a backups directory listing.
///
/// The dump written by `linked_attempt` wins. Otherwise the latest
/// `pre-deploy-*.sql.gz` by name, which is chronological because names
/// start with a sortable timestamp.
pub fn select_backup(names: &[String], linked_attempt: Option<Uuid>) -> Option<String> {
    let mut candidates: Vec<&String> = names.iter().filter(|n| is_backup_name(n)).collect();
    candidates.sort();

    if let Some(id) = linked_attempt {
        if let Some(linked) = candidates
            .iter()
            .rev()
            .find(|n| backup_attempt_id(n) == Some(id))
        {
            return Some((*linked).clone());
        }
    }

    candidates.last().map(|n| (*n).clone())
}
