//! Remote storage layout of a SparkNode host

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::utils::file_timestamp;

/// Prefix of rollback marker files inside the backups directory
pub const MARKER_PREFIX: &str = ".previous_version_";

/// Prefix of pre-deploy database dumps inside the backups directory
pub const BACKUP_PREFIX: &str = "pre-deploy-";

/// Suffix of database dumps
pub const BACKUP_SUFFIX: &str = ".sql.gz";

/// Paths on the target host. Always POSIX, independent of the local OS.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteLayout {
    /// Application directory holding the compose project
    pub app_dir: String,
}

impl RemoteLayout {
    pub fn new(app_dir: impl Into<String>) -> Self {
        let app_dir: String = app_dir.into();
        let trimmed = app_dir.trim_end_matches('/');
        Self {
            app_dir: if trimmed.is_empty() {
                "/".to_string()
            } else {
                trimmed.to_string()
            },
        }
    }

    fn join(&self, name: &str) -> String {
        if self.app_dir == "/" {
            format!("/{}", name)
        } else {
            format!("{}/{}", self.app_dir, name)
        }
    }

    /// Compose environment file
    pub fn env_file(&self) -> String {
        self.join(".env")
    }

    /// Structured release record
    pub fn release_record(&self) -> String {
        self.join(".release.json")
    }

    /// Lease directory guarding the target
    pub fn lock_dir(&self) -> String {
        self.join(".deploy.lock")
    }

    /// Owner file inside the lease directory
    pub fn lock_owner_file(&self) -> String {
        format!("{}/owner.json", self.lock_dir())
    }

    /// Backups directory
    pub fn backups_dir(&self) -> String {
        self.join("backups")
    }

    /// Path of a single entry inside the backups directory
    pub fn backup_entry(&self, name: &str) -> String {
        format!("{}/{}", self.backups_dir(), name)
    }

    /// Rollback marker written before a deploy changes the version
    pub fn marker_file(&self, at: DateTime<Utc>, attempt_id: Uuid) -> String {
        self.backup_entry(&marker_name(at, attempt_id))
    }

    /// Pre-deploy dump linked to the attempt that wrote it
    pub fn backup_file(&self, at: DateTime<Utc>, attempt_id: Uuid) -> String {
        self.backup_entry(&backup_name(at, attempt_id))
    }
}

impl Default for RemoteLayout {
    fn default() -> Self {
        Self::new("/opt/sparknode")
    }
}

/// File name of a rollback marker: `<ts>_<millis>-<attempt id>`. Names
/// still sort by time, and after legacy `<ts>` names from the same second.
pub fn marker_name(at: DateTime<Utc>, attempt_id: Uuid) -> String {
    format!(
        "{}{}_{:03}-{}",
        MARKER_PREFIX,
        file_timestamp(at),
        at.timestamp_subsec_millis().min(999),
        attempt_id
    )
}

/// File name of a pre-deploy dump
pub fn backup_name(at: DateTime<Utc>, attempt_id: Uuid) -> String {
    format!(
        "{}{}-{}{}",
        BACKUP_PREFIX,
        file_timestamp(at),
        attempt_id,
        BACKUP_SUFFIX
    )
}

pub fn is_marker_name(name: &str) -> bool {
    name.starts_with(MARKER_PREFIX) && name.len() > MARKER_PREFIX.len()
}

pub fn is_backup_name(name: &str) -> bool {
    name.starts_with(BACKUP_PREFIX) && name.ends_with(BACKUP_SUFFIX)
}

/// The attempt id embedded in a backup name, if it carries one. Dumps written
/// by older tooling (`pre-deploy-<ts>.sql.gz`) have none.
pub fn backup_attempt_id(name: &str) -> Option<Uuid> {
    let stem = name.strip_prefix(BACKUP_PREFIX)?.strip_suffix(BACKUP_SUFFIX)?;
    // <YYYYmmdd_HHMMSS>-<uuid>
    let (_, id) = stem.split_once('-')?;
    Uuid::parse_str(id).ok()
}
