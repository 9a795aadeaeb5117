//! Utility functions

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Format used in backup and marker file names. Sorts lexicographically in
/// chronological order.
pub const FILE_TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Version information for sparkdeploy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionInfo {
    pub version: String,
    pub git_hash: String,
    pub build_time: String,
}

/// Get version information
pub fn version_info() -> VersionInfo {
    VersionInfo {
        version: env!("CARGO_PKG_VERSION").to_string(),
        git_hash: option_env!("GIT_HASH").unwrap_or("unknown").to_string(),
        build_time: option_env!("BUILD_TIME").unwrap_or("unknown").to_string(),
    }
}

/// Generate a new attempt id
pub fn generate_attempt_id() -> Uuid {
    Uuid::new_v4()
}

/// Timestamp slug for file names, e.g. `20261019_143005`
pub fn file_timestamp(at: DateTime<Utc>) -> String {
    at.format(FILE_TIMESTAMP_FORMAT).to_string()
}

/// Calculate SHA256 hash of data as lowercase hex
pub fn sha256_hash(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

/// Name of the operator running this process, for lock ownership
pub fn operator_name() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "unknown".to_string())
}
