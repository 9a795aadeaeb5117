//! Release models: the version running on a host and how it is recorded

use chrono::{DateTime, Utc};
use relay_models::AttemptKind;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::DeployError;
use crate::utils::sha256_hash;

/// `.env` key holding the running image tag
pub const VERSION_KEY: &str = "APP_VERSION";

/// `.env` key holding the registry organisation
pub const ORG_KEY: &str = "DOCKERHUB_ORG";

/// Current release record schema
pub const RECORD_SCHEMA_VERSION: u32 = 1;

/// History entries kept in the release record
pub const RECORD_HISTORY_LIMIT: usize = 20;

/// A versioned set of container images
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Release {
    pub version_tag: String,
    pub registry_org: String,
}

impl Release {
    pub fn new(version_tag: impl Into<String>, registry_org: impl Into<String>) -> Self {
        Self {
            version_tag: version_tag.into(),
            registry_org: registry_org.into(),
        }
    }

    /// Image reference for one service, e.g. `sparknode/backend:1.2.3`
    pub fn image(&self, service: &str) -> String {
        format!("{}/{}:{}", self.registry_org, service, self.version_tag)
    }
}

/// Reject tags that cannot be docker image tags. Keeps arbitrary text out of
/// `.env` and out of remote command lines.
pub fn validate_version_tag(tag: &str) -> Result<(), DeployError> {
    let valid = !tag.is_empty()
        && tag.len() <= 128
        && !tag.starts_with(['.', '-'])
        && tag
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
    if valid {
        Ok(())
    } else {
        Err(DeployError::ConfigError(format!(
            "Invalid version tag: {:?}",
            tag
        )))
    }
}

// ================================ .env ================================== //

/// Value of `key` in a dotenv document. Surrounding quotes are stripped.
pub fn read_env_value(contents: &str, key: &str) -> Option<String> {
    let prefix = format!("{}=", key);
    contents
        .lines()
        .find_map(|line| line.strip_prefix(prefix.as_str()))
        .map(|value| {
            let value = value.trim();
            value
                .strip_prefix('"')
                .and_then(|v| v.strip_suffix('"'))
                .or_else(|| value.strip_prefix('\'').and_then(|v| v.strip_suffix('\'')))
                .unwrap_or(value)
                .to_string()
        })
}

/// Set each `key=value` in a dotenv document.
///
/// The first `^KEY=` line is replaced in place and any later duplicates are
/// dropped, so every key occurs exactly once afterwards. Missing keys are
/// appended. All other lines are preserved.
pub fn rewrite_env(contents: &str, updates: &[(&str, &str)]) -> String {
    let mut seen = vec![false; updates.len()];
    let mut lines: Vec<String> = Vec::new();

    for line in contents.lines() {
        let matched = updates
            .iter()
            .position(|(key, _)| line.starts_with(&format!("{}=", key)));
        match matched {
            Some(idx) if seen[idx] => {}
            Some(idx) => {
                seen[idx] = true;
                let (key, value) = updates[idx];
                lines.push(format!("{}={}", key, value));
            }
            None => lines.push(line.to_string()),
        }
    }

    for (idx, (key, value)) in updates.iter().enumerate() {
        if !seen[idx] {
            lines.push(format!("{}={}", key, value));
        }
    }

    let mut out = lines.join("\n");
    out.push('\n');
    out
}

// ============================ RELEASE RECORD ============================= //

/// One entry of the release history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseHistoryEntry {
    pub version: String,
    pub kind: AttemptKind,
    pub attempt_id: Uuid,
    pub at: DateTime<Utc>,
}

/// Structured record of what runs on a host, stored as `.release.json`
/// next to `.env` and always replaced atomically.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseRecord {
    pub schema_version: u32,
    pub app_version: String,
    pub registry_org: String,
    pub previous_version: Option<String>,
    pub attempt_id: Uuid,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub history: Vec<ReleaseHistoryEntry>,
    /// SHA-256 of the record serialized without this field
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
}

impl ReleaseRecord {
    /// Record for a release that just replaced `previous_version`
    pub fn next(
        prior: Option<&ReleaseRecord>,
        release: &Release,
        previous_version: Option<String>,
        kind: AttemptKind,
        attempt_id: Uuid,
        at: DateTime<Utc>,
    ) -> Self {
        let mut history = prior.map(|r| r.history.clone()).unwrap_or_default();
        history.push(ReleaseHistoryEntry {
            version: release.version_tag.clone(),
            kind,
            attempt_id,
            at,
        });
        if history.len() > RECORD_HISTORY_LIMIT {
            let excess = history.len() - RECORD_HISTORY_LIMIT;
            history.drain(..excess);
        }

        Self {
            schema_version: RECORD_SCHEMA_VERSION,
            app_version: release.version_tag.clone(),
            registry_org: release.registry_org.clone(),
            previous_version,
            attempt_id,
            updated_at: at,
            history,
            checksum: None,
        }
    }

    fn compute_checksum(&self) -> Result<String, DeployError> {
        let mut unsealed = self.clone();
        unsealed.checksum = None;
        let bytes = serde_json::to_vec(&unsealed)?;
        Ok(sha256_hash(&bytes))
    }

    /// Serialize with a fresh checksum
    pub fn to_json(&self) -> Result<String, DeployError> {
        let mut sealed = self.clone();
        sealed.checksum = Some(self.compute_checksum()?);
        Ok(serde_json::to_string_pretty(&sealed)?)
    }

    /// Parse and verify a stored record
    pub fn from_json(contents: &str) -> Result<Self, DeployError> {
        let record: ReleaseRecord = serde_json::from_str(contents)
            .map_err(|e| DeployError::CorruptRecord(e.to_string()))?;

        if record.schema_version > RECORD_SCHEMA_VERSION {
            return Err(DeployError::CorruptRecord(format!(
                "unsupported schema version {}",
                record.schema_version
            )));
        }

        if let Some(expected) = &record.checksum {
            let actual = record.compute_checksum()?;
            if &actual != expected {
                return Err(DeployError::CorruptRecord(
                    "checksum mismatch".to_string(),
                ));
            }
        }

        Ok(record)
    }
}
