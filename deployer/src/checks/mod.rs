//! Standalone operational health check of a SparkNode host

pub mod resources;
pub mod runner;
pub mod tls;

use serde::{Deserialize, Serialize};

use crate::errors::{EXIT_FAILURE, EXIT_OK};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Pass,
    Warn,
    Fail,
}

/// Outcome of one independent check
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckResult {
    pub name: String,
    pub status: CheckStatus,
    pub detail: String,
}

impl CheckResult {
    pub fn pass(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::new(name, CheckStatus::Pass, detail)
    }

    pub fn warn(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::new(name, CheckStatus::Warn, detail)
    }

    pub fn fail(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::new(name, CheckStatus::Fail, detail)
    }

    fn new(name: impl Into<String>, status: CheckStatus, detail: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status,
            detail: detail.into(),
        }
    }
}

/// Pass below `warn`, warn below `crit`, fail at or above `crit`
pub fn classify_percent(value: f32, warn: f32, crit: f32) -> CheckStatus {
    if value >= crit {
        CheckStatus::Fail
    } else if value >= warn {
        CheckStatus::Warn
    } else {
        CheckStatus::Pass
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CheckReport {
    pub results: Vec<CheckResult>,
}

impl CheckReport {
    pub fn push(&mut self, result: CheckResult) {
        self.results.push(result);
    }

    pub fn count(&self, status: CheckStatus) -> usize {
        self.results.iter().filter(|r| r.status == status).count()
    }

    /// Failure iff any check failed; warnings alone still pass
    pub fn exit_code(&self) -> i32 {
        if self.count(CheckStatus::Fail) > 0 {
            EXIT_FAILURE
        } else {
            EXIT_OK
        }
    }
}
