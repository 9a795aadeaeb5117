//! Deployment attempt models

use chrono::{DateTime, Utc};
use relay_models::{AttemptKind, DeploymentSummary, Outcome, Step, StepStatus};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::target::Target;

/// Result of one pipeline step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepReport {
    pub step: Step,
    pub status: StepStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub duration_ms: u64,
}

/// One deploy or rollback run. Lives only as long as the invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentAttempt {
    pub id: Uuid,
    pub kind: AttemptKind,
    pub target: Target,
    /// Version being rolled out; unknown for a rollback until it is resolved
    pub version: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub current_step: Option<Step>,
    pub outcome: Option<Outcome>,
    pub error: Option<String>,
    pub steps: Vec<StepReport>,
}

impl DeploymentAttempt {
    pub fn new(id: Uuid, kind: AttemptKind, target: Target, version: Option<String>) -> Self {
        Self {
            id,
            kind,
            target,
            version,
            started_at: Utc::now(),
            finished_at: None,
            current_step: None,
            outcome: None,
            error: None,
            steps: Vec::new(),
        }
    }

    /// Report recorded for `step`, if it ran
    pub fn report(&self, step: Step) -> Option<&StepReport> {
        self.steps.iter().find(|r| r.step == step)
    }

    /// Steps whose failure was tolerated
    pub fn warnings(&self) -> impl Iterator<Item = &StepReport> {
        self.steps
            .iter()
            .filter(|r| r.status == StepStatus::Warned)
    }

    pub fn finish(&mut self, outcome: Outcome, error: Option<String>) {
        self.outcome = Some(outcome);
        self.error = error;
        self.finished_at = Some(Utc::now());
    }

    pub fn summary(&self) -> DeploymentSummary {
        DeploymentSummary {
            id: self.id,
            kind: self.kind,
            provider: self.target.provider,
            host: self.target.host.clone(),
            version: self.version.clone(),
            current_step: self.current_step,
            outcome: self.outcome,
            error: self.error.clone(),
            started_at: self.started_at,
            finished_at: self.finished_at,
        }
    }
}
