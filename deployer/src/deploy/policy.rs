//! Step outcome policy shared by every provider

use relay_models::Step;
use serde::{Deserialize, Serialize};

/// What a failing step does to the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepPolicy {
    /// Failure ends the attempt
    Fatal,

    /// Failure is reported as a warning and the pipeline continues
    Warn,

    /// Failure is logged at debug level and the pipeline continues
    BestEffort,
}

/// The canonical policy table. Providers never override it.
pub fn policy_for(step: Step) -> StepPolicy {
    match step {
        Step::Preflight => StepPolicy::Fatal,
        Step::Lock => StepPolicy::Fatal,
        Step::ResolveVersion => StepPolicy::Fatal,
        Step::Backup => StepPolicy::Warn,
        Step::BackupUpload => StepPolicy::BestEffort,
        Step::RestoreDatabase => StepPolicy::Fatal,
        Step::VersionUpdate => StepPolicy::Fatal,
        Step::ImagePull => StepPolicy::Fatal,
        Step::Restart => StepPolicy::Fatal,
        Step::Migrate => StepPolicy::Warn,
        Step::HealthCheck => StepPolicy::Fatal,
        Step::Cleanup => StepPolicy::BestEffort,
    }
}

/// Ordered steps of a forward deploy
pub const DEPLOY_PLAN: [Step; 10] = [
    Step::Preflight,
    Step::Lock,
    Step::Backup,
    Step::BackupUpload,
    Step::VersionUpdate,
    Step::ImagePull,
    Step::Restart,
    Step::Migrate,
    Step::HealthCheck,
    Step::Cleanup,
];

/// Ordered steps of a rollback
pub const ROLLBACK_PLAN: [Step; 9] = [
    Step::Preflight,
    Step::Lock,
    Step::ResolveVersion,
    Step::RestoreDatabase,
    Step::VersionUpdate,
    Step::ImagePull,
    Step::Restart,
    Step::Migrate,
    Step::HealthCheck,
];
