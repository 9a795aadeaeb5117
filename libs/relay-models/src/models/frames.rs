//! WebSocket frames streamed on `/ws/deployments/{id}/logs`

use serde::{Deserialize, Serialize};

use crate::models::pipeline::{Outcome, Step, StepStatus};

/// One frame on the relay socket.
///
/// Log frames keep the `log` key so consumers that only read `{"log": ...}`
/// keep working; step boundaries are explicit `step` frames.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RelayFrame {
    Log {
        log: String,
    },
    Step {
        step: Step,
        status: StepStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    Finished {
        outcome: Outcome,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

impl RelayFrame {
    pub fn log(line: impl Into<String>) -> Self {
        RelayFrame::Log { log: line.into() }
    }

    pub fn is_finished(&self) -> bool {
        matches!(self, RelayFrame::Finished { .. })
    }
}
