//! Finite State Machine for a deploy or rollback attempt

use relay_models::{Outcome, Step, StepStatus};
use serde::{Deserialize, Serialize};

use crate::errors::DeployError;

/// Pipeline state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state", content = "step")]
pub enum PipelineState {
    /// Nothing has run yet
    Pending,

    /// A step is executing
    InStep(Step),

    /// The given step finished and the next one has not started
    BetweenSteps(Step),

    /// Every step finished
    Succeeded,

    /// A fatal step failed
    Failed,

    /// Interrupted or declined by the operator
    Aborted,
}

impl PipelineState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PipelineState::Succeeded | PipelineState::Failed | PipelineState::Aborted
        )
    }
}

/// Pipeline event
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    /// A step begins
    StepStarted(Step),

    /// A step ended with the given status
    StepFinished(Step, StepStatus),

    /// All steps done
    Succeed,

    /// Fatal failure outside a step boundary
    Fail(String),

    /// Interrupt or declined confirmation
    Abort(String),
}

/// Pipeline FSM.
///
/// Steps must start in plan order; steps may be skipped but never revisited.
#[derive(Debug, Clone)]
pub struct PipelineFsm {
    plan: Vec<Step>,
    state: PipelineState,
    position: Option<usize>,
    error: Option<String>,
    failed_step: Option<Step>,
}

impl PipelineFsm {
    /// Create a new FSM for the given ordered plan
    pub fn new(plan: Vec<Step>) -> Self {
        Self {
            plan,
            state: PipelineState::Pending,
            position: None,
            error: None,
            failed_step: None,
        }
    }

    /// Get current state
    pub fn state(&self) -> &PipelineState {
        &self.state
    }

    /// Ordered steps this pipeline may run
    pub fn plan(&self) -> &[Step] {
        &self.plan
    }

    /// Get error message if any
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Step that failed, if the pipeline failed inside a step
    pub fn failed_step(&self) -> Option<Step> {
        self.failed_step
    }

    /// Outcome once terminal
    pub fn outcome(&self) -> Option<Outcome> {
        match self.state {
            PipelineState::Succeeded => Some(Outcome::Success),
            PipelineState::Failed => Some(Outcome::Failed),
            PipelineState::Aborted => Some(Outcome::Aborted),
            _ => None,
        }
    }

    /// Process an event and transition state
    pub fn process(&mut self, event: PipelineEvent) -> Result<(), DeployError> {
        let new_state = match (&self.state, &event) {
            // Terminal states accept nothing
            (state, _) if state.is_terminal() => {
                return Err(self.invalid(&event));
            }

            // Start the next step
            (PipelineState::Pending, PipelineEvent::StepStarted(step))
            | (PipelineState::BetweenSteps(_), PipelineEvent::StepStarted(step)) => {
                let index = self
                    .plan
                    .iter()
                    .position(|s| s == step)
                    .ok_or_else(|| self.invalid(&event))?;
                if matches!(self.position, Some(current) if index <= current) {
                    return Err(self.invalid(&event));
                }
                self.position = Some(index);
                PipelineState::InStep(*step)
            }

            // Finish the running step
            (PipelineState::InStep(current), PipelineEvent::StepFinished(step, status))
                if current == step && status.is_terminal() =>
            {
                if *status == StepStatus::Failed {
                    self.failed_step = Some(*step);
                    PipelineState::Failed
                } else {
                    PipelineState::BetweenSteps(*step)
                }
            }

            // Whole pipeline done
            (PipelineState::Pending, PipelineEvent::Succeed)
            | (PipelineState::BetweenSteps(_), PipelineEvent::Succeed) => PipelineState::Succeeded,

            (_, PipelineEvent::Fail(err)) => {
                if let PipelineState::InStep(step) = self.state {
                    self.failed_step = Some(step);
                }
                self.error = Some(err.clone());
                PipelineState::Failed
            }

            (_, PipelineEvent::Abort(reason)) => {
                self.error = Some(reason.clone());
                PipelineState::Aborted
            }

            // Invalid transitions
            _ => return Err(self.invalid(&event)),
        };

        self.state = new_state;
        Ok(())
    }

    fn invalid(&self, event: &PipelineEvent) -> DeployError {
        DeployError::InvalidTransition(format!("{:?} -> {:?}", self.state, event))
    }
}
