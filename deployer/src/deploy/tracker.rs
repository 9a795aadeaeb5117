//! Runs pipeline steps under the policy table, keeping the FSM, the attempt
//! record and the event bus in step

use std::future::Future;
use std::time::Instant;

use relay_models::{Outcome, Step, StepStatus};
use tracing::{debug, error};

use crate::deploy::events::EventBus;
use crate::deploy::fsm::{PipelineEvent, PipelineFsm, PipelineState};
use crate::deploy::policy::{policy_for, StepPolicy};
use crate::errors::{DeployError, EXIT_OK};
use crate::models::attempt::{DeploymentAttempt, StepReport};

/// Final result of a pipeline invocation
#[derive(Debug)]
pub struct PipelineRun {
    pub attempt: DeploymentAttempt,
    pub result: Result<(), DeployError>,
}

impl PipelineRun {
    pub fn exit_code(&self) -> i32 {
        match &self.result {
            Ok(()) => EXIT_OK,
            Err(e) => e.exit_code(),
        }
    }

    pub fn outcome(&self) -> Outcome {
        self.attempt.outcome.unwrap_or(Outcome::Failed)
    }
}

pub struct StepTracker {
    fsm: PipelineFsm,
    attempt: DeploymentAttempt,
    bus: EventBus,
}

impl StepTracker {
    pub fn new(attempt: DeploymentAttempt, plan: &[Step], bus: EventBus) -> Self {
        Self {
            fsm: PipelineFsm::new(plan.to_vec()),
            attempt,
            bus,
        }
    }

    pub fn attempt(&self) -> &DeploymentAttempt {
        &self.attempt
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn state(&self) -> &PipelineState {
        self.fsm.state()
    }

    /// Version shown in summaries, once known
    pub fn set_version(&mut self, version: impl Into<String>) {
        self.attempt.version = Some(version.into());
    }

    fn begin(&mut self, step: Step) -> Result<(), DeployError> {
        self.fsm.process(PipelineEvent::StepStarted(step))?;
        self.attempt.current_step = Some(step);
        self.bus.step(step, StepStatus::Started, None);
        Ok(())
    }

    fn end(
        &mut self,
        step: Step,
        status: StepStatus,
        message: Option<String>,
        started: Instant,
    ) -> Result<(), DeployError> {
        self.fsm.process(PipelineEvent::StepFinished(step, status))?;
        self.attempt.steps.push(StepReport {
            step,
            status,
            message: message.clone(),
            duration_ms: started.elapsed().as_millis() as u64,
        });
        self.bus.step(step, status, message);
        Ok(())
    }

    /// Run one step. Returns `Some` on success and `None` when a tolerated
    /// failure was downgraded to a warning; fatal failures are errors.
    pub async fn run<T, F>(&mut self, step: Step, fut: F) -> Result<Option<T>, DeployError>
    where
        F: Future<Output = Result<T, DeployError>>,
    {
        self.begin(step)?;
        let started = Instant::now();

        let err = match fut.await {
            Ok(value) => {
                self.end(step, StepStatus::Succeeded, None, started)?;
                return Ok(Some(value));
            }
            Err(e) => e,
        };

        match policy_for(step) {
            StepPolicy::Fatal => {
                let err = match err {
                    DeployError::RemoteError { message, .. } => {
                        DeployError::StepFailed { step, message }
                    }
                    other => other,
                };
                self.bus.error(format!("{} failed: {}", step.label(), err));
                self.end(step, StepStatus::Failed, Some(err.to_string()), started)?;
                Err(err)
            }
            StepPolicy::Warn => {
                self.bus.warn(format!("{} failed, continuing: {}", step.label(), err));
                self.end(step, StepStatus::Warned, Some(err.to_string()), started)?;
                Ok(None)
            }
            StepPolicy::BestEffort => {
                debug!("{} failed, ignoring: {}", step.label(), err);
                self.end(step, StepStatus::Warned, Some(err.to_string()), started)?;
                Ok(None)
            }
        }
    }

    /// Record a step that does not apply to this run
    pub fn skip(&mut self, step: Step, reason: impl Into<String>) -> Result<(), DeployError> {
        self.begin(step)?;
        self.end(step, StepStatus::Skipped, Some(reason.into()), Instant::now())
    }

    /// Settle the FSM and the attempt from the pipeline result and publish
    /// the final frame
    pub fn finish(mut self, result: Result<(), DeployError>) -> PipelineRun {
        if let PipelineState::InStep(step) = *self.fsm.state() {
            // Step future was dropped mid-flight
            self.bus
                .step(step, StepStatus::Failed, Some("interrupted".to_string()));
        }

        let (event, outcome) = match &result {
            Ok(()) => (PipelineEvent::Succeed, Outcome::Success),
            Err(DeployError::Aborted(reason)) => {
                (PipelineEvent::Abort(reason.clone()), Outcome::Aborted)
            }
            Err(e) => (PipelineEvent::Fail(e.to_string()), Outcome::Failed),
        };

        if !self.fsm.state().is_terminal() {
            if let Err(e) = self.fsm.process(event) {
                error!("Pipeline state machine rejected the final event: {}", e);
            }
        }

        let error = result.as_ref().err().map(|e| e.to_string());
        self.attempt.finish(outcome, error.clone());
        self.bus.finish(outcome, error);

        PipelineRun {
            attempt: self.attempt,
            result,
        }
    }
}
