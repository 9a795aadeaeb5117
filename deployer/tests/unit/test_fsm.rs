//! Pipeline FSM tests

use relay_models::{Outcome, Step, StepStatus};
use sparkdeploy::deploy::fsm::{PipelineEvent, PipelineFsm, PipelineState};
use sparkdeploy::deploy::policy::{DEPLOY_PLAN, ROLLBACK_PLAN};

fn run_step(fsm: &mut PipelineFsm, step: Step, status: StepStatus) {
    fsm.process(PipelineEvent::StepStarted(step)).unwrap();
    fsm.process(PipelineEvent::StepFinished(step, status)).unwrap();
}

#[test]
fn test_fsm_initial_state() {
    let fsm = PipelineFsm::new(DEPLOY_PLAN.to_vec());
    assert_eq!(fsm.state(), &PipelineState::Pending);
    assert!(fsm.error().is_none());
    assert!(fsm.outcome().is_none());
    assert_eq!(fsm.plan().len(), DEPLOY_PLAN.len());
}

#[test]
fn test_fsm_full_deploy_plan() {
    let mut fsm = PipelineFsm::new(DEPLOY_PLAN.to_vec());

    for step in DEPLOY_PLAN {
        let status = match step {
            Step::BackupUpload => StepStatus::Skipped,
            Step::Migrate => StepStatus::Warned,
            _ => StepStatus::Succeeded,
        };
        run_step(&mut fsm, step, status);
        assert_eq!(fsm.state(), &PipelineState::BetweenSteps(step));
    }

    fsm.process(PipelineEvent::Succeed).unwrap();
    assert_eq!(fsm.state(), &PipelineState::Succeeded);
    assert_eq!(fsm.outcome(), Some(Outcome::Success));
}

#[test]
fn test_fsm_steps_cannot_run_out_of_order() {
    let mut fsm = PipelineFsm::new(DEPLOY_PLAN.to_vec());
    run_step(&mut fsm, Step::Preflight, StepStatus::Succeeded);
    run_step(&mut fsm, Step::Lock, StepStatus::Succeeded);

    // Going back is never allowed
    assert!(fsm.process(PipelineEvent::StepStarted(Step::Preflight)).is_err());
    assert!(fsm.process(PipelineEvent::StepStarted(Step::Lock)).is_err());
    assert_eq!(fsm.state(), &PipelineState::BetweenSteps(Step::Lock));
}

#[test]
fn test_fsm_rejects_steps_outside_the_plan() {
    let mut fsm = PipelineFsm::new(DEPLOY_PLAN.to_vec());
    assert!(fsm
        .process(PipelineEvent::StepStarted(Step::RestoreDatabase))
        .is_err());

    let mut fsm = PipelineFsm::new(ROLLBACK_PLAN.to_vec());
    assert!(fsm.process(PipelineEvent::StepStarted(Step::Cleanup)).is_err());
}

#[test]
fn test_fsm_cannot_start_a_step_while_one_runs() {
    let mut fsm = PipelineFsm::new(DEPLOY_PLAN.to_vec());
    fsm.process(PipelineEvent::StepStarted(Step::Preflight)).unwrap();
    assert!(fsm.process(PipelineEvent::StepStarted(Step::Lock)).is_err());
    assert!(fsm.process(PipelineEvent::Succeed).is_err());
}

#[test]
fn test_fsm_failed_step_is_terminal() {
    let mut fsm = PipelineFsm::new(DEPLOY_PLAN.to_vec());
    run_step(&mut fsm, Step::Preflight, StepStatus::Succeeded);
    run_step(&mut fsm, Step::Lock, StepStatus::Succeeded);
    run_step(&mut fsm, Step::Backup, StepStatus::Succeeded);
    run_step(&mut fsm, Step::BackupUpload, StepStatus::Skipped);
    run_step(&mut fsm, Step::VersionUpdate, StepStatus::Succeeded);
    run_step(&mut fsm, Step::ImagePull, StepStatus::Failed);

    assert_eq!(fsm.state(), &PipelineState::Failed);
    assert_eq!(fsm.failed_step(), Some(Step::ImagePull));
    assert_eq!(fsm.outcome(), Some(Outcome::Failed));

    // Nothing moves a terminal pipeline
    assert!(fsm.process(PipelineEvent::StepStarted(Step::Restart)).is_err());
    assert!(fsm.process(PipelineEvent::Succeed).is_err());
    assert!(fsm.process(PipelineEvent::Abort("late".to_string())).is_err());
}

#[test]
fn test_fsm_abort_mid_step() {
    let mut fsm = PipelineFsm::new(ROLLBACK_PLAN.to_vec());
    run_step(&mut fsm, Step::Preflight, StepStatus::Succeeded);
    fsm.process(PipelineEvent::StepStarted(Step::Lock)).unwrap();

    fsm.process(PipelineEvent::Abort("interrupted by operator".to_string()))
        .unwrap();
    assert_eq!(fsm.state(), &PipelineState::Aborted);
    assert_eq!(fsm.error(), Some("interrupted by operator"));
    assert_eq!(fsm.outcome(), Some(Outcome::Aborted));
}

#[test]
fn test_fsm_started_is_not_a_finishing_status() {
    let mut fsm = PipelineFsm::new(DEPLOY_PLAN.to_vec());
    fsm.process(PipelineEvent::StepStarted(Step::Preflight)).unwrap();
    assert!(fsm
        .process(PipelineEvent::StepFinished(Step::Preflight, StepStatus::Started))
        .is_err());
    assert!(fsm
        .process(PipelineEvent::StepFinished(Step::Lock, StepStatus::Succeeded))
        .is_err());
}
