//! Deploy pipeline tests against an in-memory host

mod common;

use std::sync::Arc;

use relay_models::{Outcome, Provider, Step, StepStatus};
use tokio::sync::Notify;
use uuid::Uuid;

use common::{
    never, target, FakeHost, Harness, ScriptedProbe, BACKUPS_DIR, ENV_FILE, LOCK_DIR,
};
use sparkdeploy::deploy::backup::BackupDestination;
use sparkdeploy::deploy::lock::LeaseOwner;
use sparkdeploy::deploy::pipeline::{DeployPipeline, DeployRequest};
use sparkdeploy::deploy::steps::RollbackMarker;
use sparkdeploy::errors::DeployError;
use sparkdeploy::models::release::{Release, ReleaseRecord};
use sparkdeploy::remote::CommandOutput;
use sparkdeploy::storage::layout::is_marker_name;

const ENV: &str = "APP_VERSION=1.2.2\nDOCKERHUB_ORG=sparknode\nSECRET_KEY=s3cr3t\n";

fn request(version: &str) -> DeployRequest {
    DeployRequest::new(Release::new(version, "sparknode"))
}

fn markers(host: &FakeHost) -> Vec<String> {
    host.names_in(BACKUPS_DIR)
        .into_iter()
        .filter(|n| is_marker_name(n))
        .collect()
}

#[tokio::test]
async fn test_unreachable_host_fails_at_preflight_for_every_provider() {
    for provider in Provider::all() {
        let harness = Harness::new(FakeHost::unreachable(), ScriptedProbe::healthy(), true);
        let pipeline = DeployPipeline::new(harness.ctx.clone(), target(provider));

        let run = pipeline.run(Uuid::new_v4(), request("1.2.3"), never()).await;

        assert_eq!(run.outcome(), Outcome::Failed, "{}", provider);
        assert_eq!(run.exit_code(), 1);
        assert!(matches!(run.result, Err(DeployError::Unreachable(_))));
        let preflight = run.attempt.report(Step::Preflight).unwrap();
        assert_eq!(preflight.status, StepStatus::Failed);
        assert!(run.attempt.report(Step::Lock).is_none());
        assert!(harness.host.writes().is_empty());
    }
}

#[tokio::test]
async fn test_missing_app_dir_fails_preflight() {
    let host = FakeHost::default();
    let harness = Harness::new(host, ScriptedProbe::healthy(), true);
    let pipeline = DeployPipeline::new(harness.ctx.clone(), target(Provider::Aws));

    let run = pipeline.run(Uuid::new_v4(), request("1.2.3"), never()).await;

    assert_eq!(run.outcome(), Outcome::Failed);
    assert!(matches!(
        run.result,
        Err(DeployError::StepFailed {
            step: Step::Preflight,
            ..
        })
    ));
    assert!(harness.host.writes().is_empty());
}

#[tokio::test]
async fn test_successful_deploy_updates_env_and_writes_marker() {
    let harness = Harness::new(FakeHost::new(ENV), ScriptedProbe::healthy(), true);
    let pipeline = DeployPipeline::new(harness.ctx.clone(), target(Provider::Azure));
    let attempt_id = Uuid::new_v4();

    let run = pipeline.run(attempt_id, request("1.2.3"), never()).await;

    assert!(run.result.is_ok(), "{:?}", run.result);
    assert_eq!(run.outcome(), Outcome::Success);
    assert_eq!(run.exit_code(), 0);

    // .env points at the new version and keeps unrelated keys
    let env = harness.host.file(ENV_FILE).unwrap();
    assert!(env.contains("APP_VERSION=1.2.3"));
    assert!(!env.contains("APP_VERSION=1.2.2"));
    assert!(env.contains("SECRET_KEY=s3cr3t"));

    // Marker holds the version that was replaced, linked to this attempt
    let markers = markers(&harness.host);
    assert_eq!(markers.len(), 1);
    let contents = harness
        .host
        .file(&format!("{}/{}", BACKUPS_DIR, markers[0]))
        .unwrap();
    let marker = RollbackMarker::parse(&contents).unwrap();
    assert_eq!(marker.version, "1.2.2");
    assert_eq!(marker.attempt_id, Some(attempt_id));

    // Release record written alongside
    let record = harness.host.file("/opt/sparknode/.release.json").unwrap();
    let record = ReleaseRecord::from_json(&record).unwrap();
    assert_eq!(record.app_version, "1.2.3");
    assert_eq!(record.previous_version.as_deref(), Some("1.2.2"));

    // Every step ran in order and the lease is gone
    assert!(harness.host.ran("pg_dump"));
    assert!(harness.host.ran("pull"));
    assert!(harness.host.ran("up -d"));
    assert!(harness.host.ran("alembic upgrade head"));
    assert!(harness.host.ran("docker image prune -f"));
    assert!(!harness.host.has_dir(LOCK_DIR));
    assert_eq!(harness.probe.calls(), 1);
    assert_eq!(harness.sleeps(), 0);
}

#[tokio::test]
async fn test_first_deploy_warns_and_writes_no_marker() {
    let harness = Harness::new(
        FakeHost::new("DOCKERHUB_ORG=sparknode\n"),
        ScriptedProbe::healthy(),
        true,
    );
    let pipeline = DeployPipeline::new(harness.ctx.clone(), target(Provider::Gcp));

    let run = pipeline.run(Uuid::new_v4(), request("1.0.0"), never()).await;

    assert_eq!(run.outcome(), Outcome::Success);
    assert!(markers(&harness.host).is_empty());
    assert!(harness
        .log_lines()
        .iter()
        .any(|l| l.starts_with("WARN:") && l.contains("no rollback marker")));
    assert!(harness
        .host
        .file(ENV_FILE)
        .unwrap()
        .contains("APP_VERSION=1.0.0"));
}

#[tokio::test]
async fn test_never_healthy_fails_without_pruning() {
    let harness = Harness::new(FakeHost::new(ENV), ScriptedProbe::never_healthy(), true);
    let pipeline = DeployPipeline::new(harness.ctx.clone(), target(Provider::Aws));

    let run = pipeline.run(Uuid::new_v4(), request("1.2.3"), never()).await;

    assert_eq!(run.outcome(), Outcome::Failed);
    assert_eq!(run.exit_code(), 1);
    assert!(matches!(
        run.result,
        Err(DeployError::HealthExhausted { attempts: 3 })
    ));
    assert_eq!(harness.probe.calls(), 3);
    assert_eq!(harness.sleeps(), 2);
    assert_eq!(
        run.attempt.report(Step::HealthCheck).unwrap().status,
        StepStatus::Failed
    );
    assert!(run.attempt.report(Step::Cleanup).is_none());
    assert!(!harness.host.ran("docker image prune"));

    // Lease released and the operator told how to recover
    assert!(!harness.host.has_dir(LOCK_DIR));
    assert!(harness
        .log_lines()
        .iter()
        .any(|l| l.contains("sparkdeploy rollback --provider aws --host 203.0.113.10")));
}

#[tokio::test]
async fn test_interrupt_aborts_and_releases_lease() {
    let host = FakeHost::new(ENV);
    let interrupt = Arc::new(Notify::new());
    host.interrupt_on("pull", interrupt.clone());
    let harness = Harness::new(host, ScriptedProbe::healthy(), true);
    let pipeline = DeployPipeline::new(harness.ctx.clone(), target(Provider::Aws));

    let shutdown = async move { interrupt.notified().await };
    let run = pipeline.run(Uuid::new_v4(), request("1.2.3"), shutdown).await;

    assert_eq!(run.outcome(), Outcome::Aborted);
    assert_eq!(run.exit_code(), 1);
    assert!(matches!(run.result, Err(DeployError::Aborted(_))));
    assert!(!harness.host.ran("up -d"));
    assert!(!harness.host.has_dir(LOCK_DIR));

    // The step that was running is reported as interrupted
    let interrupted = harness.bus.history().into_iter().any(|frame| {
        matches!(
            frame,
            relay_models::RelayFrame::Step {
                step: Step::ImagePull,
                status: StepStatus::Failed,
                message: Some(ref m),
            } if m == "interrupted"
        )
    });
    assert!(interrupted);
}

#[tokio::test]
async fn test_interrupt_while_taking_lock_aborts() {
    let host = FakeHost::new(ENV);
    let interrupt = Arc::new(Notify::new());
    host.interrupt_on(".deploy.lock", interrupt.clone());
    let harness = Harness::new(host, ScriptedProbe::healthy(), true);
    let pipeline = DeployPipeline::new(harness.ctx.clone(), target(Provider::Gcp));

    let shutdown = async move { interrupt.notified().await };
    let run = pipeline.run(Uuid::new_v4(), request("1.2.3"), shutdown).await;

    assert_eq!(run.outcome(), Outcome::Aborted);
    assert!(matches!(run.result, Err(DeployError::Aborted(_))));
    assert!(!harness.host.has_dir(LOCK_DIR));
    assert_eq!(harness.host.file(ENV_FILE).unwrap(), ENV);
    assert!(!harness.host.ran("pg_dump"));
    assert!(run.attempt.report(Step::Backup).is_none());

    let interrupted = harness.bus.history().into_iter().any(|frame| {
        matches!(
            frame,
            relay_models::RelayFrame::Step {
                step: Step::Lock,
                status: StepStatus::Failed,
                message: Some(ref m),
            } if m == "interrupted"
        )
    });
    assert!(interrupted);
}

#[tokio::test]
async fn test_lock_held_by_live_attempt_blocks_deploy() {
    let host = FakeHost::new(ENV);
    let holder = LeaseOwner::for_attempt(Uuid::new_v4());
    host.add_dir(LOCK_DIR);
    host.put_file(
        &format!("{}/owner.json", LOCK_DIR),
        &serde_json::to_string(&holder).unwrap(),
    );
    let harness = Harness::new(host, ScriptedProbe::healthy(), true);
    let pipeline = DeployPipeline::new(harness.ctx.clone(), target(Provider::Aws));

    let run = pipeline.run(Uuid::new_v4(), request("1.2.3"), never()).await;

    assert_eq!(run.outcome(), Outcome::Failed);
    assert!(matches!(run.result, Err(DeployError::LockHeld { .. })));
    assert_eq!(harness.host.file(ENV_FILE).unwrap(), ENV);
    assert!(harness.host.has_dir(LOCK_DIR));
}

#[tokio::test]
async fn test_declined_confirmation_aborts_before_backup() {
    let harness = Harness::new(FakeHost::new(ENV), ScriptedProbe::healthy(), false);
    let pipeline = DeployPipeline::new(harness.ctx.clone(), target(Provider::Aws));

    let run = pipeline.run(Uuid::new_v4(), request("1.2.3"), never()).await;

    assert_eq!(run.outcome(), Outcome::Aborted);
    assert!(!harness.host.ran("pg_dump"));
    assert_eq!(harness.host.file(ENV_FILE).unwrap(), ENV);
    assert!(!harness.host.has_dir(LOCK_DIR));
}

#[tokio::test]
async fn test_skip_flags_are_recorded() {
    let harness = Harness::new(FakeHost::new(ENV), ScriptedProbe::healthy(), true);
    let pipeline = DeployPipeline::new(harness.ctx.clone(), target(Provider::Aws));
    let mut request = request("1.2.3");
    request.skip_backup = true;
    request.skip_migrate = true;
    request.backup_destination = Some(BackupDestination::S3 {
        bucket: "ops-backups".to_string(),
    });

    let run = pipeline.run(Uuid::new_v4(), request, never()).await;

    assert_eq!(run.outcome(), Outcome::Success);
    for step in [Step::Backup, Step::BackupUpload, Step::Migrate] {
        assert_eq!(run.attempt.report(step).unwrap().status, StepStatus::Skipped);
    }
    assert!(!harness.host.ran("pg_dump"));
    assert!(!harness.host.ran("aws s3 cp"));
    assert!(!harness.host.ran("alembic"));
}

#[tokio::test]
async fn test_tolerated_failures_do_not_stop_the_deploy() {
    let host = FakeHost::new(ENV);
    host.respond("pg_dump", CommandOutput::failed(1, "pg_dump: connection refused"));
    host.respond("alembic", CommandOutput::failed(1, "migration 0042 failed"));
    let harness = Harness::new(host, ScriptedProbe::healthy(), true);
    let pipeline = DeployPipeline::new(harness.ctx.clone(), target(Provider::Aws));

    let run = pipeline.run(Uuid::new_v4(), request("1.2.3"), never()).await;

    assert_eq!(run.outcome(), Outcome::Success);
    assert_eq!(
        run.attempt.report(Step::Backup).unwrap().status,
        StepStatus::Warned
    );
    assert_eq!(
        run.attempt.report(Step::Migrate).unwrap().status,
        StepStatus::Warned
    );
    assert_eq!(run.attempt.warnings().count(), 2);
}

#[tokio::test]
async fn test_failed_pull_is_fatal() {
    let host = FakeHost::new(ENV);
    host.respond(" pull ", CommandOutput::failed(1, "manifest unknown"));
    let harness = Harness::new(host, ScriptedProbe::healthy(), true);
    let pipeline = DeployPipeline::new(harness.ctx.clone(), target(Provider::Aws));

    let run = pipeline.run(Uuid::new_v4(), request("9.9.9"), never()).await;

    assert_eq!(run.outcome(), Outcome::Failed);
    match &run.result {
        Err(DeployError::StepFailed { step, message }) => {
            assert_eq!(*step, Step::ImagePull);
            assert_eq!(message, "manifest unknown");
        }
        other => panic!("unexpected result: {:?}", other),
    }
    assert!(!harness.host.ran("up -d"));
    assert!(!harness.host.has_dir(LOCK_DIR));
}

#[tokio::test]
async fn test_invalid_version_tag_touches_nothing() {
    let harness = Harness::new(FakeHost::new(ENV), ScriptedProbe::healthy(), true);
    let pipeline = DeployPipeline::new(harness.ctx.clone(), target(Provider::Aws));

    let run = pipeline
        .run(Uuid::new_v4(), request("1.2.3; rm -rf /"), never())
        .await;

    assert_eq!(run.outcome(), Outcome::Failed);
    assert_eq!(run.exit_code(), 2);
    assert!(harness.host.commands().is_empty());
}
