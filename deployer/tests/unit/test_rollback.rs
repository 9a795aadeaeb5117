//! Rollback pipeline tests against an in-memory host

mod common;

use relay_models::{Outcome, Provider, Step, StepStatus};
use uuid::Uuid;

use common::{never, target, FakeHost, Harness, ScriptedProbe, BACKUPS_DIR, ENV_FILE, LOCK_DIR};
use sparkdeploy::deploy::pipeline::{DeployPipeline, DeployRequest};
use sparkdeploy::deploy::rollback::{resolve, RollbackPipeline, RollbackRequest, VersionSource};
use sparkdeploy::errors::DeployError;
use sparkdeploy::models::release::Release;
use sparkdeploy::storage::layout::is_marker_name;

const ENV: &str = "APP_VERSION=1.2.3\nDOCKERHUB_ORG=acme\n";

fn entry(name: &str) -> String {
    format!("{}/{}", BACKUPS_DIR, name)
}

/// Host on 1.2.3 with two markers; the newer one names 1.2.2
fn host_with_markers(linked: Option<Uuid>) -> FakeHost {
    let host = FakeHost::new(ENV);
    host.put_file(&entry(".previous_version_20250101_120000"), "1.2.1\n");
    let newest = match linked {
        Some(id) => format!("1.2.2\n{}\n", id),
        None => "1.2.2\n".to_string(),
    };
    host.put_file(&entry(".previous_version_20250102_120000"), &newest);
    host
}

fn request() -> RollbackRequest {
    RollbackRequest {
        default_org: "sparknode".to_string(),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_rollback_uses_latest_marker() {
    let harness = Harness::new(host_with_markers(None), ScriptedProbe::healthy(), true);
    let pipeline = RollbackPipeline::new(harness.ctx.clone(), target(Provider::Aws));

    let run = pipeline.run(Uuid::new_v4(), request(), never()).await;

    assert!(run.result.is_ok(), "{:?}", run.result);
    assert_eq!(run.outcome(), Outcome::Success);
    assert_eq!(run.attempt.version.as_deref(), Some("1.2.2"));

    let env = harness.host.file(ENV_FILE).unwrap();
    assert!(env.contains("APP_VERSION=1.2.2"));
    // Org comes from the host when not given
    assert!(env.contains("DOCKERHUB_ORG=acme"));

    // A rollback never writes a marker of its own
    let markers: Vec<String> = harness
        .host
        .names_in(BACKUPS_DIR)
        .into_iter()
        .filter(|n| is_marker_name(n))
        .collect();
    assert_eq!(markers.len(), 2);

    assert_eq!(
        run.attempt.report(Step::RestoreDatabase).unwrap().status,
        StepStatus::Skipped
    );
    assert!(!harness.host.ran("gunzip"));
    assert!(!harness.host.has_dir(LOCK_DIR));
}

#[tokio::test]
async fn test_explicit_version_bypasses_markers() {
    let harness = Harness::new(host_with_markers(None), ScriptedProbe::healthy(), true);
    let mut request = request();
    request.version = Some("1.0.0".to_string());
    request.org = Some("sparknode".to_string());

    let resolution = resolve(&harness.ctx, &request).await.unwrap();
    assert_eq!(resolution.version, "1.0.0");
    assert_eq!(resolution.source, VersionSource::Explicit);
    assert_eq!(resolution.current.as_deref(), Some("1.2.3"));
    assert_eq!(resolution.org, "sparknode");
    assert!(harness.host.listings().is_empty());

    let pipeline = RollbackPipeline::new(harness.ctx.clone(), target(Provider::Gcp));
    let run = pipeline.run(Uuid::new_v4(), request, never()).await;

    assert_eq!(run.outcome(), Outcome::Success);
    let env = harness.host.file(ENV_FILE).unwrap();
    assert!(env.contains("APP_VERSION=1.0.0"));
    assert!(env.contains("DOCKERHUB_ORG=sparknode"));
}

#[tokio::test]
async fn test_restore_prefers_backup_linked_to_marker() {
    let linked = Uuid::new_v4();
    let later = Uuid::new_v4();
    let host = host_with_markers(Some(linked));
    let linked_dump = format!("pre-deploy-20250102_115959-{}.sql.gz", linked);
    let later_dump = format!("pre-deploy-20250103_080000-{}.sql.gz", later);
    host.put_file(&entry(&linked_dump), "");
    host.put_file(&entry(&later_dump), "");

    let harness = Harness::new(host, ScriptedProbe::healthy(), true);
    let mut request = request();
    request.restore_db = true;

    let resolution = resolve(&harness.ctx, &request).await.unwrap();
    assert_eq!(
        resolution.source,
        VersionSource::Marker(".previous_version_20250102_120000".to_string())
    );
    assert_eq!(resolution.backup, Some(entry(&linked_dump)));

    let pipeline = RollbackPipeline::new(harness.ctx.clone(), target(Provider::Azure));
    let run = pipeline.run(Uuid::new_v4(), request, never()).await;

    assert_eq!(run.outcome(), Outcome::Success);
    assert_eq!(
        run.attempt.report(Step::RestoreDatabase).unwrap().status,
        StepStatus::Succeeded
    );
    // The dump is piped straight into psql from the app directory
    assert!(harness.host.ran(&format!(
        "cd /opt/sparknode && gunzip -c {} | docker compose -f docker-compose.yml exec -T postgres psql",
        entry(&linked_dump)
    )));
    assert!(!harness.host.ran(&later_dump));
}

#[tokio::test]
async fn test_restore_falls_back_to_latest_backup() {
    let host = host_with_markers(None);
    let older = format!("pre-deploy-20250101_000000-{}.sql.gz", Uuid::new_v4());
    let newest = "pre-deploy-20250102_000000.sql.gz";
    host.put_file(&entry(&older), "");
    host.put_file(&entry(newest), "");

    let harness = Harness::new(host, ScriptedProbe::healthy(), true);
    let mut request = request();
    request.restore_db = true;

    let resolution = resolve(&harness.ctx, &request).await.unwrap();
    assert_eq!(resolution.backup, Some(entry(newest)));
}

#[tokio::test]
async fn test_explicit_backup_name_is_checked() {
    let host = host_with_markers(None);
    host.put_file(&entry("manual.sql.gz"), "");
    let harness = Harness::new(host, ScriptedProbe::healthy(), true);

    let mut request = request();
    request.restore_db = true;
    request.db_backup = Some("manual.sql.gz".to_string());
    let resolution = resolve(&harness.ctx, &request).await.unwrap();
    assert_eq!(resolution.backup, Some(entry("manual.sql.gz")));

    request.db_backup = Some("/tmp/absent.sql.gz".to_string());
    let err = resolve(&harness.ctx, &request).await.unwrap_err();
    assert!(matches!(err, DeployError::MissingBackup(_)));
}

#[tokio::test]
async fn test_fully_explicit_rollback_skips_backups_listing() {
    let host = host_with_markers(None);
    host.put_file(&entry("manual.sql.gz"), "");
    let harness = Harness::new(host, ScriptedProbe::healthy(), true);

    let mut request = request();
    request.version = Some("1.0.0".to_string());
    request.restore_db = true;
    request.db_backup = Some("manual.sql.gz".to_string());
    let resolution = resolve(&harness.ctx, &request).await.unwrap();

    assert_eq!(resolution.source, VersionSource::Explicit);
    assert_eq!(resolution.backup, Some(entry("manual.sql.gz")));
    assert!(harness.host.listings().is_empty());

    // Picking the latest marker still needs the listing
    request.version = None;
    request.db_backup = None;
    resolve(&harness.ctx, &request).await.unwrap();
    assert_eq!(harness.host.listings(), vec![BACKUPS_DIR.to_string()]);
}

#[tokio::test]
async fn test_missing_backup_fails_before_any_change() {
    let harness = Harness::new(host_with_markers(None), ScriptedProbe::healthy(), true);
    let mut request = request();
    request.restore_db = true;

    let pipeline = RollbackPipeline::new(harness.ctx.clone(), target(Provider::Aws));
    let run = pipeline.run(Uuid::new_v4(), request, never()).await;

    assert_eq!(run.outcome(), Outcome::Failed);
    assert!(matches!(run.result, Err(DeployError::MissingBackup(_))));
    assert_eq!(
        run.attempt.report(Step::ResolveVersion).unwrap().status,
        StepStatus::Failed
    );
    assert_eq!(harness.host.file(ENV_FILE).unwrap(), ENV);
    assert!(!harness.host.ran("gunzip"));
    assert!(!harness.host.ran(" pull "));
    assert!(!harness.host.has_dir(LOCK_DIR));
}

#[tokio::test]
async fn test_no_version_anywhere_fails() {
    let harness = Harness::new(FakeHost::new(ENV), ScriptedProbe::healthy(), true);

    let err = resolve(&harness.ctx, &request()).await.unwrap_err();
    assert!(matches!(err, DeployError::MissingVersion(_)));
}

#[tokio::test]
async fn test_release_record_is_the_fallback_source() {
    let harness = Harness::new(
        FakeHost::new("APP_VERSION=1.2.2\nDOCKERHUB_ORG=acme\n"),
        ScriptedProbe::healthy(),
        true,
    );

    // A deploy writes both a marker and the record
    let deploy = DeployPipeline::new(harness.ctx.clone(), target(Provider::Aws));
    let run = deploy
        .run(
            Uuid::new_v4(),
            DeployRequest::new(Release::new("1.2.3", "acme")),
            never(),
        )
        .await;
    assert_eq!(run.outcome(), Outcome::Success);

    for name in harness.host.names_in(BACKUPS_DIR) {
        if is_marker_name(&name) {
            harness.host.remove_file(&entry(&name));
        }
    }

    let resolution = resolve(&harness.ctx, &request()).await.unwrap();
    assert_eq!(resolution.version, "1.2.2");
    assert_eq!(resolution.source, VersionSource::ReleaseRecord);
}

#[tokio::test]
async fn test_declined_confirmation_changes_nothing() {
    let host = host_with_markers(Some(Uuid::new_v4()));
    let harness = Harness::new(host, ScriptedProbe::healthy(), false);

    let pipeline = RollbackPipeline::new(harness.ctx.clone(), target(Provider::Aws));
    let run = pipeline.run(Uuid::new_v4(), request(), never()).await;

    assert_eq!(run.outcome(), Outcome::Aborted);
    assert!(matches!(run.result, Err(DeployError::Aborted(_))));
    assert_eq!(harness.host.file(ENV_FILE).unwrap(), ENV);
    assert!(run.attempt.report(Step::VersionUpdate).is_none());
    assert!(!harness.host.ran(" pull "));
    assert!(!harness.host.has_dir(LOCK_DIR));
}

#[tokio::test]
async fn test_unhealthy_rollback_fails() {
    let harness = Harness::new(host_with_markers(None), ScriptedProbe::never_healthy(), true);
    let pipeline = RollbackPipeline::new(harness.ctx.clone(), target(Provider::Aws));

    let run = pipeline.run(Uuid::new_v4(), request(), never()).await;

    assert_eq!(run.outcome(), Outcome::Failed);
    assert!(matches!(
        run.result,
        Err(DeployError::HealthExhausted { .. })
    ));
    assert_eq!(harness.sleeps(), 2);
    assert!(!harness.host.has_dir(LOCK_DIR));
}
