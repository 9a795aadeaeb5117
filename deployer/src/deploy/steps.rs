//! Individual pipeline steps. Each one is a plain async function over the
//! context; policy and bookkeeping live in the tracker.

use chrono::Utc;
use relay_models::{AttemptKind, Step};
use tracing::debug;
use uuid::Uuid;

use crate::deploy::backup::BackupDestination;
use crate::deploy::context::PipelineContext;
use crate::deploy::docker;
use crate::deploy::health::{wait_until_healthy, HealthStatus};
use crate::errors::DeployError;
use crate::models::release::{
    read_env_value, rewrite_env, Release, ReleaseRecord, ORG_KEY, VERSION_KEY,
};
use crate::remote::shell_quote;

/// Contents of a rollback marker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RollbackMarker {
    /// Version that ran before the deploy that wrote the marker
    pub version: String,
    /// Attempt that wrote the marker; markers from older tooling carry none
    pub attempt_id: Option<Uuid>,
}

impl RollbackMarker {
    /// `<version>\n<attempt id>\n`
    pub fn render(&self) -> String {
        match self.attempt_id {
            Some(id) => format!("{}\n{}\n", self.version, id),
            None => format!("{}\n", self.version),
        }
    }

    pub fn parse(contents: &str) -> Option<Self> {
        let mut lines = contents.lines().map(str::trim).filter(|l| !l.is_empty());
        let version = lines.next()?.to_string();
        let attempt_id = lines.next().and_then(|l| Uuid::parse_str(l).ok());
        Some(Self {
            version,
            attempt_id,
        })
    }
}

/// The application directory must exist on the host
pub async fn preflight(ctx: &PipelineContext) -> Result<(), DeployError> {
    ctx.bus.log(format!(
        "Checking {} on {}",
        ctx.layout.app_dir,
        ctx.executor.describe()
    ));
    let command = format!("test -d {} && echo ok", shell_quote(&ctx.layout.app_dir));
    let output = ctx.executor.exec(&command).await?;
    if output.success() && output.stdout.trim() == "ok" {
        Ok(())
    } else {
        Err(DeployError::StepFailed {
            step: Step::Preflight,
            message: format!(
                "application directory {} not found on {}",
                ctx.layout.app_dir,
                ctx.executor.describe()
            ),
        })
    }
}

/// Current `.env`, empty when the host has none yet
pub async fn read_env(ctx: &PipelineContext) -> Result<String, DeployError> {
    Ok(ctx
        .executor
        .read_file(&ctx.layout.env_file())
        .await?
        .unwrap_or_default())
}

/// `APP_VERSION` running on the host, if recorded
pub async fn current_version(ctx: &PipelineContext) -> Result<Option<String>, DeployError> {
    Ok(read_env_value(&read_env(ctx).await?, VERSION_KEY))
}

/// Stored release record. A corrupt record is reported and treated as absent
/// so the next write replaces it.
pub async fn read_release_record(
    ctx: &PipelineContext,
) -> Result<Option<ReleaseRecord>, DeployError> {
    let Some(contents) = ctx
        .executor
        .read_file(&ctx.layout.release_record())
        .await?
    else {
        return Ok(None);
    };
    match ReleaseRecord::from_json(&contents) {
        Ok(record) => Ok(Some(record)),
        Err(e) => {
            ctx.bus.warn(format!(
                "Ignoring {}: {}",
                ctx.layout.release_record(),
                e
            ));
            Ok(None)
        }
    }
}

/// Dump the database into a file linked to `attempt_id`. Returns its path.
pub async fn backup_database(
    ctx: &PipelineContext,
    attempt_id: Uuid,
) -> Result<String, DeployError> {
    let path = ctx.layout.backup_file(Utc::now(), attempt_id);
    ctx.bus.log(format!("Backing up database to {}", path));
    ctx.executor
        .exec_checked(
            &ctx.compose()
                .dump_database(&path, &ctx.layout.backups_dir()),
        )
        .await?;
    Ok(path)
}

pub async fn upload_backup(
    ctx: &PipelineContext,
    destination: &BackupDestination,
    path: &str,
) -> Result<(), DeployError> {
    ctx.bus
        .log(format!("Uploading {} to {}", path, destination));
    ctx.executor
        .exec_checked(&destination.upload_command(path))
        .await?;
    Ok(())
}

/// Point the host at `release`. A forward deploy first records the running
/// version in a rollback marker. `.env` and the release record are both
/// replaced atomically. Returns the version that was replaced.
pub async fn update_version(
    ctx: &PipelineContext,
    release: &Release,
    attempt_id: Uuid,
    kind: AttemptKind,
) -> Result<Option<String>, DeployError> {
    let env_file = ctx.layout.env_file();
    let env = match ctx.executor.read_file(&env_file).await? {
        Some(contents) => contents,
        None => {
            ctx.bus
                .warn(format!("{} not found; creating it", env_file));
            String::new()
        }
    };
    let previous = read_env_value(&env, VERSION_KEY);
    let now = Utc::now();

    if kind == AttemptKind::Deploy {
        match &previous {
            Some(version) => {
                let marker = RollbackMarker {
                    version: version.clone(),
                    attempt_id: Some(attempt_id),
                };
                let path = ctx.layout.marker_file(now, attempt_id);
                ctx.executor
                    .write_file_atomic(&path, marker.render().as_bytes())
                    .await?;
                ctx.bus.log(format!("Recorded rollback marker {}", path));
            }
            None => ctx.bus.warn(format!(
                "No {} in {}; no rollback marker written",
                VERSION_KEY, env_file
            )),
        }
    }

    let rewritten = rewrite_env(
        &env,
        &[
            (VERSION_KEY, release.version_tag.as_str()),
            (ORG_KEY, release.registry_org.as_str()),
        ],
    );
    ctx.executor
        .write_file_atomic(&env_file, rewritten.as_bytes())
        .await?;

    let prior = read_release_record(ctx).await?;
    let record = ReleaseRecord::next(
        prior.as_ref(),
        release,
        previous.clone(),
        kind,
        attempt_id,
        now,
    );
    ctx.executor
        .write_file_atomic(&ctx.layout.release_record(), record.to_json()?.as_bytes())
        .await?;

    ctx.bus.log(format!(
        "{}: {} -> {}",
        VERSION_KEY,
        previous.as_deref().unwrap_or("(none)"),
        release.version_tag
    ));
    Ok(previous)
}

pub async fn pull_images(ctx: &PipelineContext) -> Result<(), DeployError> {
    ctx.bus
        .log(format!("Pulling images: {}", ctx.compose.services.join(", ")));
    ctx.executor.exec_checked(&ctx.compose().pull()).await?;
    Ok(())
}

pub async fn restart_services(ctx: &PipelineContext) -> Result<(), DeployError> {
    ctx.bus.log("Restarting services");
    ctx.executor.exec_checked(&ctx.compose().up()).await?;
    Ok(())
}

pub async fn run_migrations(ctx: &PipelineContext) -> Result<(), DeployError> {
    ctx.bus
        .log(format!("Running migrations: {}", ctx.compose.migrate_command));
    ctx.executor.exec_checked(&ctx.compose().migrate()).await?;
    Ok(())
}

/// Poll the health endpoint under the context's policy, logging every probe
pub async fn verify_health(ctx: &PipelineContext) -> Result<u32, DeployError> {
    let attempts = ctx.health_policy.attempts;
    ctx.bus.log(format!(
        "Waiting for {} ({} attempts, {}s apart)",
        ctx.health_probe.describe(),
        attempts,
        ctx.health_policy.interval.as_secs()
    ));

    let bus = ctx.bus.clone();
    let sleeper = ctx.sleeper.clone();
    wait_until_healthy(
        ctx.health_probe.as_ref(),
        &ctx.health_policy,
        move |duration| sleeper(duration),
        |attempt, status| match status {
            HealthStatus::Healthy => {
                bus.log(format!("Health check {}/{}: healthy", attempt, attempts))
            }
            HealthStatus::Unhealthy(reason) => bus.log(format!(
                "Health check {}/{}: {}",
                attempt, attempts, reason
            )),
        },
    )
    .await
}

pub async fn prune_images(ctx: &PipelineContext) -> Result<(), DeployError> {
    debug!("Pruning dangling images on {}", ctx.executor.describe());
    ctx.executor.exec_checked(&docker::prune_images()).await?;
    Ok(())
}

pub async fn restore_database(ctx: &PipelineContext, path: &str) -> Result<(), DeployError> {
    ctx.bus.log(format!("Restoring database from {}", path));
    ctx.executor
        .exec_checked(&ctx.compose().restore_database(path))
        .await?;
    Ok(())
}
