//! Rollback pipeline: return a host to a previously deployed version,
//! optionally restoring the database from a pre-deploy dump

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use relay_models::{AttemptKind, Step};
use uuid::Uuid;

use crate::deploy::backup::select_backup;
use crate::deploy::context::PipelineContext;
use crate::deploy::lock::{self, Lease, LeaseOwner};
use crate::deploy::policy::ROLLBACK_PLAN;
use crate::deploy::steps::{self, RollbackMarker};
use crate::deploy::tracker::{PipelineRun, StepTracker};
use crate::errors::DeployError;
use crate::models::attempt::DeploymentAttempt;
use crate::models::release::{read_env_value, validate_version_tag, Release, ORG_KEY, VERSION_KEY};
use crate::models::target::Target;
use crate::remote::shell_quote;
use crate::storage::layout::{is_marker_name, MARKER_PREFIX};

#[derive(Debug, Clone, Default)]
pub struct RollbackRequest {
    /// Explicit version; bypasses marker lookup entirely
    pub version: Option<String>,
    /// Registry organisation; falls back to the host's `.env`, then `default_org`
    pub org: Option<String>,
    pub default_org: String,
    pub restore_db: bool,
    /// Dump to restore, absolute or relative to the backups directory
    pub db_backup: Option<String>,
    pub skip_migrate: bool,
}

/// Where the rollback version came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionSource {
    Explicit,
    Marker(String),
    ReleaseRecord,
}

impl fmt::Display for VersionSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VersionSource::Explicit => write!(f, "--version"),
            VersionSource::Marker(name) => write!(f, "marker {}", name),
            VersionSource::ReleaseRecord => write!(f, "release record"),
        }
    }
}

/// Everything decided before the operator is asked to confirm
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub version: String,
    pub source: VersionSource,
    pub current: Option<String>,
    pub org: String,
    /// Full path of the dump to restore
    pub backup: Option<String>,
}

/// Newest marker in a backups listing, with its contents
async fn latest_marker(
    ctx: &PipelineContext,
    names: &[String],
) -> Result<Option<(String, RollbackMarker)>, DeployError> {
    let Some(name) = names.iter().filter(|n| is_marker_name(n)).max() else {
        return Ok(None);
    };
    let path = ctx.layout.backup_entry(name);
    let contents = ctx.executor.read_file(&path).await?.unwrap_or_default();
    match RollbackMarker::parse(&contents) {
        Some(marker) => Ok(Some((name.clone(), marker))),
        None => {
            ctx.bus.warn(format!("Ignoring empty rollback marker {}", path));
            Ok(None)
        }
    }
}

/// Resolve an explicitly named dump and check it exists
async fn explicit_backup(ctx: &PipelineContext, name: &str) -> Result<String, DeployError> {
    let path = if name.starts_with('/') {
        name.to_string()
    } else {
        ctx.layout.backup_entry(name)
    };
    let output = ctx
        .executor
        .exec(&format!("test -f {}", shell_quote(&path)))
        .await?;
    if output.success() {
        Ok(path)
    } else {
        Err(DeployError::MissingBackup(format!("{} does not exist", path)))
    }
}

/// Decide the target version and, with `restore_db`, the dump to restore.
/// Nothing on the host is modified.
pub async fn resolve(
    ctx: &PipelineContext,
    request: &RollbackRequest,
) -> Result<Resolution, DeployError> {
    let env = steps::read_env(ctx).await?;
    let current = read_env_value(&env, VERSION_KEY);
    let org = request
        .org
        .clone()
        .or_else(|| read_env_value(&env, ORG_KEY))
        .unwrap_or_else(|| request.default_org.clone());

    // Markers and dumps are only looked up when something is left to pick
    let needs_listing =
        request.version.is_none() || (request.restore_db && request.db_backup.is_none());
    let names = if needs_listing {
        ctx.executor.list_dir(&ctx.layout.backups_dir()).await?
    } else {
        Vec::new()
    };

    let mut linked_attempt = None;
    let (version, source) = match &request.version {
        Some(version) => (version.clone(), VersionSource::Explicit),
        None => match latest_marker(ctx, &names).await? {
            Some((name, marker)) => {
                linked_attempt = marker.attempt_id;
                (marker.version, VersionSource::Marker(name))
            }
            None => match steps::read_release_record(ctx)
                .await?
                .and_then(|r| r.previous_version)
            {
                Some(version) => (version, VersionSource::ReleaseRecord),
                None => {
                    return Err(DeployError::MissingVersion(format!(
                        "no {}* marker in {} and no previous version in {}; pass --version",
                        MARKER_PREFIX,
                        ctx.layout.backups_dir(),
                        ctx.layout.release_record()
                    )));
                }
            },
        },
    };
    validate_version_tag(&version)?;

    let backup = if !request.restore_db {
        None
    } else if let Some(name) = &request.db_backup {
        Some(explicit_backup(ctx, name).await?)
    } else {
        match select_backup(&names, linked_attempt) {
            Some(name) => Some(ctx.layout.backup_entry(&name)),
            None => {
                return Err(DeployError::MissingBackup(format!(
                    "no pre-deploy-*.sql.gz in {}",
                    ctx.layout.backups_dir()
                )));
            }
        }
    };

    Ok(Resolution {
        version,
        source,
        current,
        org,
        backup,
    })
}

pub struct RollbackPipeline {
    ctx: PipelineContext,
    target: Target,
}

impl RollbackPipeline {
    pub fn new(ctx: PipelineContext, target: Target) -> Self {
        Self { ctx, target }
    }

    /// Run the rollback to a terminal outcome. `shutdown` resolving aborts
    /// the attempt; the lease is released on every path once taken.
    pub async fn run<S>(
        &self,
        attempt_id: Uuid,
        request: RollbackRequest,
        shutdown: S,
    ) -> PipelineRun
    where
        S: Future<Output = ()>,
    {
        let attempt = DeploymentAttempt::new(
            attempt_id,
            AttemptKind::Rollback,
            self.target.clone(),
            request.version.clone(),
        );
        let mut tracker = StepTracker::new(attempt, &ROLLBACK_PLAN, self.ctx.bus.clone());
        tokio::pin!(shutdown);

        self.ctx.bus.log(format!(
            "Rolling back {} ({}), attempt {}",
            self.target.host, self.target.provider, attempt_id
        ));

        let result = self.execute(&mut tracker, &request, shutdown.as_mut()).await;
        tracker.finish(result)
    }

    async fn execute<S>(
        &self,
        tracker: &mut StepTracker,
        request: &RollbackRequest,
        mut shutdown: Pin<&mut S>,
    ) -> Result<(), DeployError>
    where
        S: Future<Output = ()>,
    {
        if let Some(version) = &request.version {
            validate_version_tag(version)?;
        }

        tokio::select! {
            biased;
            _ = shutdown.as_mut() => {
                return Err(DeployError::Aborted("interrupted before preflight".to_string()));
            }
            result = tracker.run(Step::Preflight, steps::preflight(&self.ctx)) => {
                result?;
            }
        }

        let attempt_id = tracker.attempt().id;
        let lease = tokio::select! {
            biased;
            _ = shutdown.as_mut() => {
                self.abandon_lease(attempt_id).await;
                return Err(DeployError::Aborted("interrupted while taking the lock".to_string()));
            }
            lease = self.take_lease(tracker) => lease?,
        };

        let result = tokio::select! {
            biased;
            _ = shutdown.as_mut() => Err(DeployError::Aborted("interrupted".to_string())),
            result = self.locked_steps(tracker, request) => result,
        };

        match lease.release().await {
            Ok(()) => self.ctx.bus.log("Released deployment lock"),
            Err(e) => self
                .ctx
                .bus
                .warn(format!("Failed to release deployment lock: {}", e)),
        }

        result
    }

    /// Drop whatever part of the lease an interrupted acquisition left behind
    async fn abandon_lease(&self, attempt_id: Uuid) {
        if let Err(e) =
            lock::release_if_owned(self.ctx.executor.as_ref(), &self.ctx.layout, attempt_id).await
        {
            self.ctx
                .bus
                .warn(format!("Failed to clean up deployment lock: {}", e));
        }
    }

    async fn take_lease(&self, tracker: &mut StepTracker) -> Result<Lease, DeployError> {
        let owner = LeaseOwner::for_attempt(tracker.attempt().id);
        tracker
            .run(
                Step::Lock,
                lock::acquire(
                    self.ctx.executor.clone(),
                    &self.ctx.layout,
                    owner,
                    self.ctx.stale_after,
                ),
            )
            .await?
            .ok_or_else(|| DeployError::Internal("lock step produced no lease".to_string()))
    }

    async fn locked_steps(
        &self,
        tracker: &mut StepTracker,
        request: &RollbackRequest,
    ) -> Result<(), DeployError> {
        let ctx = &self.ctx;
        let attempt_id = tracker.attempt().id;

        let resolution = tracker
            .run(Step::ResolveVersion, resolve(ctx, request))
            .await?
            .ok_or_else(|| DeployError::Internal("version resolution produced nothing".to_string()))?;
        tracker.set_version(resolution.version.clone());
        ctx.bus.log(format!(
            "Rollback version {} (from {})",
            resolution.version, resolution.source
        ));

        let mut question = format!(
            "Roll back {} from {} to {}",
            self.target.host,
            resolution.current.as_deref().unwrap_or("unknown"),
            resolution.version
        );
        if let Some(backup) = &resolution.backup {
            question.push_str(&format!(" and restore the database from {}", backup));
        }
        question.push('?');
        if !ctx.confirmer.confirm(&question).await? {
            return Err(DeployError::Aborted("rollback not confirmed".to_string()));
        }

        match &resolution.backup {
            Some(path) => {
                tracker
                    .run(Step::RestoreDatabase, steps::restore_database(ctx, path))
                    .await?;
            }
            None => tracker.skip(Step::RestoreDatabase, "database left as is")?,
        }

        let release = Release::new(resolution.version.clone(), resolution.org.clone());
        tracker
            .run(
                Step::VersionUpdate,
                steps::update_version(ctx, &release, attempt_id, AttemptKind::Rollback),
            )
            .await?;
        tracker.run(Step::ImagePull, steps::pull_images(ctx)).await?;
        tracker
            .run(Step::Restart, steps::restart_services(ctx))
            .await?;

        if request.skip_migrate {
            tracker.skip(Step::Migrate, "--skip-migrate")?;
        } else {
            tracker.run(Step::Migrate, steps::run_migrations(ctx)).await?;
        }

        tracker
            .run(Step::HealthCheck, steps::verify_health(ctx))
            .await?;

        Ok(())
    }
}
