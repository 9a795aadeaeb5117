//! Forward deployment pipeline

use std::future::Future;
use std::pin::Pin;

use relay_models::{AttemptKind, Step};
use uuid::Uuid;

use crate::deploy::backup::BackupDestination;
use crate::deploy::context::PipelineContext;
use crate::deploy::lock::{self, Lease, LeaseOwner};
use crate::deploy::policy::DEPLOY_PLAN;
use crate::deploy::steps;
use crate::deploy::tracker::{PipelineRun, StepTracker};
use crate::errors::DeployError;
use crate::models::attempt::DeploymentAttempt;
use crate::models::release::{validate_version_tag, Release};
use crate::models::target::Target;

/// What to deploy and which optional steps to run
#[derive(Debug, Clone)]
pub struct DeployRequest {
    pub release: Release,
    pub skip_backup: bool,
    pub skip_migrate: bool,
    pub backup_destination: Option<BackupDestination>,
}

impl DeployRequest {
    pub fn new(release: Release) -> Self {
        Self {
            release,
            skip_backup: false,
            skip_migrate: false,
            backup_destination: None,
        }
    }
}

pub struct DeployPipeline {
    ctx: PipelineContext,
    target: Target,
}

impl DeployPipeline {
    pub fn new(ctx: PipelineContext, target: Target) -> Self {
        Self { ctx, target }
    }

    /// Run the pipeline to a terminal outcome. `shutdown` resolving aborts
    /// the attempt; the lease is released on every path once taken.
    pub async fn run<S>(&self, attempt_id: Uuid, request: DeployRequest, shutdown: S) -> PipelineRun
    where
        S: Future<Output = ()>,
    {
        let attempt = DeploymentAttempt::new(
            attempt_id,
            AttemptKind::Deploy,
            self.target.clone(),
            Some(request.release.version_tag.clone()),
        );
        let mut tracker = StepTracker::new(attempt, &DEPLOY_PLAN, self.ctx.bus.clone());
        tokio::pin!(shutdown);

        self.ctx.bus.log(format!(
            "Deploying {} to {} ({}), attempt {}",
            request.release.version_tag, self.target.host, self.target.provider, attempt_id
        ));

        let result = self.execute(&mut tracker, &request, shutdown.as_mut()).await;

        if matches!(result, Err(DeployError::HealthExhausted { .. })) {
            self.ctx.bus.log(format!(
                "The new release never became healthy. To restore the previous one run: sparkdeploy rollback --provider {} --host {}",
                self.target.provider, self.target.host
            ));
        }

        tracker.finish(result)
    }

    async fn execute<S>(
        &self,
        tracker: &mut StepTracker,
        request: &DeployRequest,
        mut shutdown: Pin<&mut S>,
    ) -> Result<(), DeployError>
    where
        S: Future<Output = ()>,
    {
        validate_version_tag(&request.release.version_tag)?;

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
        request: &DeployRequest,
    ) -> Result<(), DeployError> {
        let ctx = &self.ctx;
        let attempt_id = tracker.attempt().id;

        let current = steps::current_version(ctx).await?;
        let question = format!(
            "Deploy {} to {} (currently {})?",
            request.release.version_tag,
            self.target.host,
            current.as_deref().unwrap_or("unknown")
        );
        if !ctx.confirmer.confirm(&question).await? {
            return Err(DeployError::Aborted("deployment not confirmed".to_string()));
        }

        let backup = if request.skip_backup {
            tracker.skip(Step::Backup, "--skip-backup")?;
            None
        } else {
            tracker
                .run(Step::Backup, steps::backup_database(ctx, attempt_id))
                .await?
        };

        match (&request.backup_destination, &backup) {
            (Some(destination), Some(path)) => {
                tracker
                    .run(
                        Step::BackupUpload,
                        steps::upload_backup(ctx, destination, path),
                    )
                    .await?;
            }
            (Some(_), None) => tracker.skip(Step::BackupUpload, "no backup to upload")?,
            (None, _) => tracker.skip(Step::BackupUpload, "no destination configured")?,
        }

        tracker
            .run(
                Step::VersionUpdate,
                steps::update_version(ctx, &request.release, attempt_id, AttemptKind::Deploy),
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

        if ctx.compose.prune_images {
            tracker.run(Step::Cleanup, steps::prune_images(ctx)).await?;
        } else {
            tracker.skip(Step::Cleanup, "image pruning disabled")?;
        }

        Ok(())
    }
}
