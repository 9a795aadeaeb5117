//! Starts pipeline runs in the background on behalf of the relay API

use std::sync::Arc;

use relay_models::{
    AttemptKind, StartDeploymentRequest, StartRollbackRequest, TargetRequest,
};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::oneshot;
use tracing::{info, warn};
use uuid::Uuid;

use crate::app::options::{resolve_org, resolve_target, TargetArgs};
use crate::deploy::backup::BackupDestination;
use crate::deploy::context::PipelineContext;
use crate::deploy::events::EventBus;
use crate::deploy::pipeline::{DeployPipeline, DeployRequest};
use crate::deploy::rollback::{RollbackPipeline, RollbackRequest};
use crate::errors::DeployError;
use crate::models::attempt::DeploymentAttempt;
use crate::models::release::{validate_version_tag, Release};
use crate::models::target::Target;
use crate::server::registry::DeploymentEntry;
use crate::server::state::ServerState;
use crate::storage::settings::Settings;
use crate::terminal::prompt::AutoConfirm;
use crate::utils::generate_attempt_id;

/// Settings for one request: `app_dir` in the request overrides the
/// server's
fn request_settings(state: &ServerState, target: &TargetRequest) -> Settings {
    let mut settings = (*state.settings).clone();
    if let Some(app_dir) = &target.app_dir {
        settings.app_dir = app_dir.clone();
    }
    settings
}

/// Resolves when the attempt is cancelled; never when the handle is simply
/// dropped
async fn cancelled(cancel_rx: oneshot::Receiver<()>) {
    if cancel_rx.await.is_err() {
        std::future::pending::<()>().await;
    }
}

/// Mirror the bus into the registry entry until the final frame
fn follow(entry: Arc<DeploymentEntry>) {
    let (_, mut rx) = entry.bus().subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(frame) => {
                    entry.apply(&frame).await;
                    if frame.is_finished() {
                        break;
                    }
                }
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            }
        }
    });
}

async fn register(
    state: &ServerState,
    kind: AttemptKind,
    target: &Target,
    version: Option<String>,
) -> (Uuid, EventBus, Arc<DeploymentEntry>, oneshot::Receiver<()>) {
    let id = generate_attempt_id();
    let bus = EventBus::new();
    let summary = DeploymentAttempt::new(id, kind, target.clone(), version).summary();
    let (entry, cancel_rx) = state.registry.insert(summary, bus.clone()).await;
    follow(entry.clone());
    (id, bus, entry, cancel_rx)
}

/// Validate a deploy request and start it. Validation errors are returned
/// before anything is registered.
pub async fn start_deployment(
    state: &ServerState,
    request: StartDeploymentRequest,
) -> Result<Uuid, DeployError> {
    let settings = request_settings(state, &request.target);
    let target = resolve_target(&TargetArgs::from(&request.target), &settings, None)?;
    validate_version_tag(&request.version)?;
    let backup_destination = request
        .backup_upload
        .as_deref()
        .map(str::parse::<BackupDestination>)
        .transpose()?;

    let deploy_request = DeployRequest {
        release: Release::new(
            request.version.clone(),
            resolve_org(request.org.as_deref(), &settings),
        ),
        skip_backup: request.skip_backup,
        skip_migrate: request.skip_migrate,
        backup_destination,
    };

    let (id, bus, entry, cancel_rx) = register(
        state,
        AttemptKind::Deploy,
        &target,
        Some(request.version.clone()),
    )
    .await;

    let ctx = PipelineContext::new(
        (state.connector)(&target),
        &settings,
        bus,
        Arc::new(AutoConfirm(true)),
    );
    info!("Starting deployment {} of {} to {}", id, request.version, target.host);

    tokio::spawn(async move {
        let pipeline = DeployPipeline::new(ctx, target);
        let run = pipeline
            .run(id, deploy_request, cancelled(cancel_rx))
            .await;
        if let Err(e) = &run.result {
            warn!("Deployment {} ended: {}", id, e);
        }
        entry.complete(run.attempt.summary()).await;
    });

    Ok(id)
}

/// Validate a rollback request and start it. The request must carry
/// `confirm: true`.
pub async fn start_rollback(
    state: &ServerState,
    request: StartRollbackRequest,
) -> Result<Uuid, DeployError> {
    if !request.confirm {
        return Err(DeployError::ConfigError(
            "rollback requires \"confirm\": true".to_string(),
        ));
    }
    let settings = request_settings(state, &request.target);
    let target = resolve_target(&TargetArgs::from(&request.target), &settings, None)?;
    if let Some(version) = &request.version {
        validate_version_tag(version)?;
    }

    let rollback_request = RollbackRequest {
        version: request.version.clone(),
        org: request.org.clone(),
        default_org: settings.registry_org.clone(),
        restore_db: request.restore_db,
        db_backup: request.db_backup.clone(),
        skip_migrate: false,
    };

    let (id, bus, entry, cancel_rx) =
        register(state, AttemptKind::Rollback, &target, request.version.clone()).await;

    let ctx = PipelineContext::new(
        (state.connector)(&target),
        &settings,
        bus,
        Arc::new(AutoConfirm(true)),
    );
    info!("Starting rollback {} on {}", id, target.host);

    tokio::spawn(async move {
        let pipeline = RollbackPipeline::new(ctx, target);
        let run = pipeline
            .run(id, rollback_request, cancelled(cancel_rx))
            .await;
        if let Err(e) = &run.result {
            warn!("Rollback {} ended: {}", id, e);
        }
        entry.complete(run.attempt.summary()).await;
    });

    Ok(id)
}
