//! Command entry points

use std::future::Future;
use std::sync::Arc;

use relay_models::RelayFrame;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::app::options::{
    resolve_org, resolve_provider, resolve_target, ssh_connector, ServerOptions, TargetArgs,
};
use crate::checks::runner::{HealthCheckRunner, ResourceSource};
use crate::client::watch::{watch, WatchOptions};
use crate::deploy::backup::BackupDestination;
use crate::deploy::context::PipelineContext;
use crate::deploy::events::EventBus;
use crate::deploy::lock::force_release;
use crate::deploy::pipeline::{DeployPipeline, DeployRequest};
use crate::deploy::rollback::{RollbackPipeline, RollbackRequest};
use crate::deploy::tracker::PipelineRun;
use crate::errors::{DeployError, EXIT_OK};
use crate::models::release::Release;
use crate::models::target::Target;
use crate::provision::terraform::{ProvisionedHost, Terraform, TerraformOptions};
use crate::remote::local::LocalExecutor;
use crate::remote::RemoteExecutor;
use crate::server::serve::serve;
use crate::server::state::ServerState;
use crate::storage::layout::RemoteLayout;
use crate::storage::settings::Settings;
use crate::terminal::prompt::{AutoConfirm, Confirmer, StdinConfirmer};
use crate::terminal::render::{render_frame, render_report, render_summary};
use crate::utils::generate_attempt_id;

/// `sparkdeploy deploy`
#[derive(Debug, Clone, Default)]
pub struct DeployCommand {
    pub target: TargetArgs,
    pub app_dir: Option<String>,
    pub version: String,
    pub org: Option<String>,
    pub skip_backup: bool,
    pub skip_migrate: bool,
    pub backup_destination: Option<BackupDestination>,
    /// Answer yes to the confirmation prompt
    pub yes: bool,
    /// Run terraform first and deploy to the host it reports
    pub provision: bool,
    pub vm_only: bool,
}

/// `sparkdeploy rollback`
#[derive(Debug, Clone, Default)]
pub struct RollbackCommand {
    pub target: TargetArgs,
    pub app_dir: Option<String>,
    pub version: Option<String>,
    pub org: Option<String>,
    pub restore_db: bool,
    pub db_backup: Option<String>,
    pub skip_migrate: bool,
    pub yes: bool,
}

/// `sparkdeploy health-check`
#[derive(Debug, Clone, Default)]
pub struct HealthCheckCommand {
    pub target: TargetArgs,
    /// Check this machine instead of a remote host
    pub local: bool,
    pub domain: Option<String>,
    pub base_url: Option<String>,
}

/// `sparkdeploy provision`
#[derive(Debug, Clone, Default)]
pub struct ProvisionCommand {
    pub provider: Option<String>,
    pub vm_only: bool,
}

/// `sparkdeploy unlock`
#[derive(Debug, Clone, Default)]
pub struct UnlockCommand {
    pub target: TargetArgs,
    pub app_dir: Option<String>,
}

fn with_app_dir(settings: &Settings, app_dir: Option<&str>) -> Settings {
    let mut settings = settings.clone();
    if let Some(app_dir) = app_dir {
        settings.app_dir = app_dir.to_string();
    }
    settings
}

fn connect(settings: &Settings, target: &Target) -> Arc<dyn RemoteExecutor> {
    (ssh_connector(&settings.ssh))(target)
}

fn confirmer(yes: bool) -> Arc<dyn Confirmer> {
    if yes {
        Arc::new(AutoConfirm(true))
    } else {
        Arc::new(StdinConfirmer)
    }
}

/// Print step boundaries to stdout as they happen. Log lines already reach
/// the console through tracing.
fn spawn_step_printer(bus: &EventBus) -> JoinHandle<()> {
    let (_, mut rx) = bus.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(frame @ RelayFrame::Step { .. }) => println!("{}", render_frame(&frame)),
                Ok(frame) if frame.is_finished() => break,
                Ok(_) => {}
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            }
        }
    })
}

async fn report_run(run: PipelineRun, printer: JoinHandle<()>) -> i32 {
    let _ = printer.await;
    println!("{}", render_summary(&run.attempt));
    if let Err(e) = &run.result {
        error!("{} failed: {}", run.attempt.kind, e);
    }
    run.exit_code()
}

async fn provision_host(
    settings: &Settings,
    provider: Option<&str>,
    vm_only: bool,
) -> Result<ProvisionedHost, DeployError> {
    let provider = resolve_provider(provider, settings)?;
    let options = TerraformOptions {
        vm_only,
        ..TerraformOptions::from(&settings.terraform)
    };
    Terraform::new(options, provider).provision().await
}

/// Deploy a release and return the process exit code
pub async fn run_deploy(
    settings: &Settings,
    command: DeployCommand,
    shutdown_signal: impl Future<Output = ()>,
) -> Result<i32, DeployError> {
    let settings = with_app_dir(settings, command.app_dir.as_deref());

    let provisioned = if command.provision {
        Some(
            provision_host(
                &settings,
                command.target.provider.as_deref(),
                command.vm_only,
            )
            .await?,
        )
    } else {
        None
    };
    let target = resolve_target(&command.target, &settings, provisioned.as_ref())?;

    let request = DeployRequest {
        release: Release::new(
            command.version.clone(),
            resolve_org(command.org.as_deref(), &settings),
        ),
        skip_backup: command.skip_backup,
        skip_migrate: command.skip_migrate,
        backup_destination: command.backup_destination.clone(),
    };

    let bus = EventBus::new();
    let printer = spawn_step_printer(&bus);
    let ctx = PipelineContext::new(
        connect(&settings, &target),
        &settings,
        bus,
        confirmer(command.yes),
    );

    info!(
        "Deploying {} to {} ({})",
        command.version, target.host, target.provider
    );
    let run = DeployPipeline::new(ctx, target)
        .run(generate_attempt_id(), request, shutdown_signal)
        .await;
    Ok(report_run(run, printer).await)
}

/// Roll back to an earlier release and return the process exit code
pub async fn run_rollback(
    settings: &Settings,
    command: RollbackCommand,
    shutdown_signal: impl Future<Output = ()>,
) -> Result<i32, DeployError> {
    let settings = with_app_dir(settings, command.app_dir.as_deref());
    let target = resolve_target(&command.target, &settings, None)?;

    let request = RollbackRequest {
        version: command.version.clone(),
        org: command.org.clone(),
        default_org: settings.registry_org.clone(),
        restore_db: command.restore_db,
        db_backup: command.db_backup.clone(),
        skip_migrate: command.skip_migrate,
    };

    let bus = EventBus::new();
    let printer = spawn_step_printer(&bus);
    let ctx = PipelineContext::new(
        connect(&settings, &target),
        &settings,
        bus,
        confirmer(command.yes),
    );

    info!("Rolling back {} ({})", target.host, target.provider);
    let run = RollbackPipeline::new(ctx, target)
        .run(generate_attempt_id(), request, shutdown_signal)
        .await;
    Ok(report_run(run, printer).await)
}

/// Run every health check and return the process exit code
pub async fn run_health_check(
    settings: &Settings,
    command: HealthCheckCommand,
) -> Result<i32, DeployError> {
    let mut checks = settings.checks.clone();
    if command.domain.is_some() {
        checks.domain = command.domain.clone();
    }
    if command.base_url.is_some() {
        checks.base_url = command.base_url.clone();
    }

    let (executor, resources): (Arc<dyn RemoteExecutor>, _) = if command.local {
        (Arc::new(LocalExecutor::new()), ResourceSource::Local)
    } else {
        let target = resolve_target(&command.target, settings, None)?;
        (connect(settings, &target), ResourceSource::Remote)
    };

    let runner = HealthCheckRunner::new(
        executor,
        checks,
        settings.compose.db_user.clone(),
        resources,
    );
    let report = runner.run().await;
    println!("{}", render_report(&report));
    Ok(report.exit_code())
}

/// Provision infrastructure and print the resulting host
pub async fn run_provision(
    settings: &Settings,
    command: ProvisionCommand,
) -> Result<i32, DeployError> {
    let host = provision_host(settings, command.provider.as_deref(), command.vm_only).await?;
    println!("public_ip: {}", host.public_ip);
    if let Some(user) = &host.ssh_user {
        println!("ssh_user: {}", user);
    }
    Ok(EXIT_OK)
}

/// Clear a deployment lease left behind by a crashed attempt
pub async fn run_unlock(settings: &Settings, command: UnlockCommand) -> Result<i32, DeployError> {
    let settings = with_app_dir(settings, command.app_dir.as_deref());
    let target = resolve_target(&command.target, &settings, None)?;
    let executor = connect(&settings, &target);
    let layout = RemoteLayout::new(settings.app_dir.clone());

    match force_release(executor.as_ref(), &layout).await? {
        Some(holder) => println!("Released lock held by {}", holder.describe()),
        None => println!("Released lock on {}", target.host),
    }
    Ok(EXIT_OK)
}

/// Run the relay server until the shutdown signal
pub async fn run_serve(
    settings: &Settings,
    options: ServerOptions,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<i32, DeployError> {
    if options.api_token.is_none() {
        warn!("No API token configured; POST routes are open");
    }
    let state = Arc::new(ServerState::new(
        Arc::new(settings.clone()),
        options.clone(),
        ssh_connector(&settings.ssh),
    ));

    let handle = serve(&options, state, shutdown_signal).await?;
    handle
        .await
        .map_err(|e| DeployError::ServerError(e.to_string()))??;
    info!("Relay server stopped");
    Ok(EXIT_OK)
}

/// Follow an attempt on a relay server
pub async fn run_watch(options: WatchOptions) -> Result<i32, DeployError> {
    watch(options).await
}

/// Resolves on SIGINT, SIGTERM or Ctrl-C
pub async fn await_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let (mut sigterm, mut sigint) =
            match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
                (Ok(term), Ok(int)) => (term, int),
                _ => {
                    warn!("Unable to install signal handlers; falling back to Ctrl+C");
                    let _ = tokio::signal::ctrl_c().await;
                    return;
                }
            };

        tokio::select! {
            _ = sigterm.recv() => {
                info!("SIGTERM received, aborting...");
            }
            _ = sigint.recv() => {
                info!("SIGINT received, aborting...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl+C received, aborting...");
        }
    }
}
