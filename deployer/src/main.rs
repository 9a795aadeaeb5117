//! sparkdeploy - Entry Point
//!
//! Deploys, rolls back and checks SparkNode hosts over SSH, and optionally
//! relays attempts over HTTP and WebSocket.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use secrecy::SecretString;
use uuid::Uuid;

use sparkdeploy::app::options::{ServerOptions, TargetArgs};
use sparkdeploy::app::run::{
    await_shutdown_signal, run_deploy, run_health_check, run_provision, run_rollback, run_serve,
    run_unlock, run_watch, DeployCommand, HealthCheckCommand, ProvisionCommand, RollbackCommand,
    UnlockCommand,
};
use sparkdeploy::client::watch::WatchOptions;
use sparkdeploy::deploy::backup::BackupDestination;
use sparkdeploy::errors::{DeployError, EXIT_OK};
use sparkdeploy::logs::{init_logging, LogLevel, LogOptions};
use sparkdeploy::storage::settings::Settings;
use sparkdeploy::utils::version_info;

#[derive(Debug, Parser)]
#[command(name = "sparkdeploy", about = "Deployment orchestrator for SparkNode hosts")]
#[command(disable_version_flag = true)]
struct Cli {
    /// Settings file (defaults to $SPARKDEPLOY_CONFIG, then ./sparkdeploy.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log at debug level
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Deploy a release to a host
    Deploy(DeployArgs),
    /// Roll a host back to an earlier release
    Rollback(RollbackArgs),
    /// Check containers, resources, databases, certificate and endpoints
    HealthCheck(HealthCheckArgs),
    /// Provision infrastructure with terraform
    Provision(ProvisionArgs),
    /// Run the relay server
    Serve(ServeArgs),
    /// Follow an attempt on a relay server
    Watch(WatchArgs),
    /// Clear a deployment lock left by a crashed attempt
    Unlock(UnlockArgs),
    /// Print version information
    Version,
}

#[derive(Debug, Clone, Args)]
struct TargetFlags {
    /// Cloud provider: aws, azure or gcp
    #[arg(long, env = "CLOUD_PROVIDER")]
    provider: Option<String>,

    /// Target host
    #[arg(long, env = "DEPLOY_HOST")]
    host: Option<String>,

    /// SSH login user
    #[arg(long, env = "DEPLOY_SSH_USER")]
    user: Option<String>,

    /// SSH private key
    #[arg(long, env = "DEPLOY_SSH_KEY")]
    key: Option<PathBuf>,

    /// SSH port
    #[arg(long)]
    port: Option<u16>,
}

impl From<TargetFlags> for TargetArgs {
    fn from(flags: TargetFlags) -> Self {
        Self {
            provider: flags.provider,
            host: flags.host,
            user: flags.user,
            key: flags.key,
            port: flags.port,
        }
    }
}

#[derive(Debug, Clone, Args)]
#[group(multiple = false)]
struct UploadFlags {
    /// Copy the database backup to this S3 bucket
    #[arg(long, value_name = "BUCKET")]
    s3: Option<String>,

    /// Copy the database backup to this Azure blob container
    #[arg(long, value_name = "CONTAINER")]
    blob: Option<String>,

    /// Copy the database backup to this GCS bucket
    #[arg(long, value_name = "BUCKET")]
    gcs: Option<String>,
}

impl UploadFlags {
    fn destination(self) -> Option<BackupDestination> {
        if let Some(bucket) = self.s3 {
            Some(BackupDestination::S3 { bucket })
        } else if let Some(container) = self.blob {
            Some(BackupDestination::Blob { container })
        } else {
            self.gcs.map(|bucket| BackupDestination::Gcs { bucket })
        }
    }
}

#[derive(Debug, Args)]
struct DeployArgs {
    #[command(flatten)]
    target: TargetFlags,

    /// Release tag to deploy
    #[arg(long, visible_alias = "tag", env = "APP_VERSION")]
    version: String,

    /// Registry organisation
    #[arg(long, env = "DOCKERHUB_ORG")]
    org: Option<String>,

    /// Application directory on the host
    #[arg(long)]
    app_dir: Option<String>,

    #[arg(long)]
    skip_backup: bool,

    #[arg(long)]
    skip_migrate: bool,

    #[command(flatten)]
    upload: UploadFlags,

    /// Do not ask for confirmation
    #[arg(long, short)]
    yes: bool,

    /// Provision with terraform first and deploy to the new host
    #[arg(long)]
    provision: bool,

    /// With --provision, apply only the VM resource
    #[arg(long, env = "TF_TARGET_VM_ONLY", value_parser = clap::builder::BoolishValueParser::new())]
    vm_only: bool,
}

#[derive(Debug, Args)]
struct RollbackArgs {
    #[command(flatten)]
    target: TargetFlags,

    /// Release tag to roll back to (defaults to the last recorded one)
    #[arg(long, visible_alias = "tag")]
    version: Option<String>,

    /// Registry organisation
    #[arg(long, env = "DOCKERHUB_ORG")]
    org: Option<String>,

    /// Application directory on the host
    #[arg(long)]
    app_dir: Option<String>,

    /// Restore the database from a pre-deploy backup
    #[arg(long)]
    restore_db: bool,

    /// Backup to restore instead of the one linked to the release
    #[arg(long, requires = "restore_db")]
    db_backup: Option<String>,

    #[arg(long)]
    skip_migrate: bool,

    /// Do not ask for confirmation
    #[arg(long, short)]
    yes: bool,
}

#[derive(Debug, Args)]
struct HealthCheckArgs {
    #[command(flatten)]
    target: TargetFlags,

    /// Check this machine instead of a remote host
    #[arg(long)]
    local: bool,

    /// Domain whose certificate is checked
    #[arg(long)]
    domain: Option<String>,

    /// Base URL for the HTTP endpoint checks
    #[arg(long)]
    base_url: Option<String>,
}

#[derive(Debug, Args)]
struct ProvisionArgs {
    /// Cloud provider: aws, azure or gcp
    #[arg(long, env = "CLOUD_PROVIDER")]
    provider: Option<String>,

    /// Apply only the VM resource
    #[arg(long, env = "TF_TARGET_VM_ONLY", value_parser = clap::builder::BoolishValueParser::new())]
    vm_only: bool,
}

#[derive(Debug, Args)]
struct ServeArgs {
    /// Address to bind
    #[arg(long)]
    host: Option<String>,

    /// Port to listen on
    #[arg(long)]
    port: Option<u16>,

    /// Bearer token required on POST routes
    #[arg(long, env = "SPARKDEPLOY_API_TOKEN", hide_env_values = true)]
    api_token: Option<String>,
}

#[derive(Debug, Args)]
struct WatchArgs {
    /// Attempt id
    id: Uuid,

    /// Relay base URL
    #[arg(long, default_value = "http://127.0.0.1:8090")]
    relay: String,

    /// Bearer token
    #[arg(long, env = "SPARKDEPLOY_API_TOKEN", hide_env_values = true)]
    api_token: Option<String>,
}

#[derive(Debug, Args)]
struct UnlockArgs {
    #[command(flatten)]
    target: TargetFlags,

    /// Application directory on the host
    #[arg(long)]
    app_dir: Option<String>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if matches!(cli.command, Command::Version) {
        match serde_json::to_string_pretty(&version_info()) {
            Ok(json) => println!("{}", json),
            Err(e) => eprintln!("{} {}", "ERROR:".red().bold(), e),
        }
        return;
    }

    let settings = match Settings::load(cli.config.as_deref()).await {
        Ok(settings) => settings,
        Err(e) => exit_with(e),
    };

    let log_options = LogOptions {
        log_level: if cli.verbose {
            LogLevel::Debug
        } else {
            settings.log_level.clone()
        },
        log_dir: settings.log_dir.clone(),
        json_format: settings.log_json,
        ..Default::default()
    };
    let _log_guard = match init_logging(log_options) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {e}");
            None
        }
    };

    match dispatch(cli.command, &settings).await {
        Ok(code) => std::process::exit(code),
        Err(e) => exit_with(e),
    }
}

fn exit_with(error: DeployError) -> ! {
    eprintln!("{} {}", "ERROR:".red().bold(), error);
    std::process::exit(error.exit_code())
}

async fn dispatch(command: Command, settings: &Settings) -> Result<i32, DeployError> {
    match command {
        Command::Deploy(args) => {
            let command = DeployCommand {
                target: args.target.into(),
                app_dir: args.app_dir,
                version: args.version,
                org: args.org,
                skip_backup: args.skip_backup,
                skip_migrate: args.skip_migrate,
                backup_destination: args.upload.destination(),
                yes: args.yes,
                provision: args.provision,
                vm_only: args.vm_only,
            };
            run_deploy(settings, command, await_shutdown_signal()).await
        }
        Command::Rollback(args) => {
            let command = RollbackCommand {
                target: args.target.into(),
                app_dir: args.app_dir,
                version: args.version,
                org: args.org,
                restore_db: args.restore_db,
                db_backup: args.db_backup,
                skip_migrate: args.skip_migrate,
                yes: args.yes,
            };
            run_rollback(settings, command, await_shutdown_signal()).await
        }
        Command::HealthCheck(args) => {
            let command = HealthCheckCommand {
                target: args.target.into(),
                local: args.local,
                domain: args.domain,
                base_url: args.base_url,
            };
            run_health_check(settings, command).await
        }
        Command::Provision(args) => {
            let command = ProvisionCommand {
                provider: args.provider,
                vm_only: args.vm_only,
            };
            run_provision(settings, command).await
        }
        Command::Serve(args) => {
            let mut options = ServerOptions::from(&settings.server);
            if let Some(host) = args.host {
                options.host = host;
            }
            if let Some(port) = args.port {
                options.port = port;
            }
            if let Some(token) = args.api_token.filter(|t| !t.is_empty()) {
                options.api_token = Some(SecretString::from(token));
            }
            run_serve(settings, options, await_shutdown_signal()).await
        }
        Command::Watch(args) => {
            let options = WatchOptions {
                relay_url: args.relay,
                attempt_id: args.id,
                api_token: args
                    .api_token
                    .filter(|t| !t.is_empty())
                    .map(SecretString::from),
            };
            run_watch(options).await
        }
        Command::Unlock(args) => {
            let command = UnlockCommand {
                target: args.target.into(),
                app_dir: args.app_dir,
            };
            run_unlock(settings, command).await
        }
        Command::Version => Ok(EXIT_OK),
    }
}
