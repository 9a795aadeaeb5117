//! Resolution of command-line, environment and settings values into run
//! options. Precedence is flag, then environment (clap reads both), then the
//! settings file, then built-in defaults.

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use relay_models::{Provider, TargetRequest};
use secrecy::SecretString;

use crate::errors::DeployError;
use crate::models::target::{default_ssh_user, Target};
use crate::provision::terraform::ProvisionedHost;
use crate::remote::local::LocalExecutor;
use crate::remote::ssh::{SshExecutor, SshOptions};
use crate::remote::RemoteExecutor;
use crate::storage::settings::{ServerSettings, Settings, SshSettings};

/// Provider used when none is configured anywhere
pub const DEFAULT_PROVIDER: Provider = Provider::Aws;

/// Target fields as given by the operator, before defaults apply
#[derive(Debug, Clone, Default)]
pub struct TargetArgs {
    pub provider: Option<String>,
    pub host: Option<String>,
    pub user: Option<String>,
    pub key: Option<PathBuf>,
    pub port: Option<u16>,
}

impl From<&TargetRequest> for TargetArgs {
    fn from(request: &TargetRequest) -> Self {
        Self {
            provider: request.provider.map(|p| p.as_str().to_string()),
            host: Some(request.host.clone()).filter(|h| !h.trim().is_empty()),
            user: request.user.clone(),
            key: request.key.as_ref().map(PathBuf::from),
            port: request.port,
        }
    }
}

/// Provider from the flag, then the settings file, then [`DEFAULT_PROVIDER`]
pub fn resolve_provider(flag: Option<&str>, settings: &Settings) -> Result<Provider, DeployError> {
    match flag.or(settings.provider.as_deref()) {
        Some(value) => Provider::from_str(value).map_err(DeployError::ConfigError),
        None => Ok(DEFAULT_PROVIDER),
    }
}

/// Build the target of this invocation. Terraform output, when present,
/// supplies the host and login user the operator left out.
pub fn resolve_target(
    args: &TargetArgs,
    settings: &Settings,
    provisioned: Option<&ProvisionedHost>,
) -> Result<Target, DeployError> {
    let provider = resolve_provider(args.provider.as_deref(), settings)?;

    let host = args
        .host
        .clone()
        .or_else(|| provisioned.map(|p| p.public_ip.clone()))
        .ok_or_else(|| {
            DeployError::ConfigError(
                "no target host: pass --host, set DEPLOY_HOST, or use --provision".to_string(),
            )
        })?;

    let ssh_user = args
        .user
        .clone()
        .or_else(|| provisioned.and_then(|p| p.ssh_user.clone()))
        .or_else(|| settings.ssh.user.clone())
        .unwrap_or_else(|| default_ssh_user(provider).to_string());

    Ok(Target {
        provider,
        host,
        ssh_user,
        ssh_key_path: args.key.clone().or_else(|| settings.ssh.key_path.clone()),
        ssh_port: args.port.unwrap_or(settings.ssh.port),
    })
}

/// Registry organisation from the flag, then the settings file
pub fn resolve_org(flag: Option<&str>, settings: &Settings) -> String {
    flag.map(str::to_string)
        .unwrap_or_else(|| settings.registry_org.clone())
}

/// Opens an executor for a resolved target
pub type Connector = Arc<dyn Fn(&Target) -> Arc<dyn RemoteExecutor> + Send + Sync>;

/// One ssh session per command
pub fn ssh_connector(settings: &SshSettings) -> Connector {
    let options = SshOptions::from(settings);
    Arc::new(move |target: &Target| {
        Arc::new(SshExecutor::new(target.clone(), options.clone())) as Arc<dyn RemoteExecutor>
    })
}

/// Commands run on this machine, whatever the target says
pub fn local_connector() -> Connector {
    Arc::new(|_: &Target| Arc::new(LocalExecutor::new()) as Arc<dyn RemoteExecutor>)
}

/// Relay server options
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,

    /// Bearer token required on mutating routes
    pub api_token: Option<SecretString>,

    /// Finished attempts kept for listing
    pub history_limit: usize,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self::from(&ServerSettings::default())
    }
}

impl From<&ServerSettings> for ServerOptions {
    fn from(settings: &ServerSettings) -> Self {
        Self {
            host: settings.host.clone(),
            port: settings.port,
            api_token: settings
                .api_token
                .clone()
                .filter(|t| !t.is_empty())
                .map(SecretString::from),
            history_limit: settings.history_limit,
        }
    }
}
