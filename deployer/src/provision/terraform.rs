//! Terraform wrapper: init, apply and read the provisioned host back

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;

use relay_models::Provider;
use serde::Deserialize;
use tokio::process::Command;
use tracing::{debug, info};

use crate::errors::DeployError;
use crate::storage::settings::TerraformSettings;

/// Output holding the VM's public address
pub const PUBLIC_IP_OUTPUT: &str = "public_ip";

/// Output holding the VM's login user
pub const SSH_USER_OUTPUT: &str = "ssh_user";

/// Terraform options for one run
#[derive(Debug, Clone)]
pub struct TerraformOptions {
    pub binary: String,
    /// Directory holding `aws/`, `azure/` and `gcp/` modules
    pub root_dir: PathBuf,
    /// Environment name scoping the remote state
    pub environment: String,
    /// Resource applied alone when `vm_only` is set
    pub vm_resource: Option<String>,
    pub vm_only: bool,
}

impl From<&TerraformSettings> for TerraformOptions {
    fn from(settings: &TerraformSettings) -> Self {
        Self {
            binary: settings.binary.clone(),
            root_dir: settings.root_dir.clone(),
            environment: settings.environment.clone(),
            vm_resource: settings.vm_resource.clone(),
            vm_only: false,
        }
    }
}

/// Remote state location for one provider and environment
pub fn backend_config(provider: Provider, environment: &str) -> String {
    match provider {
        Provider::Aws => format!("key=sparknode/{}/terraform.tfstate", environment),
        Provider::Azure => format!("key=sparknode-{}.tfstate", environment),
        Provider::Gcp => format!("prefix=sparknode/{}", environment),
    }
}

/// VM resource address of the stock provider modules
pub fn default_vm_resource(provider: Provider) -> &'static str {
    match provider {
        Provider::Aws => "aws_instance.app",
        Provider::Azure => "azurerm_linux_virtual_machine.app",
        Provider::Gcp => "google_compute_instance.app",
    }
}

/// Host details read from `terraform output -json`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionedHost {
    pub public_ip: String,
    pub ssh_user: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OutputValue {
    value: serde_json::Value,
}

/// Parse `terraform output -json`. A missing or empty `public_ip` is a
/// configuration error: there is nothing to deploy to.
pub fn parse_outputs(json: &str) -> Result<ProvisionedHost, DeployError> {
    let outputs: HashMap<String, OutputValue> = serde_json::from_str(json)
        .map_err(|e| DeployError::ProvisionError(format!("unreadable terraform output: {}", e)))?;

    let string_output = |name: &str| {
        outputs
            .get(name)
            .and_then(|o| o.value.as_str())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    };

    let public_ip = string_output(PUBLIC_IP_OUTPUT).ok_or_else(|| {
        DeployError::ConfigError(format!(
            "terraform output has no {}; is the VM provisioned?",
            PUBLIC_IP_OUTPUT
        ))
    })?;

    Ok(ProvisionedHost {
        public_ip,
        ssh_user: string_output(SSH_USER_OUTPUT),
    })
}

/// Drives the Terraform CLI for one provider module
#[derive(Debug, Clone)]
pub struct Terraform {
    options: TerraformOptions,
    provider: Provider,
}

impl Terraform {
    pub fn new(options: TerraformOptions, provider: Provider) -> Self {
        Self { options, provider }
    }

    pub fn module_dir(&self) -> PathBuf {
        self.options.root_dir.join(self.provider.as_str())
    }

    fn chdir_arg(&self) -> String {
        format!("-chdir={}", self.module_dir().display())
    }

    pub fn init_args(&self) -> Vec<String> {
        vec![
            self.chdir_arg(),
            "init".to_string(),
            "-input=false".to_string(),
            "-reconfigure".to_string(),
            format!(
                "-backend-config={}",
                backend_config(self.provider, &self.options.environment)
            ),
        ]
    }

    pub fn apply_args(&self) -> Vec<String> {
        let mut args = vec![
            self.chdir_arg(),
            "apply".to_string(),
            "-input=false".to_string(),
            "-auto-approve".to_string(),
        ];
        if self.options.vm_only {
            let resource = self
                .options
                .vm_resource
                .as_deref()
                .unwrap_or_else(|| default_vm_resource(self.provider));
            args.push(format!("-target={}", resource));
        }
        args
    }

    pub fn output_args(&self) -> Vec<String> {
        vec![self.chdir_arg(), "output".to_string(), "-json".to_string()]
    }

    /// Run terraform with its output passed through to the operator
    async fn run_streaming(&self, args: &[String]) -> Result<(), DeployError> {
        debug!("{} {}", self.options.binary, args.join(" "));
        let status = self
            .command(args)
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .status()
            .await?;
        if status.success() {
            Ok(())
        } else {
            Err(DeployError::ProvisionError(format!(
                "terraform {} exited with {}",
                args.get(1).map(String::as_str).unwrap_or(""),
                status.code().unwrap_or(-1)
            )))
        }
    }

    fn command(&self, args: &[String]) -> Command {
        let mut command = Command::new(&self.options.binary);
        command.args(args).stdin(Stdio::null()).kill_on_drop(true);
        command
    }

    /// `terraform output -json` parsed into the provisioned host
    pub async fn outputs(&self) -> Result<ProvisionedHost, DeployError> {
        let output = self
            .command(&self.output_args())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await?;
        if !output.status.success() {
            return Err(DeployError::ProvisionError(format!(
                "terraform output failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        parse_outputs(&String::from_utf8_lossy(&output.stdout))
    }

    /// init, apply, then read the outputs. Any failure aborts with no
    /// cleanup of partial state.
    pub async fn provision(&self) -> Result<ProvisionedHost, DeployError> {
        if !self.module_dir().is_dir() {
            return Err(DeployError::ConfigError(format!(
                "terraform module not found: {}",
                self.module_dir().display()
            )));
        }

        info!(
            "Provisioning {} infrastructure ({})",
            self.provider, self.options.environment
        );
        self.run_streaming(&self.init_args()).await?;
        self.run_streaming(&self.apply_args()).await?;

        let host = self.outputs().await?;
        info!("Provisioned host {}", host.public_ip);
        Ok(host)
    }
}
