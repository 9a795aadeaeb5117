//! Deployment target models

use std::path::PathBuf;

use relay_models::Provider;
use serde::{Deserialize, Serialize};

/// A provisioned host plus the SSH parameters used to reach it.
/// Resolved once per invocation and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    /// Cloud provider hosting the VM
    pub provider: Provider,

    /// Hostname or public IP
    pub host: String,

    /// SSH login user
    pub ssh_user: String,

    /// Private key passed with `-i`; the SSH agent is used when absent
    pub ssh_key_path: Option<PathBuf>,

    /// SSH port
    pub ssh_port: u16,
}

impl Target {
    /// `user@host` as understood by ssh
    pub fn destination(&self) -> String {
        format!("{}@{}", self.ssh_user, self.host)
    }
}

/// Default login user of the stock images each provider module boots
pub fn default_ssh_user(provider: Provider) -> &'static str {
    match provider {
        Provider::Aws => "ubuntu",
        Provider::Azure => "azureuser",
        Provider::Gcp => "ubuntu",
    }
}
