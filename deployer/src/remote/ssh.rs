//! SSH transport

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, trace};

use crate::errors::DeployError;
use crate::models::target::Target;
use crate::remote::executor::{CommandOutput, RemoteExecutor};
use crate::storage::settings::SshSettings;

/// ssh exits with 255 when the connection itself failed
const SSH_CONNECTION_FAILURE: i32 = 255;

/// What ssh itself prints when it never reached the remote shell
const CONNECTION_ERRORS: [&str; 10] = [
    "ssh: connect to host",
    "ssh: Could not resolve hostname",
    "Connection refused",
    "Connection timed out",
    "Connection closed by",
    "Connection reset by",
    "No route to host",
    "Permission denied (",
    "Host key verification failed",
    "kex_exchange_identification",
];

/// ssh exits 255 on its own errors, but so can the remote command
pub fn is_connection_failure(status: i32, stderr: &str) -> bool {
    status == SSH_CONNECTION_FAILURE && CONNECTION_ERRORS.iter().any(|e| stderr.contains(e))
}

/// SSH client options
#[derive(Debug, Clone)]
pub struct SshOptions {
    /// Connection timeout; there is no command-level timeout
    pub connect_timeout: Duration,

    /// `StrictHostKeyChecking` policy
    pub strict_host_key_checking: String,

    /// ssh binary
    pub binary: String,
}

impl Default for SshOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            strict_host_key_checking: "accept-new".to_string(),
            binary: "ssh".to_string(),
        }
    }
}

impl From<&SshSettings> for SshOptions {
    fn from(settings: &SshSettings) -> Self {
        Self {
            connect_timeout: Duration::from_secs(settings.connect_timeout_secs),
            strict_host_key_checking: settings.strict_host_key_checking.clone(),
            ..Default::default()
        }
    }
}

/// Executes every command as its own `ssh user@host "<command>"` session
#[derive(Debug, Clone)]
pub struct SshExecutor {
    target: Target,
    options: SshOptions,
}

impl SshExecutor {
    pub fn new(target: Target, options: SshOptions) -> Self {
        Self { target, options }
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    /// Full argument list passed to ssh for `command`
    pub fn build_args(&self, command: &str) -> Vec<String> {
        let mut args = vec![
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", self.options.connect_timeout.as_secs().max(1)),
            "-o".to_string(),
            format!(
                "StrictHostKeyChecking={}",
                self.options.strict_host_key_checking
            ),
            "-p".to_string(),
            self.target.ssh_port.to_string(),
        ];
        if let Some(key) = &self.target.ssh_key_path {
            args.push("-i".to_string());
            args.push(key.display().to_string());
        }
        args.push(self.target.destination());
        args.push(command.to_string());
        args
    }
}

#[async_trait]
impl RemoteExecutor for SshExecutor {
    fn describe(&self) -> String {
        self.target.destination()
    }

    async fn exec_with_input(
        &self,
        command: &str,
        input: Option<&[u8]>,
    ) -> Result<CommandOutput, DeployError> {
        debug!("ssh {}: {}", self.target.destination(), command);

        let mut child = Command::new(&self.options.binary)
            .args(self.build_args(command))
            .stdin(if input.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                DeployError::Internal(format!("Failed to run {}: {}", self.options.binary, e))
            })?;

        if let (Some(data), Some(mut stdin)) = (input, child.stdin.take()) {
            stdin.write_all(data).await?;
            stdin.shutdown().await?;
        }

        let output = child.wait_with_output().await?;
        let result = CommandOutput {
            status: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };
        trace!("ssh exit status {}", result.status);

        if is_connection_failure(result.status, &result.stderr) {
            return Err(DeployError::Unreachable(format!(
                "{}: {}",
                self.target.destination(),
                result.error_message()
            )));
        }

        Ok(result)
    }
}
