//! Executor for commands on this machine, used when checks run on the host itself

use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use crate::errors::DeployError;
use crate::filesys::dir::Dir;
use crate::filesys::file::File;
use crate::remote::executor::{CommandOutput, RemoteExecutor};

/// Runs commands through `sh -c`
#[derive(Debug, Clone, Default)]
pub struct LocalExecutor;

impl LocalExecutor {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl RemoteExecutor for LocalExecutor {
    fn describe(&self) -> String {
        "localhost".to_string()
    }

    async fn exec_with_input(
        &self,
        command: &str,
        input: Option<&[u8]>,
    ) -> Result<CommandOutput, DeployError> {
        debug!("sh -c {}", command);

        let mut child = Command::new("sh")
            .args(["-c", command])
            .stdin(if input.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        if let (Some(data), Some(mut stdin)) = (input, child.stdin.take()) {
            stdin.write_all(data).await?;
            stdin.shutdown().await?;
        }

        let output = child.wait_with_output().await?;
        Ok(CommandOutput {
            status: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    async fn read_file(&self, path: &str) -> Result<Option<String>, DeployError> {
        let file = File::new(path);
        if !file.exists().await {
            return Ok(None);
        }
        file.read_string().await.map(Some)
    }

    async fn write_file_atomic(&self, path: &str, contents: &[u8]) -> Result<(), DeployError> {
        File::new(path).write_atomic(contents).await
    }

    async fn list_dir(&self, path: &str) -> Result<Vec<String>, DeployError> {
        let dir = Dir::new(path);
        if !dir.exists().await {
            return Ok(Vec::new());
        }
        dir.list_names().await
    }

    async fn create_dir_exclusive(&self, path: &str) -> Result<bool, DeployError> {
        Dir::new(path).create_exclusive().await
    }

    async fn remove_path(&self, path: &str) -> Result<(), DeployError> {
        let dir = Dir::new(path);
        if dir.exists().await {
            dir.delete().await
        } else {
            File::new(path).delete().await
        }
    }
}
