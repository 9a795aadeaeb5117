//! Remote execution contract

use async_trait::async_trait;

use crate::errors::DeployError;

/// Exit status used by [`RemoteExecutor::read_file`] to signal a missing file
const MISSING_FILE_STATUS: i32 = 3;

/// Captured result of one command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub status: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            status: 0,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failed(status: i32, stderr: impl Into<String>) -> Self {
        Self {
            status,
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    pub fn success(&self) -> bool {
        self.status == 0
    }

    /// Short description of a failure for logs and step events
    pub fn error_message(&self) -> String {
        let last_line = |s: &str| {
            s.lines()
                .rev()
                .map(str::trim)
                .find(|l| !l.is_empty())
                .map(str::to_string)
        };
        last_line(&self.stderr)
            .or_else(|| last_line(&self.stdout))
            .unwrap_or_else(|| format!("exit status {}", self.status))
    }
}

/// Quote a string for a POSIX shell
pub fn shell_quote(value: &str) -> String {
    if !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '/' | '.' | '_' | '-' | ':' | '=' | '@'))
    {
        return value.to_string();
    }
    format!("'{}'", value.replace('\'', r#"'"'"'"#))
}

/// Parent directory of a POSIX path
fn parent_dir(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) => "/",
        Some(idx) => &path[..idx],
        None => ".",
    }
}

/// Runs commands on a target host, one round trip per call.
///
/// A non-zero exit comes back as a [`CommandOutput`]; callers decide whether
/// it is fatal. Only transport problems are errors.
#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    /// Where commands run, for logs
    fn describe(&self) -> String;

    /// Run a shell command, optionally feeding `input` on stdin
    async fn exec_with_input(
        &self,
        command: &str,
        input: Option<&[u8]>,
    ) -> Result<CommandOutput, DeployError>;

    async fn exec(&self, command: &str) -> Result<CommandOutput, DeployError> {
        self.exec_with_input(command, None).await
    }

    /// Run a command and turn a non-zero exit into an error
    async fn exec_checked(&self, command: &str) -> Result<CommandOutput, DeployError> {
        let output = self.exec(command).await?;
        if output.success() {
            Ok(output)
        } else {
            Err(DeployError::RemoteError {
                host: self.describe(),
                message: output.error_message(),
            })
        }
    }

    /// Contents of a file, `None` when it does not exist
    async fn read_file(&self, path: &str) -> Result<Option<String>, DeployError> {
        let quoted = shell_quote(path);
        let command = format!(
            "if [ -f {p} ]; then cat {p}; else exit {code}; fi",
            p = quoted,
            code = MISSING_FILE_STATUS
        );
        let output = self.exec(&command).await?;
        match output.status {
            0 => Ok(Some(output.stdout)),
            MISSING_FILE_STATUS => Ok(None),
            _ => Err(DeployError::RemoteError {
                host: self.describe(),
                message: format!("reading {}: {}", path, output.error_message()),
            }),
        }
    }

    /// Replace a file via write-temp-then-rename so readers never see a
    /// partial write
    async fn write_file_atomic(&self, path: &str, contents: &[u8]) -> Result<(), DeployError> {
        let temp = format!("{}.tmp", path);
        let command = format!(
            "mkdir -p {dir} && cat > {tmp} && mv -f {tmp} {path}",
            dir = shell_quote(parent_dir(path)),
            tmp = shell_quote(&temp),
            path = shell_quote(path)
        );
        let output = self.exec_with_input(&command, Some(contents)).await?;
        if output.success() {
            Ok(())
        } else {
            Err(DeployError::RemoteError {
                host: self.describe(),
                message: format!("writing {}: {}", path, output.error_message()),
            })
        }
    }

    /// Entry names in a directory, hidden ones included, sorted. A missing
    /// directory lists as empty.
    async fn list_dir(&self, path: &str) -> Result<Vec<String>, DeployError> {
        let command = format!(
            "if [ -d {p} ]; then ls -1A {p}; fi",
            p = shell_quote(path)
        );
        let output = self.exec_checked(&command).await?;
        let mut names: Vec<String> = output
            .stdout
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect();
        names.sort();
        Ok(names)
    }

    /// `mkdir` without `-p`: true when this call created the directory,
    /// false when it already existed
    async fn create_dir_exclusive(&self, path: &str) -> Result<bool, DeployError> {
        let command = format!(
            "if mkdir {p} 2>/dev/null; then echo created; elif [ -d {p} ]; then echo exists; else exit 1; fi",
            p = shell_quote(path)
        );
        let output = self.exec_checked(&command).await?;
        Ok(output.stdout.trim() == "created")
    }

    /// `rm -rf`
    async fn remove_path(&self, path: &str) -> Result<(), DeployError> {
        self.exec_checked(&format!("rm -rf {}", shell_quote(path)))
            .await
            .map(|_| ())
    }
}
