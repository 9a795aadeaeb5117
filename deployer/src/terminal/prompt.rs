//! Operator confirmation before a pipeline mutates the target

use std::io::{BufRead, Write};

use async_trait::async_trait;

use crate::errors::DeployError;

/// Asks the operator a yes/no question
#[async_trait]
pub trait Confirmer: Send + Sync {
    async fn confirm(&self, question: &str) -> Result<bool, DeployError>;
}

/// Only an explicit `y` or `yes` confirms
pub fn parse_answer(answer: &str) -> bool {
    matches!(answer.trim().to_lowercase().as_str(), "y" | "yes")
}

/// Prompts on stderr and reads one line from stdin
#[derive(Debug, Default, Clone, Copy)]
pub struct StdinConfirmer;

#[async_trait]
impl Confirmer for StdinConfirmer {
    async fn confirm(&self, question: &str) -> Result<bool, DeployError> {
        let question = question.to_string();
        tokio::task::spawn_blocking(move || {
            let mut stderr = std::io::stderr();
            write!(stderr, "{} [y/N] ", question)?;
            stderr.flush()?;

            let mut answer = String::new();
            std::io::stdin().lock().read_line(&mut answer)?;
            Ok(parse_answer(&answer))
        })
        .await
        .map_err(|e| DeployError::Internal(format!("Confirmation prompt failed: {}", e)))?
    }
}

/// Fixed answer: `--yes` on the command line, or the relay's `confirm` field
#[derive(Debug, Clone, Copy)]
pub struct AutoConfirm(pub bool);

#[async_trait]
impl Confirmer for AutoConfirm {
    async fn confirm(&self, _question: &str) -> Result<bool, DeployError> {
        Ok(self.0)
    }
}
