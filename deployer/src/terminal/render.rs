//! Console rendering of relay frames and run summaries

use colored::Colorize;
use relay_models::{Outcome, RelayFrame, StepStatus};

use crate::checks::{CheckReport, CheckStatus};
use crate::models::attempt::DeploymentAttempt;

/// One console line for a frame
pub fn render_frame(frame: &RelayFrame) -> String {
    match frame {
        RelayFrame::Log { log } => {
            if let Some(rest) = log.strip_prefix("ERROR: ") {
                format!("{} {}", "ERROR:".red().bold(), rest)
            } else if let Some(rest) = log.strip_prefix("WARN: ") {
                format!("{} {}", "WARN:".yellow(), rest)
            } else {
                format!("  {}", log)
            }
        }
        RelayFrame::Step {
            step,
            status,
            message,
        } => {
            let marker = match status {
                StepStatus::Started => "==>".cyan().bold(),
                StepStatus::Succeeded => "OK".green(),
                StepStatus::Warned => "WARN".yellow(),
                StepStatus::Skipped => "SKIP".dimmed(),
                StepStatus::Failed => "FAIL".red().bold(),
            };
            match message {
                Some(message) => format!("{} {} ({})", marker, step.label(), message),
                None => format!("{} {}", marker, step.label()),
            }
        }
        RelayFrame::Finished { outcome, error } => {
            let headline = match outcome {
                Outcome::Success => "Finished: success".green().bold(),
                Outcome::Failed => "Finished: failed".red().bold(),
                Outcome::Aborted => "Finished: aborted".yellow().bold(),
            };
            match error {
                Some(error) => format!("{} ({})", headline, error),
                None => headline.to_string(),
            }
        }
    }
}

/// Multi-line summary printed when an attempt ends
pub fn render_summary(attempt: &DeploymentAttempt) -> String {
    let mut output = String::new();

    output.push_str(&format!(
        "{} {} {} on {}\n",
        "===".bold(),
        attempt.kind.to_string().bold(),
        attempt.id,
        attempt.target.host.cyan()
    ));
    if let Some(version) = &attempt.version {
        output.push_str(&format!("  version: {}\n", version));
    }

    for report in &attempt.steps {
        let status = match report.status {
            StepStatus::Succeeded => "ok".green(),
            StepStatus::Warned => "warned".yellow(),
            StepStatus::Skipped => "skipped".dimmed(),
            StepStatus::Failed => "failed".red(),
            StepStatus::Started => "running".cyan(),
        };
        output.push_str(&format!(
            "  {:<18} {:<8} {:>6} ms",
            report.step.label(),
            status,
            report.duration_ms
        ));
        if let Some(message) = &report.message {
            output.push_str(&format!("  {}", message));
        }
        output.push('\n');
    }

    let outcome = match attempt.outcome {
        Some(Outcome::Success) => "success".green().bold(),
        Some(Outcome::Failed) => "failed".red().bold(),
        Some(Outcome::Aborted) => "aborted".yellow().bold(),
        None => "unfinished".normal(),
    };
    output.push_str(&format!("  outcome: {}\n", outcome));
    output
}

/// Health-check report with a pass/warn/fail tally
pub fn render_report(report: &CheckReport) -> String {
    let mut output = String::new();
    output.push_str(&format!("{}\n", "=== Health Check ===".bold()));

    for result in &report.results {
        let marker = match result.status {
            CheckStatus::Pass => "PASS".green(),
            CheckStatus::Warn => "WARN".yellow(),
            CheckStatus::Fail => "FAIL".red().bold(),
        };
        output.push_str(&format!("  {:<5} {:<28} {}\n", marker, result.name, result.detail));
    }

    output.push_str(&format!(
        "{} passed, {} warnings, {} failed\n",
        report.count(CheckStatus::Pass).to_string().green(),
        report.count(CheckStatus::Warn).to_string().yellow(),
        report.count(CheckStatus::Fail).to_string().red()
    ));
    output
}
