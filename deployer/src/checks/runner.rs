//! Runs every check against one host and aggregates the results

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info};

use crate::checks::resources::{self, ResourceUsage, REMOTE_USAGE_COMMAND};
use crate::checks::tls;
use crate::checks::{classify_percent, CheckReport, CheckResult, CheckStatus};
use crate::deploy::docker;
use crate::deploy::health::{HealthProbe, HealthStatus, HttpProbe, RemoteCurlProbe};
use crate::errors::DeployError;
use crate::remote::RemoteExecutor;
use crate::storage::settings::CheckSettings;

/// Endpoints probed, relative to the base URL
pub const HTTP_ENDPOINTS: [&str; 2] = ["/health", "/api/v1/health"];

/// Where disk and memory numbers come from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceSource {
    /// sysinfo on this machine
    Local,
    /// `df`/`free` over the executor
    Remote,
}

pub struct HealthCheckRunner {
    executor: Arc<dyn RemoteExecutor>,
    settings: CheckSettings,
    db_user: String,
    resources: ResourceSource,
    http_timeout: Duration,
}

impl HealthCheckRunner {
    pub fn new(
        executor: Arc<dyn RemoteExecutor>,
        settings: CheckSettings,
        db_user: impl Into<String>,
        resources: ResourceSource,
    ) -> Self {
        Self {
            executor,
            settings,
            db_user: db_user.into(),
            resources,
            http_timeout: Duration::from_secs(10),
        }
    }

    pub async fn run(&self) -> CheckReport {
        info!("Running health checks on {}", self.executor.describe());
        let mut report = CheckReport::default();

        for container in &self.settings.containers {
            report.push(self.check_container(container).await);
        }
        for result in self.check_resources().await {
            report.push(result);
        }
        report.push(self.check_postgres().await);
        report.push(self.check_redis().await);
        if let Some(result) = self.check_certificate().await {
            report.push(result);
        }
        for endpoint in HTTP_ENDPOINTS {
            report.push(self.check_http(endpoint).await);
        }

        report
    }

    async fn check_container(&self, name: &str) -> CheckResult {
        let check = format!("container {}", name);
        match self.executor.exec(&docker::container_running(name)).await {
            Ok(output) if output.success() && docker::parse_running(&output.stdout) => {
                CheckResult::pass(check, "running")
            }
            Ok(output) if output.success() => CheckResult::fail(check, "not running"),
            Ok(output) => CheckResult::fail(check, output.error_message()),
            Err(e) => CheckResult::fail(check, e.to_string()),
        }
    }

    async fn usage(&self) -> Result<ResourceUsage, DeployError> {
        match self.resources {
            ResourceSource::Local => Ok(resources::collect_local()),
            ResourceSource::Remote => {
                let output = self.executor.exec_checked(REMOTE_USAGE_COMMAND).await?;
                resources::parse_remote(&output.stdout).ok_or_else(|| {
                    DeployError::Internal("unrecognised df/free output".to_string())
                })
            }
        }
    }

    async fn check_resources(&self) -> Vec<CheckResult> {
        let usage = match self.usage().await {
            Ok(usage) => usage,
            Err(e) => {
                return vec![
                    CheckResult::fail("disk", e.to_string()),
                    CheckResult::fail("memory", e.to_string()),
                ];
            }
        };

        let disk = classify_percent(
            usage.disk_percent,
            self.settings.disk_warn_percent,
            self.settings.disk_crit_percent,
        );
        let memory = classify_percent(
            usage.memory_percent,
            self.settings.memory_warn_percent,
            self.settings.memory_crit_percent,
        );
        vec![
            CheckResult {
                name: "disk".to_string(),
                status: disk,
                detail: format!("{:.0}% used", usage.disk_percent),
            },
            CheckResult {
                name: "memory".to_string(),
                status: memory,
                detail: format!("{:.0}% used", usage.memory_percent),
            },
        ]
    }

    async fn check_postgres(&self) -> CheckResult {
        let command = docker::pg_isready(&self.settings.postgres_container, &self.db_user);
        match self.executor.exec(&command).await {
            Ok(output) if output.success() => {
                CheckResult::pass("postgres", "accepting connections")
            }
            Ok(output) => CheckResult::fail("postgres", output.error_message()),
            Err(e) => CheckResult::fail("postgres", e.to_string()),
        }
    }

    async fn check_redis(&self) -> CheckResult {
        let command = docker::redis_ping(&self.settings.redis_container);
        match self.executor.exec(&command).await {
            Ok(output) if output.success() && output.stdout.contains("PONG") => {
                CheckResult::pass("redis", "PONG")
            }
            Ok(output) => CheckResult::fail("redis", output.error_message()),
            Err(e) => CheckResult::fail("redis", e.to_string()),
        }
    }

    async fn check_certificate(&self) -> Option<CheckResult> {
        let Some(domain) = &self.settings.domain else {
            debug!("No domain configured; skipping certificate check");
            return None;
        };
        let check = format!("certificate {}", domain);

        let output = match self.executor.exec(&tls::enddate_command(domain)).await {
            Ok(output) => output,
            Err(e) => return Some(CheckResult::fail(check, e.to_string())),
        };
        let Some(expires) = tls::parse_enddate(&output.stdout) else {
            return Some(CheckResult::fail(check, "could not read certificate"));
        };

        let (status, days_left) =
            tls::classify_expiry(expires, Utc::now(), self.settings.cert_warn_days);
        let detail = match status {
            CheckStatus::Fail => format!("expired {}", expires.to_rfc3339()),
            _ => format!("expires in {} days", days_left),
        };
        Some(CheckResult {
            name: check,
            status,
            detail,
        })
    }

    /// Probe from this machine when a base URL is configured, otherwise
    /// curl the endpoint on the host through the executor
    fn http_probe(&self, endpoint: &str) -> Result<Box<dyn HealthProbe>, DeployError> {
        match &self.settings.base_url {
            Some(base_url) => {
                let url = format!("{}{}", base_url.trim_end_matches('/'), endpoint);
                Ok(Box::new(HttpProbe::new(url, self.http_timeout)?))
            }
            None => {
                let url = format!(
                    "{}{}",
                    self.settings.host_base_url.trim_end_matches('/'),
                    endpoint
                );
                Ok(Box::new(RemoteCurlProbe::new(self.executor.clone(), url)))
            }
        }
    }

    async fn check_http(&self, endpoint: &str) -> CheckResult {
        let check = format!("http {}", endpoint);
        let probe = match self.http_probe(endpoint) {
            Ok(probe) => probe,
            Err(e) => return CheckResult::fail(check, e.to_string()),
        };
        match probe.probe().await {
            HealthStatus::Healthy => CheckResult::pass(check, "200 OK"),
            HealthStatus::Unhealthy(reason) => CheckResult::fail(check, reason),
        }
    }
}
