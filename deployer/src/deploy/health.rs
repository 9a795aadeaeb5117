//! Health verification: probes and the bounded retry loop

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::errors::DeployError;
use crate::remote::{shell_quote, RemoteExecutor};
use crate::storage::settings::HealthSettings;

/// Sentinel a health body may carry even with a 200
const UNHEALTHY_SENTINEL: &str = "unhealthy";

/// Result of one probe
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthStatus {
    Healthy,
    Unhealthy(String),
}

impl HealthStatus {
    pub fn is_healthy(&self) -> bool {
        matches!(self, HealthStatus::Healthy)
    }
}

/// Healthy iff the endpoint answered 200 and the body is not the
/// `unhealthy` sentinel. No status means the connection failed.
pub fn interpret(status: Option<u16>, body: &str) -> HealthStatus {
    match status {
        None => HealthStatus::Unhealthy("no response".to_string()),
        Some(200) if body.to_lowercase().contains(UNHEALTHY_SENTINEL) => {
            HealthStatus::Unhealthy("endpoint reports unhealthy".to_string())
        }
        Some(200) => HealthStatus::Healthy,
        Some(code) => HealthStatus::Unhealthy(format!("HTTP {}", code)),
    }
}

/// One health probe against some endpoint
#[async_trait]
pub trait HealthProbe: Send + Sync {
    fn describe(&self) -> String;

    async fn probe(&self) -> HealthStatus;
}

/// Probes an endpoint local to the target host by running curl over the
/// executor
pub struct RemoteCurlProbe {
    executor: Arc<dyn RemoteExecutor>,
    url: String,
}

impl RemoteCurlProbe {
    pub fn new(executor: Arc<dyn RemoteExecutor>, url: impl Into<String>) -> Self {
        Self {
            executor,
            url: url.into(),
        }
    }

    /// Prints the body, then the status code on its own last line. curl
    /// prints `000` when it could not connect.
    pub fn command(&self) -> String {
        format!(
            "curl -s -m 5 -w '\\n%{{http_code}}' {}",
            shell_quote(&self.url)
        )
    }
}

/// Split curl output produced by [`RemoteCurlProbe::command`]
pub fn parse_curl_output(stdout: &str) -> (Option<u16>, String) {
    let trimmed = stdout.trim_end_matches('\n');
    let (body, code) = match trimmed.rsplit_once('\n') {
        Some((body, code)) => (body, code),
        None => ("", trimmed),
    };
    let status = code.trim().parse::<u16>().ok().filter(|c| *c != 0);
    (status, body.to_string())
}

#[async_trait]
impl HealthProbe for RemoteCurlProbe {
    fn describe(&self) -> String {
        format!("{} (from {})", self.url, self.executor.describe())
    }

    async fn probe(&self) -> HealthStatus {
        match self.executor.exec(&self.command()).await {
            Ok(output) => {
                let (status, body) = parse_curl_output(&output.stdout);
                interpret(status, &body)
            }
            Err(e) => HealthStatus::Unhealthy(e.to_string()),
        }
    }
}

/// Probes an endpoint directly over HTTP
pub struct HttpProbe {
    client: reqwest::Client,
    url: String,
}

impl HttpProbe {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, DeployError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl HealthProbe for HttpProbe {
    fn describe(&self) -> String {
        self.url.clone()
    }

    async fn probe(&self) -> HealthStatus {
        match self.client.get(&self.url).send().await {
            Ok(response) => {
                let status = response.status().as_u16();
                let body = response.text().await.unwrap_or_default();
                interpret(Some(status), &body)
            }
            Err(e) => {
                debug!("Health probe {} failed: {}", self.url, e);
                HealthStatus::Unhealthy(format!("request failed: {}", e))
            }
        }
    }
}

/// Bounded retry policy: fixed attempts at a fixed interval
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthPolicy {
    pub attempts: u32,
    pub interval: Duration,
}

impl Default for HealthPolicy {
    fn default() -> Self {
        Self {
            attempts: 12,
            interval: Duration::from_secs(10),
        }
    }
}

impl From<&HealthSettings> for HealthPolicy {
    fn from(settings: &HealthSettings) -> Self {
        Self {
            attempts: settings.attempts.max(1),
            interval: Duration::from_secs(settings.interval_secs),
        }
    }
}

/// Probe until healthy or `policy.attempts` probes have been made, sleeping
/// `policy.interval` between probes. Returns the attempt number that
/// succeeded.
pub async fn wait_until_healthy<S, F, R>(
    probe: &dyn HealthProbe,
    policy: &HealthPolicy,
    sleep_fn: S,
    mut on_attempt: R,
) -> Result<u32, DeployError>
where
    S: Fn(Duration) -> F,
    F: Future<Output = ()>,
    R: FnMut(u32, &HealthStatus),
{
    for attempt in 1..=policy.attempts {
        let status = probe.probe().await;
        on_attempt(attempt, &status);
        if status.is_healthy() {
            return Ok(attempt);
        }
        if attempt < policy.attempts {
            sleep_fn(policy.interval).await;
        }
    }

    Err(DeployError::HealthExhausted {
        attempts: policy.attempts,
    })
}
