//! Health gate and standalone health-check tests

mod common;

use std::sync::Arc;
use std::time::Duration;

use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use common::{FakeHost, ScriptedProbe};
use sparkdeploy::checks::runner::{HealthCheckRunner, ResourceSource};
use sparkdeploy::checks::CheckStatus;
use sparkdeploy::deploy::health::{
    wait_until_healthy, HealthPolicy, HealthProbe, HealthStatus, HttpProbe,
};
use sparkdeploy::errors::DeployError;
use sparkdeploy::remote::CommandOutput;
use sparkdeploy::storage::settings::CheckSettings;

const USAGE: &str = "\
Filesystem     1024-blocks     Used Available Capacity Mounted on
/dev/root         30298176 25454360   4827432      85% /
               total        used        free      shared  buff/cache   available
Mem:        4026531840  2415919104   201326592    12582912  1409286144  1207959552
Swap:                0           0           0
";

fn policy(attempts: u32) -> HealthPolicy {
    HealthPolicy {
        attempts,
        interval: Duration::from_secs(10),
    }
}

fn unhealthy() -> HealthStatus {
    HealthStatus::Unhealthy("HTTP 502".to_string())
}

#[tokio::test]
async fn test_exhausts_exactly_the_configured_attempts() {
    let probe = ScriptedProbe::never_healthy();
    let slept = std::sync::Mutex::new(Vec::new());
    let mut seen = Vec::new();

    let result = wait_until_healthy(
        &probe,
        &policy(12),
        |d| {
            slept.lock().unwrap().push(d);
            async {}
        },
        |attempt, _| seen.push(attempt),
    )
    .await;

    assert!(matches!(
        result,
        Err(DeployError::HealthExhausted { attempts: 12 })
    ));
    assert_eq!(probe.calls(), 12);
    assert_eq!(seen, (1..=12).collect::<Vec<u32>>());

    // Sleeps only between probes
    let slept = slept.into_inner().unwrap();
    assert_eq!(slept.len(), 11);
    assert!(slept.iter().all(|d| *d == Duration::from_secs(10)));
}

#[tokio::test]
async fn test_stops_at_first_healthy_probe() {
    let probe = ScriptedProbe::new(vec![unhealthy(), unhealthy()], HealthStatus::Healthy);
    let sleeps = std::sync::atomic::AtomicU32::new(0);

    let attempt = tokio_test::assert_ok!(
        wait_until_healthy(
            &probe,
            &policy(12),
            |_| {
                sleeps.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                async {}
            },
            |_, _| {},
        )
        .await
    );

    assert_eq!(attempt, 3);
    assert_eq!(probe.calls(), 3);
    assert_eq!(sleeps.load(std::sync::atomic::Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_single_attempt_never_sleeps() {
    let probe = ScriptedProbe::never_healthy();
    let sleeps = std::sync::atomic::AtomicU32::new(0);

    let result = wait_until_healthy(
        &probe,
        &policy(1),
        |_| {
            sleeps.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            async {}
        },
        |_, _| {},
    )
    .await;

    assert!(result.is_err());
    assert_eq!(sleeps.load(std::sync::atomic::Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_http_probe() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"status":"ok"}"#))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/degraded"))
        .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"status":"unhealthy"}"#))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/down"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let probe = |p: &str| HttpProbe::new(format!("{}{}", server.uri(), p), Duration::from_secs(5)).unwrap();

    assert_eq!(probe("/health").probe().await, HealthStatus::Healthy);
    assert!(!probe("/degraded").probe().await.is_healthy());
    assert_eq!(
        probe("/down").probe().await,
        HealthStatus::Unhealthy("HTTP 503".to_string())
    );
}

#[tokio::test]
async fn test_http_probe_connection_refused() {
    // Nothing listens on port 9 of localhost
    let probe = HttpProbe::new("http://127.0.0.1:9/health", Duration::from_secs(2)).unwrap();
    assert!(!probe.probe().await.is_healthy());
}

fn healthy_host() -> FakeHost {
    let host = FakeHost::default();
    host.respond("docker inspect", CommandOutput::ok("true\n"));
    host.respond("df -P /", CommandOutput::ok(USAGE));
    host.respond("pg_isready", CommandOutput::ok("/var/run/postgresql:5432 - accepting connections\n"));
    host.respond("redis-cli ping", CommandOutput::ok("PONG\n"));
    host
}

async fn healthy_server() -> MockServer {
    let server = MockServer::start().await;
    for endpoint in ["/health", "/api/v1/health"] {
        Mock::given(method("GET"))
            .and(path(endpoint))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"status":"ok"}"#))
            .mount(&server)
            .await;
    }
    server
}

fn settings(base_url: String) -> CheckSettings {
    CheckSettings {
        base_url: Some(base_url),
        ..CheckSettings::default()
    }
}

#[tokio::test]
async fn test_check_runner_all_healthy() {
    let server = healthy_server().await;
    let runner = HealthCheckRunner::new(
        Arc::new(healthy_host()),
        settings(server.uri()),
        "sparknode",
        ResourceSource::Remote,
    );

    let report = runner.run().await;

    // 5 containers, disk, memory, postgres, redis, 2 endpoints; no domain
    assert_eq!(report.results.len(), 11);
    assert_eq!(report.count(CheckStatus::Fail), 0);
    // 85% disk is above the warning threshold only
    let disk = report.results.iter().find(|r| r.name == "disk").unwrap();
    assert_eq!(disk.status, CheckStatus::Warn);
    assert_eq!(report.exit_code(), 0);
}

#[tokio::test]
async fn test_check_runner_reports_failures() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v1/health"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let host = healthy_host();
    host.respond("sparknode-celery", CommandOutput::ok("false\n"));
    host.respond("redis-cli ping", CommandOutput::failed(1, "Error: No such container"));
    host.respond(
        "openssl",
        CommandOutput::ok("notAfter=Jan  1 00:00:00 2020 GMT\n"),
    );

    let mut settings = settings(server.uri());
    settings.domain = Some("app.example.com".to_string());
    let runner = HealthCheckRunner::new(
        Arc::new(host),
        settings,
        "sparknode",
        ResourceSource::Remote,
    );

    let report = runner.run().await;
    let status = |name: &str| {
        report
            .results
            .iter()
            .find(|r| r.name == name)
            .map(|r| r.status)
            .unwrap()
    };

    assert_eq!(status("container sparknode-celery"), CheckStatus::Fail);
    assert_eq!(status("container sparknode-backend"), CheckStatus::Pass);
    assert_eq!(status("redis"), CheckStatus::Fail);
    assert_eq!(status("certificate app.example.com"), CheckStatus::Fail);
    assert_eq!(status("http /health"), CheckStatus::Pass);
    assert_eq!(status("http /api/v1/health"), CheckStatus::Fail);
    assert_eq!(report.exit_code(), 1);
}

#[tokio::test]
async fn test_endpoints_are_curled_on_the_host_without_base_url() {
    let host = healthy_host();
    host.respond("curl", CommandOutput::ok("{\"status\":\"ok\"}\n200\n"));
    host.respond("/api/v1/health", CommandOutput::ok("\n503\n"));
    let host = Arc::new(host);

    let runner = HealthCheckRunner::new(
        host.clone(),
        CheckSettings::default(),
        "sparknode",
        ResourceSource::Remote,
    );
    let report = runner.run().await;
    let status = |name: &str| {
        report
            .results
            .iter()
            .find(|r| r.name == name)
            .map(|r| r.status)
            .unwrap()
    };

    assert_eq!(status("http /health"), CheckStatus::Pass);
    assert_eq!(status("http /api/v1/health"), CheckStatus::Fail);
    assert!(host.ran("curl -s -m 5"));
    assert!(host.ran("http://localhost:8000/health"));
    assert!(host.ran("http://localhost:8000/api/v1/health"));
}
