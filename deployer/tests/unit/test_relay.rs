//! Relay API tests driven through the router

mod common;

use std::sync::Arc;
use std::time::Duration;

use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::Router;
use relay_models::{
    DeploymentListResponse, DeploymentSummary, ErrorResponse, HealthResponse, Outcome,
    RelayFrame, StartResponse,
};
use secrecy::SecretString;
use serde::de::DeserializeOwned;
use serde_json::json;
use tower::ServiceExt;
use uuid::Uuid;

use common::{FakeHost, ENV_FILE};
use sparkdeploy::app::options::{Connector, ServerOptions};
use sparkdeploy::remote::{CommandOutput, RemoteExecutor};
use sparkdeploy::server::serve::router;
use sparkdeploy::server::state::ServerState;
use sparkdeploy::storage::settings::Settings;

const TOKEN: &str = "relay-test-token";

struct Relay {
    app: Router,
    state: Arc<ServerState>,
    host: Arc<FakeHost>,
}

impl Relay {
    fn new() -> Self {
        let host = Arc::new(FakeHost::new("APP_VERSION=1.2.2\nDOCKERHUB_ORG=acme\n"));
        host.respond("curl", CommandOutput::ok("{\"status\":\"ok\"}\n200\n"));
        let shared = host.clone();
        let connector: Connector =
            Arc::new(move |_| shared.clone() as Arc<dyn RemoteExecutor>);

        let options = ServerOptions {
            api_token: Some(SecretString::from(TOKEN)),
            ..ServerOptions::default()
        };
        let state = Arc::new(ServerState::new(
            Arc::new(Settings::default()),
            options,
            connector,
        ));
        Self {
            app: router(state.clone()),
            state,
            host,
        }
    }

    async fn send(&self, request: Request<Body>) -> (StatusCode, Vec<u8>) {
        let response = self.app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, body.to_vec())
    }

    async fn get(&self, uri: &str) -> (StatusCode, Vec<u8>) {
        self.send(Request::get(uri).body(Body::empty()).unwrap())
            .await
    }

    async fn post(
        &self,
        uri: &str,
        token: Option<&str>,
        body: serde_json::Value,
    ) -> (StatusCode, Vec<u8>) {
        let mut request = Request::post(uri).header(header::CONTENT_TYPE, "application/json");
        if let Some(token) = token {
            request = request.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        self.send(request.body(Body::from(body.to_string())).unwrap())
            .await
    }

    /// Poll the attempt until it reports an outcome
    async fn wait_finished(&self, id: Uuid) -> DeploymentSummary {
        for _ in 0..500 {
            let (status, body) = self.get(&format!("/deployments/{}", id)).await;
            assert_eq!(status, StatusCode::OK);
            let summary: DeploymentSummary = parse(&body);
            if summary.outcome.is_some() {
                return summary;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("attempt {} never finished", id);
    }
}

fn parse<T: DeserializeOwned>(body: &[u8]) -> T {
    serde_json::from_slice(body).unwrap()
}

#[tokio::test]
async fn test_health_and_version_are_open() {
    let relay = Relay::new();

    let (status, body) = relay.get("/health").await;
    assert_eq!(status, StatusCode::OK);
    let health: HealthResponse = parse(&body);
    assert_eq!(health.status, "healthy");
    assert_eq!(health.service, "sparkdeploy");

    let (status, _) = relay.get("/version").await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_empty_list() {
    let relay = Relay::new();

    let (status, body) = relay.get("/deployments").await;
    assert_eq!(status, StatusCode::OK);
    let list: DeploymentListResponse = parse(&body);
    assert_eq!(list.total, 0);
    assert!(list.deployments.is_empty());
}

#[tokio::test]
async fn test_starts_require_bearer_token() {
    let relay = Relay::new();
    let body = json!({"host": "203.0.113.10", "version": "1.2.3"});

    let (status, body_bytes) = relay.post("/deployments", None, body.clone()).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let error: ErrorResponse = parse(&body_bytes);
    assert!(error.error.contains("bearer"));

    let (status, _) = relay.post("/deployments", Some("wrong"), body.clone()).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = relay.post("/rollbacks", None, json!({"host": "203.0.113.10", "confirm": true})).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    // Nothing was started
    assert!(relay.state.registry.list().await.is_empty());
    assert!(relay.host.commands().is_empty());
}

#[tokio::test]
async fn test_rejects_invalid_requests_before_starting() {
    let relay = Relay::new();

    let (status, body) = relay
        .post(
            "/deployments",
            Some(TOKEN),
            json!({"host": "203.0.113.10", "version": "1.2.3; rm -rf /"}),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let error: ErrorResponse = parse(&body);
    assert!(!error.error.is_empty());

    let (status, _) = relay
        .post(
            "/deployments",
            Some(TOKEN),
            json!({"host": "203.0.113.10", "version": "1.2.3", "provider": "openstack"}),
        )
        .await;
    assert!(status.is_client_error());

    // Rollbacks must be confirmed explicitly
    let (status, body) = relay
        .post("/rollbacks", Some(TOKEN), json!({"host": "203.0.113.10"}))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let error: ErrorResponse = parse(&body);
    assert!(error.error.contains("confirm"));

    assert!(relay.state.registry.list().await.is_empty());
    assert!(relay.host.commands().is_empty());
}

#[tokio::test]
async fn test_unknown_attempt_is_not_found() {
    let relay = Relay::new();
    let id = Uuid::new_v4();

    let (status, _) = relay.get(&format!("/deployments/{}", id)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = relay
        .post(&format!("/deployments/{}/cancel", id), Some(TOKEN), json!({}))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = relay.get(&format!("/ws/deployments/{}/logs", id)).await;
    assert_ne!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_deploy_through_relay() {
    let relay = Relay::new();

    let (status, body) = relay
        .post(
            "/deployments",
            Some(TOKEN),
            json!({"host": "203.0.113.10", "version": "1.2.3", "org": "acme"}),
        )
        .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let started: StartResponse = parse(&body);
    assert_eq!(
        started.logs_url,
        format!("/ws/deployments/{}/logs", started.id)
    );

    let summary = relay.wait_finished(started.id).await;
    assert_eq!(summary.outcome, Some(Outcome::Success), "{:?}", summary.error);
    assert_eq!(summary.version.as_deref(), Some("1.2.3"));
    assert_eq!(summary.host, "203.0.113.10");
    assert!(summary.finished_at.is_some());

    let env = relay.host.file(ENV_FILE).unwrap();
    assert!(env.contains("APP_VERSION=1.2.3"));

    // Late subscribers get the whole run, ending in the final frame
    let entry = relay.state.registry.get(started.id).await.unwrap();
    let (history, _) = entry.bus().subscribe();
    assert!(history.iter().any(|f| matches!(f, RelayFrame::Log { .. })));
    assert!(matches!(
        history.last(),
        Some(RelayFrame::Finished {
            outcome: Outcome::Success,
            ..
        })
    ));

    let (_, body) = relay.get("/deployments").await;
    let list: DeploymentListResponse = parse(&body);
    assert_eq!(list.total, 1);
    assert_eq!(list.deployments[0].id, started.id);

    // A finished attempt can no longer be cancelled
    let (status, _) = relay
        .post(
            &format!("/deployments/{}/cancel", started.id),
            Some(TOKEN),
            json!({}),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
}
