//! Follow an attempt's frames over the relay WebSocket

use futures::{SinkExt, StreamExt};
use relay_models::{Outcome, RelayFrame};
use secrecy::{ExposeSecret, SecretString};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

use crate::errors::{DeployError, EXIT_FAILURE, EXIT_OK};
use crate::terminal::render::render_frame;

/// Options for `sparkdeploy watch`
#[derive(Debug, Clone)]
pub struct WatchOptions {
    /// Relay base URL, e.g. `http://127.0.0.1:8090`
    pub relay_url: String,

    /// Attempt to follow
    pub attempt_id: Uuid,

    /// Bearer token, sent when present
    pub api_token: Option<SecretString>,
}

/// Turn the relay's HTTP base URL into the attempt's log socket URL
pub fn build_logs_url(relay_url: &str, attempt_id: Uuid) -> Result<Url, DeployError> {
    let mut url = Url::parse(relay_url).map_err(|e| DeployError::ConfigError(e.to_string()))?;

    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(DeployError::ConfigError(format!(
                "Unsupported relay URL scheme: {}",
                other
            )))
        }
    };
    url.set_scheme(scheme)
        .map_err(|_| DeployError::ConfigError("Failed to set scheme".to_string()))?;

    url.set_path(&format!(
        "{}/ws/deployments/{}/logs",
        url.path().trim_end_matches('/'),
        attempt_id
    ));
    Ok(url)
}

/// Exit code matching the attempt's final outcome
pub fn outcome_exit_code(outcome: Outcome) -> i32 {
    match outcome {
        Outcome::Success => EXIT_OK,
        Outcome::Failed | Outcome::Aborted => EXIT_FAILURE,
    }
}

/// Print every frame until the attempt finishes. Returns the exit code the
/// attempt itself would have produced.
pub async fn watch(options: WatchOptions) -> Result<i32, DeployError> {
    let url = build_logs_url(&options.relay_url, options.attempt_id)?;
    info!("Connecting to relay: {}", url);

    let mut request = url
        .as_str()
        .into_client_request()
        .map_err(|e| DeployError::RelayError(e.to_string()))?;
    if let Some(token) = &options.api_token {
        let value = format!("Bearer {}", token.expose_secret())
            .parse()
            .map_err(|_| DeployError::ConfigError("Invalid API token".to_string()))?;
        request
            .headers_mut()
            .insert(http::header::AUTHORIZATION, value);
    }

    let (mut ws_stream, _) = connect_async(request)
        .await
        .map_err(|e| DeployError::RelayError(format!("Failed to connect to relay: {}", e)))?;

    while let Some(message) = ws_stream.next().await {
        let message = message.map_err(|e| DeployError::RelayError(e.to_string()))?;
        match message {
            Message::Text(text) => {
                let frame: RelayFrame = match serde_json::from_str(text.as_str()) {
                    Ok(frame) => frame,
                    Err(e) => {
                        warn!("Ignoring malformed frame: {}", e);
                        continue;
                    }
                };
                println!("{}", render_frame(&frame));
                if let RelayFrame::Finished { outcome, .. } = frame {
                    let _ = ws_stream.close(None).await;
                    return Ok(outcome_exit_code(outcome));
                }
            }
            Message::Ping(payload) => {
                let _ = ws_stream.send(Message::Pong(payload)).await;
            }
            Message::Close(_) => {
                debug!("Relay closed the log stream");
                break;
            }
            _ => {}
        }
    }

    Err(DeployError::RelayError(format!(
        "log stream for {} ended before the attempt finished",
        options.attempt_id
    )))
}
