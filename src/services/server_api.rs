use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

use crate::config::HostingConfig;
use crate::models::status::{has_success_marker, ServerStatus};

const ENDPOINT_STATUS: &str = "status";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    #[error("request to {endpoint} failed: {source}")]
    Http {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleCommand {
    Start,
    Stop,
    Restart,
}

impl std::fmt::Display for LifecycleCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LifecycleCommand::Start => write!(f, "start"),
            LifecycleCommand::Stop => write!(f, "stop"),
            LifecycleCommand::Restart => write!(f, "restart"),
        }
    }
}

impl LifecycleCommand {
    pub fn endpoint(self) -> &'static str {
        match self {
            LifecycleCommand::Start => "start_async",
            LifecycleCommand::Stop => "stop_async",
            LifecycleCommand::Restart => "restart_async",
        }
    }
}

/// Client for the hosting provider's server API and its telemetry feed.
///
/// Commands are fire-and-forget: the provider acts on them out-of-band, so
/// callers watch the status snapshot to see the state actually change.
#[derive(Clone)]
pub struct ServerApi {
    client: Client,
    server_url: String,
    token: String,
    feed_url: String,
}

impl ServerApi {
    pub fn new(hosting: &HostingConfig) -> Self {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            client,
            server_url: format!(
                "{}/{}",
                hosting.api_url.trim_end_matches('/'),
                hosting.server_id
            ),
            token: hosting.api_token.clone(),
            feed_url: hosting.feed_url.clone(),
        }
    }

    async fn send_request(&self, endpoint: &str) -> Result<reqwest::Response, ServerError> {
        self.client
            .get(format!("{}/{}", self.server_url, endpoint))
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|source| ServerError::Http {
                endpoint: endpoint.to_string(),
                source,
            })
    }

    /// Sends one lifecycle command and returns the transport status code.
    async fn command(&self, command: LifecycleCommand) -> Result<u16, ServerError> {
        info!("Sending request to endpoint {}", command.endpoint());
        let resp = self.send_request(command.endpoint()).await?;
        Ok(resp.status().as_u16())
    }

    pub async fn start(&self) -> Result<u16, ServerError> {
        self.command(LifecycleCommand::Start).await
    }

    pub async fn stop(&self) -> Result<u16, ServerError> {
        self.command(LifecycleCommand::Stop).await
    }

    pub async fn restart(&self) -> Result<u16, ServerError> {
        self.command(LifecycleCommand::Restart).await
    }

    /// Fetches the status document and the telemetry feed and merges them.
    pub async fn fetch_status(&self) -> Result<ServerStatus, ServerError> {
        let doc: Value = self
            .send_request(ENDPOINT_STATUS)
            .await?
            .json()
            .await
            .map_err(|source| ServerError::Http {
                endpoint: ENDPOINT_STATUS.to_string(),
                source,
            })?;

        let doc = match doc {
            Value::Object(map) if has_success_marker(&map) => map,
            other => return Err(ServerError::InvalidResponse(abbreviate(&other))),
        };

        let feed_url = self.feed_url_for(&doc);
        debug!("Fetching telemetry feed {}", feed_url);
        let feed: Value = self
            .client
            .get(&feed_url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|source| ServerError::Http {
                endpoint: feed_url.clone(),
                source,
            })?
            .json()
            .await
            .map_err(|source| ServerError::Http {
                endpoint: feed_url.clone(),
                source,
            })?;

        let Value::Object(feed) = feed else {
            return Err(ServerError::InvalidResponse(format!(
                "telemetry feed is not an object: {}",
                abbreviate(&feed)
            )));
        };

        ServerStatus::from_documents(doc, feed)
            .map_err(|e| ServerError::InvalidResponse(e.to_string()))
    }

    fn feed_url_for(&self, doc: &Map<String, Value>) -> String {
        let text = |key: &str| match doc.get(key) {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            _ => String::new(),
        };
        self.feed_url
            .replace("{server_ip}", &text("ip"))
            .replace("{port}", &text("port"))
    }
}

fn abbreviate(value: &Value) -> String {
    let mut s = value.to_string();
    if s.len() > 200 {
        let mut cut = 200;
        while !s.is_char_boundary(cut) {
            cut -= 1;
        }
        s.truncate(cut);
        s.push_str("...");
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeHost;

    #[tokio::test]
    async fn commands_hit_their_endpoints_with_bearer_token() {
        let host = FakeHost::spawn().await;
        let api = ServerApi::new(&host.hosting_config());

        assert_eq!(api.stop().await.unwrap(), 200);
        assert_eq!(api.start().await.unwrap(), 200);
        assert_eq!(api.restart().await.unwrap(), 200);

        assert_eq!(
            host.calls(),
            vec!["stop_async", "start_async", "restart_async"]
        );
        assert!(host.saw_only_token(FakeHost::TOKEN));
    }

    #[tokio::test]
    async fn status_merges_feed_over_status_document() {
        let host = FakeHost::spawn().await;
        host.set_running(true);
        let api = ServerApi::new(&host.hosting_config());

        let status = api.fetch_status().await.unwrap();

        assert_eq!(status.running, Some(true));
        assert_eq!(status.hostname.as_deref(), Some("fake-host"));
        // "players" is 0 in the status document and 2 in the feed.
        assert_eq!(status.players, Some(2));
        assert_eq!(status.map.as_deref(), Some("Alien Planet"));
    }

    #[tokio::test]
    async fn feed_url_is_filled_from_status_document() {
        let host = FakeHost::spawn().await;
        let api = ServerApi::new(&host.hosting_config());

        api.fetch_status().await.unwrap();

        assert_eq!(host.feed_requests(), vec!["/feed/127.0.0.127016.feed"]);
    }

    #[tokio::test]
    async fn missing_result_marker_is_invalid_response() {
        let host = FakeHost::spawn().await;
        host.set_result(false);
        let api = ServerApi::new(&host.hosting_config());

        let err = api.fetch_status().await.unwrap_err();
        assert!(matches!(err, ServerError::InvalidResponse(_)));
    }

    #[tokio::test]
    async fn unreachable_host_is_http_error() {
        let api = ServerApi::new(&HostingConfig {
            api_url: "http://127.0.0.1:1/servers".into(),
            ..HostingConfig::default()
        });

        let err = api.start().await.unwrap_err();
        assert!(matches!(err, ServerError::Http { .. }));
    }
}
