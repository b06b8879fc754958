use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::ACCEPT;
use reqwest::Client;
use tracing::{debug, instrument};

use revu_core::errors::ConnectionError;
use revu_core::source::{EventSource, RuntimeEventStream};

use crate::sse::FrameStream;

const DEFAULT_BASE_URL: &str = "http://127.0.0.1:4096";
const DEFAULT_EVENT_PATH: &str = "/event";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Where and how to reach the agent runtime's event feed.
#[derive(Clone, Debug)]
pub struct RuntimeClientConfig {
    pub base_url: String,
    pub event_path: String,
    pub connect_timeout: Duration,
    /// End the feed if nothing arrives for this long. `None` waits forever.
    pub idle_timeout: Option<Duration>,
}

impl Default for RuntimeClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            event_path: DEFAULT_EVENT_PATH.to_string(),
            connect_timeout: CONNECT_TIMEOUT,
            idle_timeout: None,
        }
    }
}

impl RuntimeClientConfig {
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Default::default()
        }
    }

    /// Full URL of the event feed.
    pub fn event_url(&self) -> String {
        let base = self.base_url.trim_end_matches('/');
        if self.event_path.starts_with('/') {
            format!("{base}{}", self.event_path)
        } else {
            format!("{base}/{}", self.event_path)
        }
    }
}

/// HTTP connector for the runtime's server-push event feed.
pub struct RuntimeClient {
    client: Client,
    url: String,
    idle_timeout: Option<Duration>,
}

impl RuntimeClient {
    pub fn new(config: RuntimeClientConfig) -> Result<Self, ConnectionError> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|e| ConnectionError::Request(e.to_string()))?;

        Ok(Self {
            client,
            url: config.event_url(),
            idle_timeout: config.idle_timeout,
        })
    }

    pub fn event_url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl EventSource for RuntimeClient {
    fn name(&self) -> &str {
        "runtime"
    }

    #[instrument(skip(self), fields(url = %self.url))]
    async fn connect(&self) -> Result<RuntimeEventStream, ConnectionError> {
        let resp = self
            .client
            .get(&self.url)
            .header(ACCEPT, "text/event-stream")
            .send()
            .await
            .map_err(|e| ConnectionError::Request(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(ConnectionError::from_status(status, body));
        }

        debug!("event feed opened");
        let stream = FrameStream::new(resp.bytes_stream(), self.idle_timeout);
        Ok(Box::pin(stream))
    }
}
