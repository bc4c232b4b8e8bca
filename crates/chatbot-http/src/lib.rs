mod sessions;
mod stream;

use std::sync::Arc;
use std::time::Duration;

use chatbot_api::{
    BackendConfig, ChatBackend, ChatRequest, ChatResponse, Error, EventStream, Result,
};
use serde::Serialize;
use serde::de::DeserializeOwned;
use url::Url;

pub const DEFAULT_BASE_URL: &str = "http://localhost:8000/api";
pub const DEFAULT_USER_ID: &str = "default";

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Configuration for [`HttpClient`].
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Root of the API routes, e.g. `http://localhost:8000/api`.
    pub base_url: String,
    /// Owner used when creating and listing sessions.
    pub user_id: String,
    /// Limit on establishing a connection. Streams themselves never time out.
    pub connect_timeout: Option<Duration>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.into(),
            user_id: DEFAULT_USER_ID.into(),
            connect_timeout: Some(Duration::from_secs(10)),
        }
    }
}

/// Client for the agent service's HTTP API.
///
/// Cheap to clone; clones share one connection pool.
#[derive(Clone)]
pub struct HttpClient {
    state: Arc<ClientState>,
}

impl HttpClient {
    pub fn new(config: ClientConfig) -> Result<Self> {
        let mut base_url =
            Url::parse(&config.base_url).map_err(|e| Error::Url(format!("{}: {e}", config.base_url)))?;
        if base_url.cannot_be_a_base() {
            return Err(Error::Url(config.base_url));
        }
        // Keep a trailing slash off so segment pushes land under the base path.
        if base_url.path().ends_with('/') && base_url.path() != "/" {
            let trimmed = base_url.path().trim_end_matches('/').to_string();
            base_url.set_path(&trimmed);
        }

        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = config.connect_timeout {
            builder = builder.connect_timeout(timeout);
        }
        let client = builder.build().map_err(Error::http)?;

        Ok(Self {
            state: Arc::new(ClientState {
                client,
                base_url,
                user_id: config.user_id,
            }),
        })
    }

    /// Create a client reading `CHATBOT_BASE_URL` and `CHATBOT_USER_ID` from
    /// the environment, falling back to the defaults.
    pub fn from_env() -> Result<Self> {
        let defaults = ClientConfig::default();
        Self::new(ClientConfig {
            base_url: std::env::var("CHATBOT_BASE_URL").unwrap_or(defaults.base_url),
            user_id: std::env::var("CHATBOT_USER_ID").unwrap_or(defaults.user_id),
            ..defaults
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.state.base_url
    }

    pub fn user_id(&self) -> &str {
        &self.state.user_id
    }

    /// `GET /config`: the backend's public model and tool settings.
    pub async fn config(&self) -> Result<BackendConfig> {
        self.state.get_json(self.state.endpoint(&["config"])?).await
    }

    /// `GET /health` on the server root. Any non-2xx status reads as unhealthy.
    pub async fn health(&self) -> Result<bool> {
        let url = self
            .state
            .base_url
            .join("/health")
            .map_err(|e| Error::Url(e.to_string()))?;
        let resp = self.state.client.get(url).send().await.map_err(Error::http)?;
        Ok(resp.status().is_success())
    }
}

#[async_trait::async_trait]
impl ChatBackend for HttpClient {
    fn stream_chat(&self, request: ChatRequest) -> EventStream {
        EventStream::new(stream::open(Arc::clone(&self.state), request))
    }

    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse> {
        let url = self.state.endpoint(&["chat"])?;
        tracing::debug!(session_id = %request.session_id, "sending chat request");
        self.state.post_json(url, &request).await
    }
}

// ---------------------------------------------------------------------------
// Internals
// ---------------------------------------------------------------------------

struct ClientState {
    client: reqwest::Client,
    base_url: Url,
    user_id: String,
}

impl ClientState {
    /// Append path segments (percent-encoded) to the base URL.
    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| Error::Url(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T> {
        let resp = self.client.get(url).send().await.map_err(Error::http)?;
        read_json(resp).await
    }

    async fn post_json<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        url: Url,
        body: &B,
    ) -> Result<T> {
        let resp = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(Error::http)?;
        read_json(resp).await
    }

    async fn delete(&self, url: Url) -> Result<reqwest::Response> {
        let resp = self.client.delete(url).send().await.map_err(Error::http)?;
        check_status(resp).await
    }
}

/// Turn a non-2xx response into [`Error::Api`] carrying the body text.
pub(crate) async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let message = resp.text().await.unwrap_or_default();
    tracing::error!(status = status.as_u16(), %message, "backend request failed");
    Err(Error::Api {
        status: status.as_u16(),
        message,
    })
}

async fn read_json<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T> {
    let bytes = check_status(resp)
        .await?
        .bytes()
        .await
        .map_err(Error::http)?;
    Ok(serde_json::from_slice(&bytes)?)
}
