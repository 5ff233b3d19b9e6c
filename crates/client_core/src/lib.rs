use anyhow::{anyhow, Context, Result};
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use shared::{
    error::{ApiError, ApiException},
    protocol::{
        MessageAck, OperatorMessage, RolloutSnapshot, RolloutStarted, MESSAGE_ROUTE, ROLLOUT_ROUTE,
        STATE_ROUTE, STREAM_ROUTE,
    },
};
use tracing::info;
use url::Url;

pub mod error;
pub mod retry;
pub mod source;
pub mod sse;
pub mod surface;
pub mod viewer;

pub use error::StreamError;
pub use retry::ReconnectPolicy;
pub use source::{
    HttpProgressSource, MissingProgressSource, ProgressSource, ProgressStream, StreamPosition,
};
pub use surface::{MemorySurface, RenderSurface};
pub use viewer::{RolloutViewer, ViewerConfig, ViewerOutcome, ViewerState};

/// HTTP client for the rollout service.
#[derive(Debug, Clone)]
pub struct RolloutClient {
    http: Client,
    base_url: Url,
}

impl RolloutClient {
    pub fn new(server_url: &str) -> Result<Self> {
        let base_url = Url::parse(server_url)
            .with_context(|| format!("invalid server url: {server_url}"))?;
        if !matches!(base_url.scheme(), "http" | "https") {
            return Err(anyhow!("server_url must start with http:// or https://"));
        }
        Ok(Self {
            http: Client::new(),
            base_url,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, route: &str) -> Result<Url> {
        self.base_url
            .join(route)
            .with_context(|| format!("failed to build url for {route}"))
    }

    /// Source for the fixed progress stream endpoint.
    pub fn progress_source(&self) -> Result<HttpProgressSource> {
        Ok(HttpProgressSource::new(
            self.http.clone(),
            self.endpoint(STREAM_ROUTE)?,
        ))
    }

    pub async fn start_rollout(&self) -> Result<RolloutStarted> {
        let res = self
            .http
            .post(self.endpoint(ROLLOUT_ROUTE)?)
            .send()
            .await
            .context("failed to request rollout start")?;
        let started: RolloutStarted = decode_response(res).await?;
        info!(mode = %started.mode, "rollout start acknowledged");
        Ok(started)
    }

    pub async fn fetch_state(&self) -> Result<RolloutSnapshot> {
        let res = self
            .http
            .get(self.endpoint(STATE_ROUTE)?)
            .send()
            .await
            .context("failed to fetch rollout state")?;
        decode_response(res).await
    }

    pub async fn send_message(&self, text: &str) -> Result<MessageAck> {
        let res = self
            .http
            .post(self.endpoint(MESSAGE_ROUTE)?)
            .json(&OperatorMessage::new(text))
            .send()
            .await
            .context("failed to send operator message")?;
        decode_response(res).await
    }
}

async fn decode_response<T: DeserializeOwned>(res: Response) -> Result<T> {
    let status = res.status();
    if status.is_success() {
        return res
            .json()
            .await
            .with_context(|| format!("invalid response body (status {status})"));
    }

    let body = res.text().await.unwrap_or_default();
    match serde_json::from_str::<ApiError>(&body) {
        Ok(api_error) => Err(anyhow::Error::new(ApiException::from(api_error))
            .context(format!("server rejected request with status {status}"))),
        Err(_) => Err(anyhow!("server returned status {status}: {body}")),
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
