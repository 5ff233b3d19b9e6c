use std::time::Duration;

use shared::domain::DecodeError;
use thiserror::Error;

use crate::sse::MessageTooLarge;

#[derive(Debug, Error)]
pub enum StreamError {
    #[error("failed to connect to progress stream {url}: {source}")]
    Connect {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("progress stream {url} returned status {status}")]
    Status { url: String, status: u16 },
    #[error("progress stream transport failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("progress stream closed before the rollout completed")]
    Closed,
    #[error("no progress event received within {0:?}")]
    IdleTimeout(Duration),
    #[error("invalid progress event {data:?}: {source}")]
    Decode {
        data: String,
        #[source]
        source: DecodeError,
    },
    #[error("progress stream sent an oversized message: {0}")]
    Oversized(#[from] MessageTooLarge),
    #[error("progress source unavailable: {0}")]
    Unavailable(String),
}

impl StreamError {
    /// Whether a fresh subscription may succeed where this one failed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Connect { .. } | Self::Transport(_) | Self::Closed | Self::IdleTimeout(_) => true,
            Self::Status { status, .. } => *status >= 500,
            Self::Decode { .. } | Self::Oversized(_) | Self::Unavailable(_) => false,
        }
    }
}
