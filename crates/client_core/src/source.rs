//! Progress subscriptions: a lazy stream of [`ProgressEvent`]s that ends after
//! the completion event or the first error.

use std::{
    collections::VecDeque,
    pin::Pin,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use async_trait::async_trait;
use futures::{
    stream::{self, BoxStream},
    Stream, StreamExt,
};
use reqwest::{header::ACCEPT, Client};
use shared::{domain::ProgressEvent, protocol::LAST_EVENT_ID_HEADER};
use tracing::{debug, info};
use url::Url;

use crate::{
    error::StreamError,
    sse::{SseDecoder, SseMessage},
};

pub type ProgressStream = BoxStream<'static, Result<ProgressEvent, StreamError>>;

#[async_trait]
pub trait ProgressSource: Send + Sync {
    /// Opens one subscription. Dropping the returned stream closes it.
    async fn subscribe(&self) -> Result<ProgressStream, StreamError>;

    /// Reconnection delay the stream asked for, if any.
    fn reconnect_delay(&self) -> Option<Duration> {
        None
    }

    /// Forgets where earlier subscriptions left off.
    fn reset_position(&self) {}
}

/// Resume point shared between a source and the streams it hands out: the last
/// event id and the `retry` hint survive a dropped connection.
#[derive(Debug, Clone, Default)]
pub struct StreamPosition(Arc<Mutex<PositionState>>);

#[derive(Debug, Default)]
struct PositionState {
    last_event_id: Option<String>,
    reconnect_delay: Option<Duration>,
}

impl StreamPosition {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_event_id(&self) -> Option<String> {
        self.lock().last_event_id.clone()
    }

    pub fn reconnect_delay(&self) -> Option<Duration> {
        self.lock().reconnect_delay
    }

    pub fn reset(&self) {
        *self.lock() = PositionState::default();
    }

    fn record(&self, decoder: &SseDecoder) {
        let mut state = self.lock();
        if let Some(id) = decoder.last_event_id() {
            state.last_event_id = Some(id.to_string());
        }
        if let Some(delay) = decoder.reconnect_delay() {
            state.reconnect_delay = Some(delay);
        }
    }

    fn lock(&self) -> MutexGuard<'_, PositionState> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

pub struct MissingProgressSource;

#[async_trait]
impl ProgressSource for MissingProgressSource {
    async fn subscribe(&self) -> Result<ProgressStream, StreamError> {
        Err(StreamError::Unavailable(
            "no progress stream configured".to_string(),
        ))
    }
}

#[derive(Debug, Clone)]
pub struct HttpProgressSource {
    http: Client,
    url: Url,
    position: StreamPosition,
}

impl HttpProgressSource {
    pub fn new(http: Client, url: Url) -> Self {
        Self {
            http,
            url,
            position: StreamPosition::new(),
        }
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

#[async_trait]
impl ProgressSource for HttpProgressSource {
    async fn subscribe(&self) -> Result<ProgressStream, StreamError> {
        let mut request = self
            .http
            .get(self.url().clone())
            .header(ACCEPT, "text/event-stream");
        if let Some(last_event_id) = self.position.last_event_id() {
            debug!(%last_event_id, "resuming progress stream");
            request = request.header(LAST_EVENT_ID_HEADER, last_event_id);
        }
        let response = request
            .send()
            .await
            .map_err(|source| StreamError::Connect {
                url: self.url.to_string(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(StreamError::Status {
                url: self.url.to_string(),
                status: status.as_u16(),
            });
        }

        info!(url = %self.url, "progress stream opened");
        Ok(progress_events_with_position(response.bytes_stream(), self.position.clone()).boxed())
    }

    fn reconnect_delay(&self) -> Option<Duration> {
        self.position.reconnect_delay()
    }

    fn reset_position(&self) {
        self.position.reset();
    }
}

struct DecodeState<S> {
    bytes: Pin<Box<S>>,
    decoder: SseDecoder,
    ready: VecDeque<SseMessage>,
    position: StreamPosition,
    finished: bool,
}

/// Turns raw `text/event-stream` bytes into progress events.
///
/// Messages with an explicit event type other than `message` are skipped. A
/// body that ends before the completion step yields [`StreamError::Closed`].
pub fn progress_events<S, B, E>(
    bytes: S,
) -> impl Stream<Item = Result<ProgressEvent, StreamError>> + Send + 'static
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send,
    E: Into<StreamError> + Send,
{
    progress_events_with_position(bytes, StreamPosition::new())
}

/// Like [`progress_events`], recording event ids and `retry` hints into `position`.
pub fn progress_events_with_position<S, B, E>(
    bytes: S,
    position: StreamPosition,
) -> impl Stream<Item = Result<ProgressEvent, StreamError>> + Send + 'static
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send,
    E: Into<StreamError> + Send,
{
    let state = DecodeState {
        bytes: Box::pin(bytes),
        decoder: SseDecoder::new(),
        ready: VecDeque::new(),
        position,
        finished: false,
    };

    stream::unfold(state, |mut state| async move {
        if state.finished {
            return None;
        }
        loop {
            if let Some(message) = state.ready.pop_front() {
                if message.event_type() != "message" {
                    debug!(event = message.event_type(), "skipping non-progress event");
                    continue;
                }
                let item = match ProgressEvent::from_json(&message.data) {
                    Ok(event) => {
                        state.finished = event.is_complete();
                        Ok(event)
                    }
                    Err(source) => {
                        state.finished = true;
                        Err(StreamError::Decode {
                            data: message.data,
                            source,
                        })
                    }
                };
                return Some((item, state));
            }

            match state.bytes.next().await {
                Some(Ok(chunk)) => match state.decoder.feed(chunk.as_ref()) {
                    Ok(messages) => {
                        state.position.record(&state.decoder);
                        state.ready.extend(messages);
                    }
                    Err(too_large) => {
                        state.finished = true;
                        return Some((Err(too_large.into()), state));
                    }
                },
                Some(Err(err)) => {
                    state.finished = true;
                    return Some((Err(err.into()), state));
                }
                None => {
                    state.finished = true;
                    return Some((Err(StreamError::Closed), state));
                }
            }
        }
    })
}

#[cfg(test)]
#[path = "tests/source_tests.rs"]
mod tests;
