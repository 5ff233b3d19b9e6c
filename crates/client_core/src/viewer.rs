//! Rollout Progress Viewer.
//!
//! Binds the "start rollout" action to a live progress subscription and renders
//! every inbound [`ProgressEvent`] onto a [`RenderSurface`] the viewer owns
//! exclusively. Events are consumed one at a time; rendering of one event
//! finishes before the next is pulled from the stream.

use std::{sync::Arc, time::Duration};

use futures::StreamExt;
use shared::domain::ProgressEvent;
use tracing::{debug, error, info, warn};

use crate::{
    error::StreamError,
    retry::ReconnectPolicy,
    source::{ProgressSource, ProgressStream},
    surface::RenderSurface,
};

pub const STARTING_LINE: &str = "Starting canary rollout...";
pub const COMPLETE_LINE: &str = "✅ Rollout complete!";

pub fn step_line(step: u32) -> String {
    format!("→ Canary rollout: {step}%")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewerState {
    Idle,
    Streaming,
    Completed,
    Failed,
}

#[derive(Debug)]
pub enum ViewerOutcome {
    Completed { events: usize },
    Failed { events: usize, error: StreamError },
}

impl ViewerOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }

    pub fn events(&self) -> usize {
        match self {
            Self::Completed { events } | Self::Failed { events, .. } => *events,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ViewerConfig {
    pub reconnect: ReconnectPolicy,
    /// Treat a silent stream as dropped after this long.
    pub idle_timeout: Option<Duration>,
}

pub struct RolloutViewer<S: RenderSurface> {
    source: Arc<dyn ProgressSource>,
    surface: S,
    config: ViewerConfig,
    state: ViewerState,
    last_step: Option<u32>,
}

impl<S: RenderSurface> RolloutViewer<S> {
    pub fn new(source: Arc<dyn ProgressSource>, surface: S, config: ViewerConfig) -> Self {
        Self {
            source,
            surface,
            config,
            state: ViewerState::Idle,
            last_step: None,
        }
    }

    pub fn state(&self) -> ViewerState {
        self.state
    }

    pub fn surface(&self) -> &S {
        &self.surface
    }

    pub fn into_surface(self) -> S {
        self.surface
    }

    /// Starts a rollout view: logs the start, subscribes, and renders until the
    /// completion step or an unrecoverable error.
    pub async fn on_start_clicked(&mut self) -> ViewerOutcome {
        self.surface.append_log(STARTING_LINE);
        self.surface.scroll_log_to_bottom();
        self.state = ViewerState::Streaming;
        self.last_step = None;
        self.source.reset_position();

        let mut events = 0;
        let mut retries = 0;
        loop {
            let subscription = self.subscribe().await;
            let error = match subscription {
                Ok(stream) => match self.consume(stream, &mut events).await {
                    Ok(()) => {
                        self.state = ViewerState::Completed;
                        info!(events, "rollout complete");
                        return ViewerOutcome::Completed { events };
                    }
                    Err(error) => error,
                },
                Err(error) => error,
            };

            if error.is_retryable() {
                retries += 1;
                if let Some(backoff) = self.config.reconnect.delay_for(retries) {
                    let delay = self
                        .source
                        .reconnect_delay()
                        .map_or(backoff, |hint| hint.min(self.config.reconnect.max_delay));
                    warn!(
                        %error,
                        retry = retries,
                        max_retries = self.config.reconnect.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        "progress stream dropped; reconnecting"
                    );
                    self.surface.append_log(&format!(
                        "Connection lost ({error}); reconnecting ({retries}/{})...",
                        self.config.reconnect.max_retries
                    ));
                    self.surface.scroll_log_to_bottom();
                    tokio::time::sleep(delay).await;
                    continue;
                }
            }

            return self.fail(error, events);
        }
    }

    /// Opening the stream counts against the idle timeout too.
    async fn subscribe(&self) -> Result<ProgressStream, StreamError> {
        match self.config.idle_timeout {
            Some(limit) => tokio::time::timeout(limit, self.source.subscribe())
                .await
                .map_err(|_| StreamError::IdleTimeout(limit))?,
            None => self.source.subscribe().await,
        }
    }

    async fn consume(
        &mut self,
        mut stream: ProgressStream,
        events: &mut usize,
    ) -> Result<(), StreamError> {
        loop {
            let next = match self.config.idle_timeout {
                Some(limit) => tokio::time::timeout(limit, stream.next())
                    .await
                    .map_err(|_| StreamError::IdleTimeout(limit))?,
                None => stream.next().await,
            };

            match next {
                Some(Ok(event)) => {
                    *events += 1;
                    if self.render(&event) {
                        debug!("closing progress subscription");
                        drop(stream);
                        return Ok(());
                    }
                }
                Some(Err(error)) => return Err(error),
                None => return Err(StreamError::Closed),
            }
        }
    }

    /// Renders one event; returns `true` when it completes the rollout.
    fn render(&mut self, event: &ProgressEvent) -> bool {
        if let Some(last) = self.last_step {
            if event.step < last {
                warn!(step = event.step, last, "rollout step went backwards");
            }
        }
        if !event.weights.is_balanced() {
            debug!(
                stable = event.weights.stable,
                canary = event.weights.canary,
                "weights do not add up to 100"
            );
        }
        self.last_step = Some(event.step);
        info!(
            step = event.step,
            stable = event.weights.stable,
            canary = event.weights.canary,
            "rollout progress"
        );

        self.surface.set_progress(event.step);
        self.surface.set_weights_label(&event.weights.label());
        self.surface.append_log(&step_line(event.step));
        self.surface.scroll_log_to_bottom();

        if event.is_complete() {
            self.surface.append_log(COMPLETE_LINE);
            self.surface.scroll_log_to_bottom();
            return true;
        }
        false
    }

    fn fail(&mut self, error: StreamError, events: usize) -> ViewerOutcome {
        error!(%error, events, "rollout stream failed");
        self.state = ViewerState::Failed;
        let message = format!("Rollout stream failed: {error}");
        self.surface.show_error(&message);
        self.surface.append_log(&format!("✖ {message}"));
        self.surface.scroll_log_to_bottom();
        ViewerOutcome::Failed { events, error }
    }
}

#[cfg(test)]
#[path = "tests/viewer_tests.rs"]
mod tests;
