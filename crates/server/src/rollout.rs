use std::{sync::Arc, time::Duration};

use futures::{stream, Stream, StreamExt};
use shared::domain::{ProgressEvent, Weights};
use tokio::sync::RwLock;
use tokio_stream::wrappers::IntervalStream;
use tracing::info;

/// Simulated canary rollout.
///
/// Every subscriber gets its own walk through `steps`; all of them write the
/// split they publish into one shared "current weights" cell that the state
/// endpoint reports.
#[derive(Clone)]
pub struct RolloutSimulator {
    steps: Arc<[u32]>,
    step_interval: Duration,
    current: Arc<RwLock<Weights>>,
}

impl RolloutSimulator {
    pub fn new(steps: Vec<u32>, step_interval: Duration) -> Self {
        Self {
            steps: steps.into(),
            step_interval,
            current: Arc::new(RwLock::new(Weights::initial())),
        }
    }

    pub fn steps(&self) -> &[u32] {
        &self.steps
    }

    pub async fn current_weights(&self) -> Weights {
        *self.current.read().await
    }

    /// First event is immediate, the rest follow one `step_interval` apart.
    /// The stream does nothing until polled.
    pub fn progress_stream(&self) -> impl Stream<Item = ProgressEvent> + Send + 'static {
        self.progress_stream_after(None)
    }

    /// Like [`Self::progress_stream`], skipping steps up to and including
    /// `resume_after`.
    pub fn progress_stream_after(
        &self,
        resume_after: Option<u32>,
    ) -> impl Stream<Item = ProgressEvent> + Send + 'static {
        let current = Arc::clone(&self.current);
        let steps: Vec<u32> = self
            .steps
            .iter()
            .copied()
            .filter(|step| resume_after.map_or(true, |last| *step > last))
            .collect();
        let period = self.step_interval;

        stream::once(async move { IntervalStream::new(tokio::time::interval(period)) })
            .flatten()
            .zip(stream::iter(steps))
            .then(move |(_, step)| {
                let current = Arc::clone(&current);
                async move {
                    let weights = Weights::for_step(step);
                    *current.write().await = weights;
                    info!(step, stable = weights.stable, canary = weights.canary, "rollout step");
                    ProgressEvent::new(step, weights)
                }
            })
    }
}

#[cfg(test)]
#[path = "tests/rollout_tests.rs"]
mod tests;
