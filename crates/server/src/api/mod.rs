use shared::{
    error::{ApiError, ErrorCode},
    protocol::{MessageAck, OperatorMessage, RolloutSnapshot, RolloutStarted},
};
use tracing::info;

use crate::rollout::RolloutSimulator;

pub const MAX_MESSAGE_BYTES: usize = 4096;

#[derive(Clone)]
pub struct ApiContext {
    pub app_name: String,
    pub app_version: String,
    pub use_k8s: bool,
    pub rollout: RolloutSimulator,
}

/// Acknowledges a rollout request. Progress itself is driven by stream subscribers.
pub fn start_rollout(ctx: &ApiContext) -> RolloutStarted {
    info!(app = %ctx.app_name, "rollout requested");
    RolloutStarted {
        message: "Rollout started".to_string(),
        mode: "simulation".to_string(),
    }
}

pub async fn rollout_snapshot(ctx: &ApiContext) -> RolloutSnapshot {
    RolloutSnapshot {
        app: ctx.app_name.clone(),
        version: ctx.app_version.clone(),
        use_k8s: ctx.use_k8s,
        weights: ctx.rollout.current_weights().await,
    }
}

pub fn record_message(ctx: &ApiContext, request: &OperatorMessage) -> Result<MessageAck, ApiError> {
    let text = request.text();
    if text.len() > MAX_MESSAGE_BYTES {
        return Err(ApiError::new(
            ErrorCode::Validation,
            format!("message exceeds {MAX_MESSAGE_BYTES} bytes"),
        ));
    }
    info!(app = %ctx.app_name, message = %text, "operator message");
    Ok(MessageAck::ok(text))
}

#[cfg(test)]
#[path = "tests/mod_tests.rs"]
mod tests;
