use serde::{Deserialize, Serialize};

use crate::domain::Weights;

pub const STREAM_ROUTE: &str = "/api/stream";
pub const ROLLOUT_ROUTE: &str = "/api/rollout";
pub const STATE_ROUTE: &str = "/api/state";
pub const MESSAGE_ROUTE: &str = "/api/message";
pub const HEALTH_ROUTE: &str = "/healthz";

/// Sent on reconnect with the id of the last progress event received; the
/// stream resumes after that step.
pub const LAST_EVENT_ID_HEADER: &str = "last-event-id";

/// Message text recorded when an operator message arrives without one.
pub const DEFAULT_OPERATOR_MESSAGE: &str = "No message";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RolloutStarted {
    pub message: String,
    pub mode: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RolloutSnapshot {
    pub app: String,
    pub version: String,
    pub use_k8s: bool,
    pub weights: Weights,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OperatorMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl OperatorMessage {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
        }
    }

    pub fn text(&self) -> &str {
        self.message.as_deref().unwrap_or(DEFAULT_OPERATOR_MESSAGE)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MessageAck {
    pub status: String,
    pub message: String,
}

impl MessageAck {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            status: "ok".to_string(),
            message: message.into(),
        }
    }
}
