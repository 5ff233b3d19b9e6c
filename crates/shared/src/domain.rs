use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Step value that marks a finished rollout.
pub const COMPLETE_STEP: u32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Weights {
    pub stable: u32,
    pub canary: u32,
}

impl Weights {
    /// Split before any traffic has moved to the canary.
    pub const fn initial() -> Self {
        Self {
            stable: 100,
            canary: 0,
        }
    }

    /// Split published by the simulator at `step`; steps above 100 saturate.
    pub fn for_step(step: u32) -> Self {
        let canary = step.min(COMPLETE_STEP);
        Self {
            stable: COMPLETE_STEP - canary,
            canary,
        }
    }

    pub fn is_balanced(&self) -> bool {
        self.stable.checked_add(self.canary) == Some(COMPLETE_STEP)
    }

    pub fn label(&self) -> String {
        format!("Stable: {}% | Canary: {}%", self.stable, self.canary)
    }
}

impl Default for Weights {
    fn default() -> Self {
        Self::initial()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub step: u32,
    pub weights: Weights,
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed progress payload: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("progress step {step} is outside 0..=100")]
    StepOutOfRange { step: u32 },
}

impl ProgressEvent {
    pub fn new(step: u32, weights: Weights) -> Self {
        Self { step, weights }
    }

    /// Decodes one stream message payload.
    pub fn from_json(data: &str) -> Result<Self, DecodeError> {
        let event: ProgressEvent = serde_json::from_str(data)?;
        if event.step > COMPLETE_STEP {
            return Err(DecodeError::StepOutOfRange { step: event.step });
        }
        Ok(event)
    }

    pub fn is_complete(&self) -> bool {
        self.step == COMPLETE_STEP
    }
}
