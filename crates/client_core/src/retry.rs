use std::time::Duration;

/// Bounded exponential backoff for re-opening a dropped progress subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(5),
            multiplier: 2,
        }
    }
}

impl ReconnectPolicy {
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Delay before the 1-based `retry`, or `None` once the budget is spent.
    pub fn delay_for(&self, retry: u32) -> Option<Duration> {
        if retry == 0 || retry > self.max_retries {
            return None;
        }
        let factor = self.multiplier.max(1).saturating_pow(retry - 1);
        Some(self.initial_delay.saturating_mul(factor).min(self.max_delay))
    }
}

#[cfg(test)]
#[path = "tests/retry_tests.rs"]
mod tests;
