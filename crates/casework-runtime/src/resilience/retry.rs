//! Retry policy for model calls.

use backon::ExponentialBuilder;
use std::time::Duration;

use crate::config::ModelConfig;
use crate::providers::ProviderError;

/// Exponential backoff with jitter between attempts against one model.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Extra attempts after the first one
    pub retries: u32,
    pub min_delay: Duration,
    pub max_delay: Duration,
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: 3,
            min_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
            jitter: true,
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &ModelConfig) -> Self {
        Self {
            retries: config.retry_attempts,
            min_delay: config.backoff_min,
            max_delay: config.backoff_max,
            jitter: true,
        }
    }

    /// Single attempt, no waiting.
    pub fn none() -> Self {
        Self {
            retries: 0,
            ..Self::default()
        }
    }

    /// backon adds up to `min_delay` of jitter after capping, so the cap
    /// handed to it leaves that much headroom below `max_delay`.
    pub fn backoff(&self) -> ExponentialBuilder {
        let cap = if self.jitter {
            self.max_delay.saturating_sub(self.min_delay).max(self.min_delay)
        } else {
            self.max_delay
        };
        let builder = ExponentialBuilder::default()
            .with_min_delay(self.min_delay)
            .with_max_delay(cap)
            .with_max_times(self.retries as usize);

        if self.jitter {
            builder.with_jitter()
        } else {
            builder
        }
    }

    /// Delay before the next attempt. A provider `Retry-After` stretches the
    /// planned delay; the result never exceeds `max_delay`. `None` means stop.
    pub fn adjust_delay(&self, err: &ProviderError, planned: Option<Duration>) -> Option<Duration> {
        planned.map(|delay| {
            let delay = match err.retry_after() {
                Some(hint) => delay.max(hint),
                None => delay,
            };
            delay.min(self.max_delay)
        })
    }
}
