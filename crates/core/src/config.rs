//! Debounce tunables

use crate::CoreError;
use std::time::Duration;

/// Timing and formatting parameters of the debouncer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebounceConfig {
    /// How long a burst must stay silent before it is dispatched (default: 3s)
    pub quiet_interval: Duration,
    /// Slack subtracted from the quiet interval when a watcher checks the
    /// marker, absorbing scheduling jitter and clock skew (default: 200ms)
    pub safety_margin: Duration,
    /// Joins fragments into the dispatched text (default: single space)
    pub separator: String,
}

impl Default for DebounceConfig {
    fn default() -> Self {
        Self {
            quiet_interval: Duration::from_secs(3),
            safety_margin: Duration::from_millis(200),
            separator: " ".to_string(),
        }
    }
}

impl DebounceConfig {
    pub const MIN_QUIET_INTERVAL: Duration = Duration::from_millis(50);

    pub fn new(quiet_interval: Duration, safety_margin: Duration) -> Result<Self, CoreError> {
        let config = Self {
            quiet_interval,
            safety_margin,
            ..Self::default()
        };
        config.validate()?;
        Ok(config)
    }

    pub fn with_separator(mut self, separator: impl Into<String>) -> Self {
        self.separator = separator.into();
        self
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        if self.quiet_interval < Self::MIN_QUIET_INTERVAL {
            return Err(CoreError::QuietIntervalTooShort {
                min_ms: Self::MIN_QUIET_INTERVAL.as_millis() as u64,
                got_ms: self.quiet_interval.as_millis() as u64,
            });
        }
        if self.safety_margin >= self.quiet_interval {
            return Err(CoreError::MarginTooLarge {
                margin_ms: self.safety_margin.as_millis() as u64,
                quiet_ms: self.quiet_interval.as_millis() as u64,
            });
        }
        Ok(())
    }

    /// Minimum silence a watcher must observe before claiming (`Q - ε`)
    pub fn settle_threshold(&self) -> Duration {
        self.quiet_interval.saturating_sub(self.safety_margin)
    }

    /// Whether a burst whose last arrival was at `last_arrival_ms` has settled
    ///
    /// A missing marker counts as settled. A marker ahead of `now_ms` (clock
    /// skew between writers) counts as fresh.
    pub fn is_settled(&self, last_arrival_ms: Option<u64>, now_ms: u64) -> bool {
        match last_arrival_ms {
            None => true,
            Some(last) => {
                u128::from(now_ms.saturating_sub(last)) >= self.settle_threshold().as_millis()
            }
        }
    }
}
