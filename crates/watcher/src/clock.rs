//! Wall clock driven by tokio's timer

use settle_core::{Clock, SystemClock};
use tokio::time::Instant;

/// Wall clock that advances with tokio time
///
/// Anchored to the system clock when created, then advanced by tokio's
/// `Instant`, so it follows a paused test runtime.
#[derive(Debug, Clone)]
pub struct TokioClock {
    origin: Instant,
    origin_ms: u64,
}

impl TokioClock {
    pub fn new() -> Self {
        Self::starting_at(SystemClock.now_ms())
    }

    pub fn starting_at(origin_ms: u64) -> Self {
        Self {
            origin: Instant::now(),
            origin_ms,
        }
    }
}

impl Default for TokioClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for TokioClock {
    fn now_ms(&self) -> u64 {
        self.origin_ms + self.origin.elapsed().as_millis() as u64
    }
}
