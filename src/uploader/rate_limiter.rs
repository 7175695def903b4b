//! Request pacing
//!
//! Each RPC stream is paced by its own limiter; the server's flow control
//! only shows up as stream backpressure on blob uploads, so client-side
//! pacing is the sole defense for the point-write RPCs.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::clock::Clock;

/// Token-paced gate for a single request stream.
///
/// `tick()` blocks the caller until at least the configured interval has
/// elapsed since the previous `tick()` returned. Single-producer; wrap in a
/// mutex to share across senders.
#[derive(Debug)]
pub struct RateLimiter {
    min_interval: Duration,
    clock: Arc<dyn Clock>,
    last: Option<DateTime<Utc>>,
}

impl RateLimiter {
    /// Create a limiter enforcing `min_interval` between ticks.
    #[must_use]
    pub fn new(min_interval: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            min_interval,
            clock,
            last: None,
        }
    }

    /// Block until the next slot opens, then claim it.
    pub fn tick(&mut self) {
        if let Some(last) = self.last {
            let elapsed = (self.clock.now() - last)
                .to_std()
                .unwrap_or(Duration::ZERO);
            if elapsed < self.min_interval {
                self.clock.sleep(self.min_interval - elapsed);
            }
        }
        self.last = Some(self.clock.now());
    }
}
