//! Token-bucket admission for control-loop work items.
use std::{sync::Arc, time::Instant};

use crate::clock::Clock;

/// Token bucket with continuous accrual. Advisory: `check()` never blocks,
/// callers break out of a work cycle once the bucket runs dry.
pub struct RateLimiter {
    clock: Arc<dyn Clock>,
    /// Tokens added per second.
    rate: f64,
    /// Bucket capacity; also the initial fill.
    burst: f64,
    tokens: f64,
    last: Instant,
}

impl RateLimiter {
    /// Creates a full bucket that accrues `rate` tokens per second up to `burst`.
    pub fn new(clock: Arc<dyn Clock>, rate: f64, burst: f64) -> Self {
        let last = clock.now();
        Self {
            clock,
            rate,
            burst,
            tokens: burst,
            last,
        }
    }

    /// Consumes one token if available. Returns false when the bucket is empty.
    pub fn check(&mut self) -> bool {
        let now = self.clock.now();
        let elapsed = now.duration_since(self.last).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.rate).min(self.burst);
        self.last = now;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}
