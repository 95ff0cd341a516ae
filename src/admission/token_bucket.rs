//! Lazily refilling token bucket.

use std::sync::{Mutex, PoisonError};
use tokio::time::Instant;

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

/// Non-blocking rate limiter. Tokens refill continuously at `rate` per second
/// up to `capacity`; a withdrawal either succeeds now or fails, it never queues.
#[derive(Debug)]
pub struct TokenBucket {
    capacity: f64,
    rate: f64,
    state: Mutex<BucketState>,
}

impl TokenBucket {
    /// Create a full bucket.
    pub fn new(rate_per_second: f64, burst: u32) -> Self {
        let capacity = f64::from(burst);
        Self {
            capacity,
            rate: rate_per_second.max(0.0),
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Try to withdraw `n` tokens.
    pub fn try_acquire(&self, n: u32) -> bool {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        self.refill(&mut state);

        let wanted = f64::from(n);
        if state.tokens >= wanted {
            state.tokens -= wanted;
            true
        } else {
            false
        }
    }

    fn refill(&self, state: &mut BucketState) {
        let now = Instant::now();
        let elapsed = now.saturating_duration_since(state.last_refill).as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.rate).min(self.capacity);
        state.last_refill = now;
    }
}
