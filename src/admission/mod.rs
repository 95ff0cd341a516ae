//! Admission control for upstream calls.
//!
//! Two layers guard the backends:
//! - [`TokenBucket`]: hard requests-per-second check, never queues
//! - [`Gate`]: bounded concurrency with a fair FIFO overflow queue

mod gate;
mod token_bucket;

pub use gate::{Busy, Gate, Permit};
pub use token_bucket::TokenBucket;

use crate::config::AdmissionConfig;

impl Gate {
    /// Build the process-wide gate from configuration.
    pub fn from_config(config: &AdmissionConfig) -> Self {
        let rate_limiter = (config.rate_limit_rps > 0)
            .then(|| TokenBucket::new(f64::from(config.rate_limit_rps), config.burst()));
        Gate::new(config.max_concurrency, config.queue_limit, rate_limiter)
    }
}
