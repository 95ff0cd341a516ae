//! Best-effort request counters for `GET /metrics`.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct Metrics {
    requests_total: AtomicU64,
    requests_streaming: AtomicU64,
    requests_non_streaming: AtomicU64,
    errors_total: AtomicU64,
    rate_limit_hits: AtomicU64,
}

impl Metrics {
    pub fn record_request(&self, streaming: bool) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
        let counter = if streaming {
            &self.requests_streaming
        } else {
            &self.requests_non_streaming
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.errors_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rate_limited(&self) {
        self.rate_limit_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            requests_total: self.requests_total.load(Ordering::Relaxed),
            requests_streaming: self.requests_streaming.load(Ordering::Relaxed),
            requests_non_streaming: self.requests_non_streaming.load(Ordering::Relaxed),
            errors_total: self.errors_total.load(Ordering::Relaxed),
            rate_limit_hits: self.rate_limit_hits.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub requests_total: u64,
    pub requests_streaming: u64,
    pub requests_non_streaming: u64,
    pub errors_total: u64,
    pub rate_limit_hits: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let metrics = Metrics::default();
        metrics.record_request(true);
        metrics.record_request(false);
        metrics.record_request(false);
        metrics.record_error();
        metrics.record_rate_limited();

        assert_eq!(
            metrics.snapshot(),
            MetricsSnapshot {
                requests_total: 3,
                requests_streaming: 1,
                requests_non_streaming: 2,
                errors_total: 1,
                rate_limit_hits: 1,
            }
        );
    }
}
