//! 429-aware retry for upstream calls.
//!
//! Policy:
//! - Up to `MAX_ATTEMPTS` calls in total
//! - A transport failure is terminal and returned as-is (never retried)
//! - Any status other than 429, success or not, is returned immediately
//! - A 429 waits `Retry-After` seconds when the header is present (2s if it
//!   does not parse), otherwise an exponential backoff starting at 0.5s and
//!   capped at 15s; every wait gets 0.1..=0.4s of jitter
//! - When every attempt was a 429, the last 429 reply is returned unchanged

use rand::Rng;
use std::future::Future;
use std::time::Duration;

/// Total number of calls made before giving up on 429s.
pub const MAX_ATTEMPTS: u32 = 6;

const INITIAL_BACKOFF_SECS: f64 = 0.5;
const MAX_BACKOFF_SECS: f64 = 15.0;
/// Used when `Retry-After` is present but not a number (e.g. an HTTP date).
const UNPARSEABLE_RETRY_AFTER_SECS: f64 = 2.0;
const JITTER_MIN_SECS: f64 = 0.1;
const JITTER_MAX_SECS: f64 = 0.4;
/// Upper bound on a single sleep, whatever the upstream asks for.
const MAX_SLEEP: Duration = Duration::from_secs(3600);

/// The parts of an upstream reply the retry loop inspects.
pub trait RateLimitedReply {
    fn status_code(&self) -> u16;
    fn retry_after(&self) -> Option<&str>;
}

impl RateLimitedReply for reqwest::Response {
    fn status_code(&self) -> u16 {
        self.status().as_u16()
    }

    fn retry_after(&self) -> Option<&str> {
        self.headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
    }
}

/// Seconds to wait after a 429, before jitter.
///
/// Only the header-less path advances `backoff`.
pub fn backoff_secs(retry_after: Option<&str>, backoff: &mut f64) -> f64 {
    match retry_after.map(str::trim).filter(|v| !v.is_empty()) {
        Some(value) => value
            .parse::<f64>()
            .ok()
            .filter(|secs| secs.is_finite() && *secs >= 0.0)
            .unwrap_or(UNPARSEABLE_RETRY_AFTER_SECS),
        None => {
            let wait = backoff.min(MAX_BACKOFF_SECS);
            *backoff *= 2.0;
            wait
        }
    }
}

fn jitter_secs() -> f64 {
    rand::rng().random_range(JITTER_MIN_SECS..=JITTER_MAX_SECS)
}

/// Call `send` until it returns something other than a 429, or the attempt
/// budget runs out. `send` receives the 1-based attempt number.
pub async fn retry_on_429<T, E, F, Fut>(mut send: F) -> Result<T, E>
where
    T: RateLimitedReply,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut backoff = INITIAL_BACKOFF_SECS;
    let mut attempt = 1;

    loop {
        let reply = send(attempt).await?;
        if reply.status_code() != 429 || attempt >= MAX_ATTEMPTS {
            return Ok(reply);
        }

        let wait = backoff_secs(reply.retry_after(), &mut backoff) + jitter_secs();
        tracing::warn!(
            attempt,
            max_attempts = MAX_ATTEMPTS,
            wait_secs = wait,
            "Upstream rate limited, backing off"
        );
        drop(reply);

        let sleep = Duration::try_from_secs_f64(wait).unwrap_or(MAX_SLEEP).min(MAX_SLEEP);
        tokio::time::sleep(sleep).await;
        attempt += 1;
    }
}
