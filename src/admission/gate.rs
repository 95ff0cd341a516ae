//! Fair, bounded concurrency gate.
//!
//! At most `max_slots` permits are outstanding. Callers that cannot get a slot
//! immediately wait in a FIFO queue of at most `queue_limit` entries; a release
//! hands its slot directly to the oldest waiter instead of returning it to the
//! free pool, so a newcomer can never overtake someone already queued.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::oneshot;

use super::token_bucket::TokenBucket;

/// Retry hint when the token bucket is empty.
const RATE_LIMITED_RETRY_SECS: u64 = 1;
/// Retry hint when the queue is full or the wait timed out.
const QUEUE_RETRY_SECS: u64 = 2;

/// Admission refused; the caller should back off for `retry_after_secs`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("server busy, retry after {retry_after_secs}s")]
pub struct Busy {
    pub retry_after_secs: u64,
}

impl Busy {
    fn rate_limited() -> Self {
        Self {
            retry_after_secs: RATE_LIMITED_RETRY_SECS,
        }
    }

    fn queue() -> Self {
        Self {
            retry_after_secs: QUEUE_RETRY_SECS,
        }
    }
}

struct Waiter {
    id: u64,
    grant: oneshot::Sender<()>,
}

struct GateState {
    free: usize,
    waiters: VecDeque<Waiter>,
    next_id: u64,
}

struct GateInner {
    max_slots: usize,
    queue_limit: usize,
    rate_limiter: Option<TokenBucket>,
    state: Mutex<GateState>,
}

impl GateInner {
    fn lock(&self) -> MutexGuard<'_, GateState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Return one slot: hand it to the oldest live waiter, else to the free pool.
    fn release_slot(&self) {
        let mut state = self.lock();
        while let Some(waiter) = state.waiters.pop_front() {
            if waiter.grant.send(()).is_ok() {
                tracing::trace!(waiter = waiter.id, "admission slot handed off");
                return;
            }
        }
        state.free = (state.free + 1).min(self.max_slots);
    }
}

/// Process-wide admission gate. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct Gate {
    inner: Arc<GateInner>,
}

impl std::fmt::Debug for Gate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.lock();
        f.debug_struct("Gate")
            .field("max_slots", &self.inner.max_slots)
            .field("free", &state.free)
            .field("queued", &state.waiters.len())
            .finish()
    }
}

impl Gate {
    pub fn new(max_concurrency: usize, queue_limit: usize, rate_limiter: Option<TokenBucket>) -> Self {
        let max_slots = max_concurrency.max(1);
        Self {
            inner: Arc::new(GateInner {
                max_slots,
                queue_limit,
                rate_limiter,
                state: Mutex::new(GateState {
                    free: max_slots,
                    waiters: VecDeque::new(),
                    next_id: 0,
                }),
            }),
        }
    }

    /// Acquire a permit, waiting in line for at most `wait_timeout` (forever if `None`).
    ///
    /// Fails with `Busy(1)` when rate limited, `Busy(2)` when the queue is full
    /// or the wait times out.
    pub async fn acquire(&self, wait_timeout: Option<Duration>) -> Result<Permit, Busy> {
        if let Some(bucket) = &self.inner.rate_limiter {
            if !bucket.try_acquire(1) {
                tracing::debug!("admission rejected by rate limiter");
                return Err(Busy::rate_limited());
            }
        }

        let mut queued = {
            let mut state = self.inner.lock();
            if state.free > 0 && state.waiters.is_empty() {
                state.free -= 1;
                return Ok(Permit::new(self.inner.clone()));
            }
            if state.waiters.len() >= self.inner.queue_limit {
                tracing::debug!(queued = state.waiters.len(), "admission queue full");
                return Err(Busy::queue());
            }

            let id = state.next_id;
            state.next_id += 1;
            let (grant, granted) = oneshot::channel();
            state.waiters.push_back(Waiter { id, grant });
            QueuedWaiter {
                inner: self.inner.clone(),
                id,
                granted,
                settled: false,
            }
        };

        let outcome = match wait_timeout {
            Some(limit) => tokio::time::timeout(limit, &mut queued.granted).await.ok(),
            None => Some((&mut queued.granted).await),
        };

        match outcome {
            Some(Ok(())) => {
                queued.settled = true;
                Ok(Permit::new(self.inner.clone()))
            }
            // Sender dropped without a grant: only possible if the entry was discarded
            Some(Err(_)) => {
                queued.settled = true;
                Err(Busy::queue())
            }
            None => queued.withdraw(),
        }
    }

    /// Slots not currently held.
    pub fn available(&self) -> usize {
        self.inner.lock().free
    }

    /// Callers currently waiting.
    pub fn queued(&self) -> usize {
        self.inner.lock().waiters.len()
    }

    pub fn max_concurrency(&self) -> usize {
        self.inner.max_slots
    }
}

/// A caller parked in the waiter queue.
///
/// Dropping it before it settles (e.g. the acquiring task was cancelled)
/// removes the entry, or forwards a grant that raced with the drop.
struct QueuedWaiter {
    inner: Arc<GateInner>,
    id: u64,
    granted: oneshot::Receiver<()>,
    settled: bool,
}

impl QueuedWaiter {
    /// Give up waiting. Returns the permit instead if a release already granted one.
    fn withdraw(&mut self) -> Result<Permit, Busy> {
        self.settled = true;
        {
            let mut state = self.inner.lock();
            if let Some(pos) = state.waiters.iter().position(|w| w.id == self.id) {
                state.waiters.remove(pos);
                return Err(Busy::queue());
            }
        }
        // Popped by a release, which sends while holding the lock.
        match self.granted.try_recv() {
            Ok(()) => Ok(Permit::new(self.inner.clone())),
            Err(_) => Err(Busy::queue()),
        }
    }
}

impl Drop for QueuedWaiter {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        if self.withdraw().is_ok() {
            // The returned permit drops here, passing the slot on.
            tracing::trace!(waiter = self.id, "cancelled waiter forwarded its grant");
        }
    }
}

/// One held concurrency slot. Released exactly once, on `release()` or drop.
pub struct Permit {
    gate: Option<Arc<GateInner>>,
}

impl Permit {
    fn new(gate: Arc<GateInner>) -> Self {
        Self { gate: Some(gate) }
    }

    /// Return the slot. Further calls are no-ops.
    pub fn release(&mut self) {
        if let Some(gate) = self.gate.take() {
            gate.release_slot();
        }
    }

    pub fn is_released(&self) -> bool {
        self.gate.is_none()
    }
}

impl std::fmt::Debug for Permit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Permit")
            .field("released", &self.is_released())
            .finish()
    }
}

impl Drop for Permit {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fast_path_and_release() {
        let gate = Gate::new(2, 10, None);
        let a = gate.acquire(None).await.unwrap();
        let _b = gate.acquire(None).await.unwrap();
        assert_eq!(gate.available(), 0);

        drop(a);
        assert_eq!(gate.available(), 1);
    }

    #[tokio::test]
    async fn test_double_release_is_noop() {
        let gate = Gate::new(1, 10, None);
        let mut permit = gate.acquire(None).await.unwrap();
        permit.release();
        permit.release();
        assert!(permit.is_released());
        drop(permit);
        assert_eq!(gate.available(), 1);
    }

    #[tokio::test]
    async fn test_zero_concurrency_clamped_to_one() {
        let gate = Gate::new(0, 0, None);
        assert_eq!(gate.max_concurrency(), 1);
        let _p = gate.acquire(None).await.unwrap();
        assert_eq!(
            gate.acquire(None).await.unwrap_err(),
            Busy { retry_after_secs: 2 }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_timeout_withdraws_from_queue() {
        let gate = Gate::new(1, 10, None);
        let _held = gate.acquire(None).await.unwrap();

        let err = gate
            .acquire(Some(Duration::from_millis(50)))
            .await
            .unwrap_err();
        assert_eq!(err.retry_after_secs, 2);
        assert_eq!(gate.queued(), 0);
    }

    #[tokio::test]
    async fn test_rate_limiter_rejects_before_queueing() {
        let gate = Gate::new(1, 10, Some(TokenBucket::new(1.0, 1)));
        let first = gate.acquire(None).await.unwrap();
        drop(first);

        let err = gate.acquire(None).await.unwrap_err();
        assert_eq!(err.retry_after_secs, 1);
        assert_eq!(gate.queued(), 0);
    }

    #[tokio::test]
    async fn test_withdraw_after_grant_returns_permit() {
        let gate = Gate::new(1, 10, None);
        let held = gate.acquire(None).await.unwrap();

        // Enqueue a waiter by hand, then grant it before it notices.
        let (grant, granted) = oneshot::channel();
        gate.inner.lock().waiters.push_back(Waiter { id: 99, grant });
        let mut waiter = QueuedWaiter {
            inner: gate.inner.clone(),
            id: 99,
            granted,
            settled: false,
        };
        drop(held);
        assert_eq!(gate.available(), 0);

        let permit = waiter.withdraw().expect("granted waiter keeps its permit");
        drop(waiter);
        assert_eq!(gate.available(), 0);
        drop(permit);
        assert_eq!(gate.available(), 1);
    }

    #[tokio::test]
    async fn test_dropped_granted_waiter_forwards_slot() {
        let gate = Gate::new(1, 10, None);
        let held = gate.acquire(None).await.unwrap();

        let (grant, granted) = oneshot::channel();
        gate.inner.lock().waiters.push_back(Waiter { id: 7, grant });
        let waiter = QueuedWaiter {
            inner: gate.inner.clone(),
            id: 7,
            granted,
            settled: false,
        };
        drop(held);
        drop(waiter);

        assert_eq!(gate.queued(), 0);
        assert_eq!(gate.available(), 1);
    }
}
