//! Bounded single-producer/single-consumer delta ring (specification §4.8).
//!
//! The producer interface is thread-safe with respect to a single producer;
//! the consumer is the scheduler's own batching loop. Backed by a
//! mutex-guarded deque rather than a lock-free buffer, matching how the rest
//! of this workspace trades a small amount of throughput for straightforward
//! correctness under `parking_lot`.

use aggvm_core::Delta;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;

/// Returned by [`DeltaRing::push`] when the ring is at capacity. The caller
/// must signal backpressure to its producer rather than drop the delta.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RingFull;

impl std::fmt::Display for RingFull {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "delta ring is at capacity")
    }
}

impl std::error::Error for RingFull {}

struct RingInner {
    queue: VecDeque<Delta>,
    capacity: usize,
    closed: bool,
}

/// A bounded ring buffer of [`Delta`]s with blocking pop and non-blocking,
/// backpressure-signaling push.
pub struct DeltaRing {
    inner: Mutex<RingInner>,
    not_empty: Condvar,
}

impl DeltaRing {
    /// Create a ring with the given capacity (default 2048 per §4.8).
    pub fn new(capacity: usize) -> Self {
        DeltaRing {
            inner: Mutex::new(RingInner {
                queue: VecDeque::with_capacity(capacity),
                capacity,
                closed: false,
            }),
            not_empty: Condvar::new(),
        }
    }

    /// Push a delta. Returns [`RingFull`] if the ring is at capacity; the
    /// delta is not enqueued and not dropped — it is the caller's to retry or
    /// surface backpressure for.
    pub fn push(&self, delta: Delta) -> Result<(), RingFull> {
        let mut inner = self.inner.lock();
        if inner.queue.len() >= inner.capacity {
            return Err(RingFull);
        }
        inner.queue.push_back(delta);
        drop(inner);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Drain up to `max` deltas, blocking until at least one is available or
    /// the ring is closed. Returns an empty vec only once closed and drained.
    pub fn drain_blocking(&self, max: usize) -> Vec<Delta> {
        let mut inner = self.inner.lock();
        while inner.queue.is_empty() && !inner.closed {
            self.not_empty.wait(&mut inner);
        }
        let n = inner.queue.len().min(max.max(1));
        inner.queue.drain(..n).collect()
    }

    /// Signal the consumer to stop waiting; already-queued deltas remain
    /// drainable.
    pub fn close(&self) {
        let mut inner = self.inner.lock();
        inner.closed = true;
        drop(inner);
        self.not_empty.notify_all();
    }

    /// Current queue depth.
    pub fn len(&self) -> usize {
        self.inner.lock().queue.len()
    }

    /// `true` if nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Configured capacity.
    pub fn capacity(&self) -> usize {
        self.inner.lock().capacity
    }

    /// Queue pressure as `len / capacity`, in `[0, 1]`.
    pub fn pressure(&self) -> f64 {
        let inner = self.inner.lock();
        inner.queue.len() as f64 / inner.capacity as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aggvm_core::RowId;

    #[test]
    fn push_and_drain_preserve_order() {
        let ring = DeltaRing::new(4);
        for i in 0..3 {
            ring.push(Delta::insert(RowId::physical(i))).unwrap();
        }
        let drained = ring.drain_blocking(10);
        assert_eq!(drained.len(), 3);
        assert_eq!(drained[0].row_id, RowId::physical(0));
        assert_eq!(drained[2].row_id, RowId::physical(2));
    }

    #[test]
    fn push_past_capacity_signals_full() {
        let ring = DeltaRing::new(2);
        ring.push(Delta::insert(RowId::physical(0))).unwrap();
        ring.push(Delta::insert(RowId::physical(1))).unwrap();
        assert_eq!(ring.push(Delta::insert(RowId::physical(2))), Err(RingFull));
    }

    #[test]
    fn drain_blocking_respects_max() {
        let ring = DeltaRing::new(8);
        for i in 0..5 {
            ring.push(Delta::insert(RowId::physical(i))).unwrap();
        }
        let first = ring.drain_blocking(2);
        assert_eq!(first.len(), 2);
        assert_eq!(ring.len(), 3);
    }

    #[test]
    fn pressure_reflects_fill_ratio() {
        let ring = DeltaRing::new(4);
        ring.push(Delta::insert(RowId::physical(0))).unwrap();
        assert_eq!(ring.pressure(), 0.25);
    }

    #[test]
    fn close_wakes_a_blocked_drain() {
        let ring = std::sync::Arc::new(DeltaRing::new(4));
        let r = ring.clone();
        let handle = std::thread::spawn(move || r.drain_blocking(10));
        std::thread::sleep(std::time::Duration::from_millis(30));
        ring.close();
        let drained = handle.join().unwrap();
        assert!(drained.is_empty());
    }
}
