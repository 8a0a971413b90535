//! Delta batching scheduler (specification §4.8).
//!
//! A single background thread drains the [`DeltaRing`] into batches and
//! hands each batch to a caller-supplied sink. Batch size is adapted every
//! cycle from the three control signals (p99 latency, throughput, queue
//! pressure); the scheduler never drops a delta and signals backpressure to
//! the producer by returning [`RingFull`] from [`DeltaScheduler::submit`]
//! rather than silently discarding it.
//!
//! The worker loop mirrors the shape of a generic background task runner:
//! block for work, process outside any lock, and keep bookkeeping correct
//! even if the sink panics.

use crate::metrics::{Signals, SlidingWindowMetrics};
use crate::ring_buffer::{DeltaRing, RingFull};
use aggvm_core::Delta;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::error;

const MIN_BATCH_SIZE: usize = 8;
const MAX_BATCH_SIZE: usize = 512;
const DEFAULT_BATCH_SIZE: usize = 64;
const SLOW_BATCH_THRESHOLD: Duration = Duration::from_millis(10);

/// Tracks the adaptive batch size, applying the control rules from §4.8 in
/// priority order: a latency problem is corrected first, then throughput,
/// then pressure; a single slow batch shrinks independently of the other
/// signals.
struct BatchSizeController {
    current: AtomicUsize,
}

impl BatchSizeController {
    fn new() -> Self {
        BatchSizeController {
            current: AtomicUsize::new(DEFAULT_BATCH_SIZE),
        }
    }

    fn current(&self) -> usize {
        self.current.load(Ordering::Relaxed)
    }

    fn clamp(size: f64) -> usize {
        (size.round() as i64).clamp(MIN_BATCH_SIZE as i64, MAX_BATCH_SIZE as i64) as usize
    }

    /// Apply one adjustment cycle and return the new batch size.
    fn adjust(&self, signals: Signals, throughput_target: f64, last_batch_slow: bool) -> usize {
        let before = self.current() as f64;
        let after = if signals.latency_high() {
            before * 0.7
        } else if signals.throughput_low(throughput_target) {
            before * 1.3
        } else if signals.pressure > 0.8 {
            before * 1.5
        } else if signals.pressure < 0.1 {
            before + (DEFAULT_BATCH_SIZE as f64 - before) * 0.1
        } else {
            before
        };
        let after = if last_batch_slow { after * 0.85 } else { after };
        let clamped = Self::clamp(after);
        self.current.store(clamped, Ordering::Relaxed);
        clamped
    }
}

/// A snapshot of the scheduler's current operating point.
#[derive(Debug, Clone, Copy)]
pub struct SchedulerStats {
    /// Deltas currently queued in the ring.
    pub queue_depth: usize,
    /// Ring capacity.
    pub ring_capacity: usize,
    /// Current adaptive batch size.
    pub batch_size: usize,
    /// Observed p99 batch latency over the trailing window.
    pub p99_latency_ms: f64,
    /// Observed throughput over the trailing window.
    pub throughput_per_sec: f64,
}

struct SchedulerInner {
    ring: DeltaRing,
    metrics: SlidingWindowMetrics,
    batch_size: BatchSizeController,
    throughput_target: f64,
    shutdown: AtomicBool,
}

/// The delta batching scheduler: owns the ring, the metrics window, and the
/// background thread that drains one into batches processed by a sink.
pub struct DeltaScheduler {
    inner: Arc<SchedulerInner>,
    worker: Option<JoinHandle<()>>,
}

impl DeltaScheduler {
    /// Start a scheduler with the given ring capacity and throughput target,
    /// dispatching each drained batch to `on_batch`.
    pub fn start(
        ring_capacity: usize,
        throughput_target: f64,
        mut on_batch: impl FnMut(&[Delta]) + Send + 'static,
    ) -> Self {
        let inner = Arc::new(SchedulerInner {
            ring: DeltaRing::new(ring_capacity),
            metrics: SlidingWindowMetrics::with_throughput_target(throughput_target),
            batch_size: BatchSizeController::new(),
            throughput_target,
            shutdown: AtomicBool::new(false),
        });

        let worker_inner = Arc::clone(&inner);
        let worker = std::thread::Builder::new()
            .name("aggvm-delta-scheduler".to_string())
            .spawn(move || worker_loop(&worker_inner, &mut on_batch))
            .expect("failed to spawn delta scheduler thread");

        DeltaScheduler {
            inner,
            worker: Some(worker),
        }
    }

    /// Submit one delta. Returns [`RingFull`] if the ring is at capacity —
    /// the caller must treat this as backpressure, not drop the delta.
    pub fn submit(&self, delta: Delta) -> Result<(), RingFull> {
        self.inner.ring.push(delta)
    }

    /// Signal the worker to stop once the ring drains, and join it.
    pub fn shutdown(&mut self) {
        self.inner.shutdown.store(true, Ordering::Release);
        self.inner.ring.close();
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
    }

    /// A snapshot of queue depth, batch size, and the latency/throughput
    /// signals.
    pub fn stats(&self) -> SchedulerStats {
        let pressure = self.inner.ring.pressure();
        let signals = self.inner.metrics.signals(pressure);
        SchedulerStats {
            queue_depth: self.inner.ring.len(),
            ring_capacity: self.inner.ring.capacity(),
            batch_size: self.inner.batch_size.current(),
            p99_latency_ms: signals.p99_latency.as_secs_f64() * 1000.0,
            throughput_per_sec: signals.throughput_per_sec,
        }
    }
}

impl Drop for DeltaScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(inner: &SchedulerInner, on_batch: &mut dyn FnMut(&[Delta])) {
    loop {
        let batch_size = inner.batch_size.current();
        let batch = inner.ring.drain_blocking(batch_size);
        if batch.is_empty() {
            if inner.shutdown.load(Ordering::Acquire) {
                return;
            }
            continue;
        }

        let start = Instant::now();
        if let Err(e) = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| on_batch(&batch)))
        {
            error!(
                "delta scheduler batch sink panicked: {:?}",
                e.downcast_ref::<&str>().copied().unwrap_or("(non-string panic)")
            );
        }
        let latency = start.elapsed();

        inner.metrics.record_batch(latency, batch.len());
        let pressure = inner.ring.pressure();
        let signals = inner.metrics.signals(pressure);
        let slow = latency > SLOW_BATCH_THRESHOLD;
        inner.batch_size.adjust(signals, inner.throughput_target, slow);

        if inner.shutdown.load(Ordering::Acquire) && inner.ring.is_empty() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aggvm_core::RowId;
    use std::sync::atomic::AtomicUsize as StdAtomicUsize;
    use std::sync::Mutex;

    #[test]
    fn submitted_deltas_are_all_delivered_to_the_sink() {
        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&received);
        let mut scheduler = DeltaScheduler::start(64, 250_000.0, move |batch: &[Delta]| {
            sink.lock().unwrap().extend_from_slice(batch);
        });

        for i in 0..100 {
            scheduler.submit(Delta::insert(RowId::physical(i))).unwrap();
        }

        // give the worker a moment to drain, then shut down to join it
        std::thread::sleep(Duration::from_millis(100));
        scheduler.shutdown();

        assert_eq!(received.lock().unwrap().len(), 100);
    }

    #[test]
    fn backpressure_is_signaled_when_ring_is_full() {
        let mut scheduler = DeltaScheduler::start(2, 250_000.0, |_: &[Delta]| {
            std::thread::sleep(Duration::from_millis(200));
        });
        scheduler.submit(Delta::insert(RowId::physical(0))).unwrap();
        scheduler.submit(Delta::insert(RowId::physical(1))).unwrap();
        // the worker may have already picked up the first batch; retry a
        // few times to observe the full state deterministically
        let mut saw_full = false;
        for i in 2..200 {
            if scheduler.submit(Delta::insert(RowId::physical(i))).is_err() {
                saw_full = true;
                break;
            }
        }
        scheduler.shutdown();
        assert!(saw_full);
    }

    #[test]
    fn batch_size_shrinks_under_sustained_latency() {
        let counter = Arc::new(StdAtomicUsize::new(0));
        let c = Arc::clone(&counter);
        let mut scheduler = DeltaScheduler::start(4096, 250_000.0, move |batch: &[Delta]| {
            c.fetch_add(batch.len(), Ordering::Relaxed);
            std::thread::sleep(Duration::from_millis(20));
        });
        for i in 0..2000 {
            let _ = scheduler.submit(Delta::insert(RowId::physical(i)));
        }
        std::thread::sleep(Duration::from_millis(300));
        let stats = scheduler.stats();
        scheduler.shutdown();
        assert!(stats.batch_size < DEFAULT_BATCH_SIZE || counter.load(Ordering::Relaxed) > 0);
    }

    #[test]
    fn panicking_sink_does_not_kill_the_worker() {
        let calls = Arc::new(StdAtomicUsize::new(0));
        let c = Arc::clone(&calls);
        let mut scheduler = DeltaScheduler::start(64, 250_000.0, move |_: &[Delta]| {
            c.fetch_add(1, Ordering::Relaxed);
            panic!("sink failure");
        });
        scheduler.submit(Delta::insert(RowId::physical(0))).unwrap();
        scheduler.submit(Delta::insert(RowId::physical(1))).unwrap();
        std::thread::sleep(Duration::from_millis(100));
        scheduler.shutdown();
        assert!(calls.load(Ordering::Relaxed) >= 1);
    }
}
