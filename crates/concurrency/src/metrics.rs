//! Sliding-window latency/throughput/pressure tracking for the delta
//! scheduler's adaptive batch sizing (specification §4.8).

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

const WINDOW: Duration = Duration::from_secs(5);
const LATENCY_TARGET: Duration = Duration::from_millis(5);
const DEFAULT_THROUGHPUT_TARGET: f64 = 250_000.0;

struct Sample {
    at: Instant,
    latency: Duration,
}

struct WindowInner {
    samples: VecDeque<Sample>,
    completed_in_window: VecDeque<Instant>,
}

/// Tracks per-batch emit latency and completed-delta timestamps over a
/// trailing 5-second window, and derives the three signals the scheduler's
/// control rules act on.
pub struct SlidingWindowMetrics {
    inner: Mutex<WindowInner>,
    throughput_target: f64,
}

/// A point-in-time read of the three control signals.
#[derive(Debug, Clone, Copy)]
pub struct Signals {
    /// P99 delta-to-emit latency over the window.
    pub p99_latency: Duration,
    /// Deltas emitted per second over the window.
    pub throughput_per_sec: f64,
    /// `queueLen / capacity`, supplied by the caller (the ring, not this
    /// struct, owns queue depth).
    pub pressure: f64,
}

impl Signals {
    /// `true` if p99 latency exceeds the 5ms target.
    pub fn latency_high(&self) -> bool {
        self.p99_latency > LATENCY_TARGET
    }

    /// `true` if throughput is below target and latency is not the problem.
    pub fn throughput_low(&self, target: f64) -> bool {
        self.throughput_per_sec < target && !self.latency_high()
    }
}

impl SlidingWindowMetrics {
    /// A fresh tracker using the spec's default 250k deltas/s throughput
    /// target.
    pub fn new() -> Self {
        Self::with_throughput_target(DEFAULT_THROUGHPUT_TARGET)
    }

    /// A tracker with a custom throughput target.
    pub fn with_throughput_target(throughput_target: f64) -> Self {
        SlidingWindowMetrics {
            inner: Mutex::new(WindowInner {
                samples: VecDeque::new(),
                completed_in_window: VecDeque::new(),
            }),
            throughput_target,
        }
    }

    /// Record one batch's processing latency and the number of deltas it
    /// carried.
    pub fn record_batch(&self, latency: Duration, delta_count: usize) {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        inner.samples.push_back(Sample { at: now, latency });
        for _ in 0..delta_count {
            inner.completed_in_window.push_back(now);
        }
        prune(&mut inner.samples, now);
        while let Some(front) = inner.completed_in_window.front() {
            if now.duration_since(*front) > WINDOW {
                inner.completed_in_window.pop_front();
            } else {
                break;
            }
        }
    }

    /// Read the current signals, given the caller-supplied queue pressure.
    pub fn signals(&self, pressure: f64) -> Signals {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        prune(&mut inner.samples, now);
        let mut latencies: Vec<Duration> = inner.samples.iter().map(|s| s.latency).collect();
        latencies.sort_unstable();
        let p99 = if latencies.is_empty() {
            Duration::ZERO
        } else {
            let idx = ((latencies.len() as f64) * 0.99).ceil() as usize;
            latencies[idx.saturating_sub(1).min(latencies.len() - 1)]
        };
        let throughput = inner.completed_in_window.len() as f64 / WINDOW.as_secs_f64();
        Signals {
            p99_latency: p99,
            throughput_per_sec: throughput,
            pressure,
        }
    }

    /// The configured throughput target.
    pub fn throughput_target(&self) -> f64 {
        self.throughput_target
    }
}

impl Default for SlidingWindowMetrics {
    fn default() -> Self {
        Self::new()
    }
}

fn prune(samples: &mut VecDeque<Sample>, now: Instant) {
    while let Some(front) = samples.front() {
        if now.duration_since(front.at) > WINDOW {
            samples.pop_front();
        } else {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_metrics_report_zero_signals() {
        let metrics = SlidingWindowMetrics::new();
        let signals = metrics.signals(0.0);
        assert_eq!(signals.p99_latency, Duration::ZERO);
        assert_eq!(signals.throughput_per_sec, 0.0);
    }

    #[test]
    fn recorded_latency_is_reflected_in_p99() {
        let metrics = SlidingWindowMetrics::new();
        metrics.record_batch(Duration::from_millis(10), 100);
        let signals = metrics.signals(0.0);
        assert_eq!(signals.p99_latency, Duration::from_millis(10));
        assert!(signals.latency_high());
    }

    #[test]
    fn throughput_counts_completed_deltas() {
        let metrics = SlidingWindowMetrics::new();
        metrics.record_batch(Duration::from_millis(1), 1_250_000);
        let signals = metrics.signals(0.0);
        assert_eq!(signals.throughput_per_sec, 250_000.0);
        assert!(!signals.latency_high());
    }

    #[test]
    fn throughput_low_requires_latency_to_be_ok() {
        let metrics = SlidingWindowMetrics::new();
        metrics.record_batch(Duration::from_millis(20), 1);
        let signals = metrics.signals(0.0);
        assert!(signals.latency_high());
        assert!(!signals.throughput_low(250_000.0));
    }

    #[test]
    fn pressure_passes_through_caller_value() {
        let metrics = SlidingWindowMetrics::new();
        let signals = metrics.signals(0.42);
        assert_eq!(signals.pressure, 0.42);
    }
}
