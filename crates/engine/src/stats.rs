//! Engine-wide execution statistics (specification §4.5, §6 `engine.stats()`,
//! §9 "Global mutable counters → a per-engine stats struct; atomics only at
//! the scheduler boundary").
//!
//! [`StatsCollector`] is the plain, non-atomic counter set an [`crate::engine::Engine`]
//! owns and updates as it routes pipeline runs; the delta scheduler keeps its
//! own atomic counters separately (`aggvm_concurrency::SchedulerStats`) and
//! the two are merged only at snapshot time.

use crate::compiler::{ExecutionPath, RejectionReason};
use rustc_hash::FxHashMap;

/// A snapshot of engine-wide execution counters, as returned by
/// `engine.stats()`.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct EngineStats {
    /// Executions that stayed off the fallback interpreter (micro-path or
    /// columnar hot-path), combined.
    pub hot_path_hits: u64,
    /// Executions that ran (in whole or in a hybrid-split tail) through the
    /// fallback interpreter.
    pub fallbacks: u64,
    /// Executions whose compiled plan was fully or partially columnar.
    pub columnar_hits: u64,
    /// Observed p99 delta-to-emit latency over the scheduler's trailing
    /// window, in milliseconds.
    pub p99_latency_ms: f64,
    /// Observed delta throughput over the scheduler's trailing window.
    pub throughput_deltas_per_sec: f64,
    /// Count of compiler rejections, keyed by reason code
    /// (`RejectionReason::code()`).
    pub rejections_by_reason: FxHashMap<String, u64>,
}

/// Mutable counters updated as the engine routes and compiles pipelines.
#[derive(Debug, Default)]
pub(crate) struct StatsCollector {
    hot_path_hits: u64,
    fallbacks: u64,
    columnar_hits: u64,
    rejections_by_reason: FxHashMap<&'static str, u64>,
}

impl StatsCollector {
    /// A fresh, all-zero collector.
    pub fn new() -> Self {
        StatsCollector::default()
    }

    /// Record which path a pipeline run took.
    pub fn record_path(&mut self, path: ExecutionPath) {
        match path {
            ExecutionPath::Micro => self.hot_path_hits += 1,
            ExecutionPath::Columnar => {
                self.hot_path_hits += 1;
                self.columnar_hits += 1;
            }
            ExecutionPath::Fallback => self.fallbacks += 1,
        }
    }

    /// Record one compiler rejection, keyed by its stable reason code.
    pub fn record_rejection(&mut self, reason: &RejectionReason) {
        *self.rejections_by_reason.entry(reason.code()).or_insert(0) += 1;
    }

    /// Fold in the scheduler's latency/throughput signals and produce a
    /// public snapshot.
    pub fn snapshot(&self, p99_latency_ms: f64, throughput_deltas_per_sec: f64) -> EngineStats {
        EngineStats {
            hot_path_hits: self.hot_path_hits,
            fallbacks: self.fallbacks,
            columnar_hits: self.columnar_hits,
            p99_latency_ms,
            throughput_deltas_per_sec,
            rejections_by_reason: self.rejections_by_reason.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn micro_and_columnar_both_count_as_hot_path() {
        let mut stats = StatsCollector::new();
        stats.record_path(ExecutionPath::Micro);
        stats.record_path(ExecutionPath::Columnar);
        stats.record_path(ExecutionPath::Fallback);
        let snap = stats.snapshot(0.0, 0.0);
        assert_eq!(snap.hot_path_hits, 2);
        assert_eq!(snap.columnar_hits, 1);
        assert_eq!(snap.fallbacks, 1);
    }

    #[test]
    fn rejections_are_keyed_by_reason_code() {
        let mut stats = StatsCollector::new();
        stats.record_rejection(&RejectionReason::UnsupportedAccumulator);
        stats.record_rejection(&RejectionReason::UnsupportedAccumulator);
        let snap = stats.snapshot(0.0, 0.0);
        assert_eq!(snap.rejections_by_reason.get("UNSUPPORTED_ACCUM"), Some(&2));
    }
}
