//! Typed configuration for the engine (ambient stack, SPEC_FULL §2.1).
//!
//! Mirrors the teacher's `StrataConfig`-style builder: a plain struct with
//! `Default` matching the specification's stated defaults, constructed
//! fluently rather than threaded through individual function calls.

/// Tunables for the columnar batch runtime, the compiler/router, the IVM
/// store, and the delta scheduler.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Default column/batch capacity (specification §3, `ColumnarBatch`).
    pub batch_capacity: usize,
    /// Hard ceiling a column vector resize may never cross (§4.1).
    pub vector_max_capacity: usize,
    /// Row count below which the router takes the micro-path (§4.5).
    pub micro_path_threshold: usize,
    /// Maximum pipeline length eligible for the columnar hot-path (§4.5).
    pub hot_path_max_stages: usize,
    /// Maximum distinct `$group` keys before `CapacityExceeded` (§4.4.3).
    pub group_cardinality_limit: usize,
    /// Approximate per-group memory cost used to derive a limit from a
    /// memory budget when one is supplied (`memoryBudget / ~64B`).
    pub bytes_per_group_estimate: usize,
    /// Ring buffer capacity for the delta scheduler (§4.8).
    pub ring_capacity: usize,
    /// Minimum adaptive batch size (§4.8 bounds).
    pub min_batch_size: usize,
    /// Maximum adaptive batch size (§4.8 bounds).
    pub max_batch_size: usize,
    /// Starting adaptive batch size before any control-loop correction.
    pub initial_batch_size: usize,
    /// P99 delta-to-emit latency target in milliseconds (§4.8).
    pub latency_target_ms: f64,
    /// Target throughput in deltas/sec (§4.8).
    pub throughput_target_per_sec: f64,
    /// LRU capacity for the late-materialization cache (§4.6).
    pub materialize_cache_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            batch_capacity: 1024,
            vector_max_capacity: 1 << 24,
            micro_path_threshold: 64,
            hot_path_max_stages: 6,
            group_cardinality_limit: 100_000,
            bytes_per_group_estimate: 64,
            ring_capacity: 2048,
            min_batch_size: 8,
            max_batch_size: 512,
            initial_batch_size: 64,
            latency_target_ms: 5.0,
            throughput_target_per_sec: 250_000.0,
            materialize_cache_capacity: 4096,
        }
    }
}

impl EngineConfig {
    /// Start from the defaults; use the builder setters below to override
    /// individual fields.
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the batch capacity.
    pub fn with_batch_capacity(mut self, capacity: usize) -> Self {
        self.batch_capacity = capacity;
        self
    }

    /// Override the `$group` cardinality limit.
    pub fn with_group_cardinality_limit(mut self, limit: usize) -> Self {
        self.group_cardinality_limit = limit;
        self
    }

    /// Derive a group cardinality limit from a memory budget in bytes,
    /// per the spec's `memoryBudget / ~64B` rule, and apply it.
    pub fn with_group_memory_budget(mut self, budget_bytes: usize) -> Self {
        self.group_cardinality_limit = (budget_bytes / self.bytes_per_group_estimate.max(1)).max(1);
        self
    }

    /// Override the ring buffer capacity.
    pub fn with_ring_capacity(mut self, capacity: usize) -> Self {
        self.ring_capacity = capacity;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_specification() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.batch_capacity, 1024);
        assert_eq!(cfg.group_cardinality_limit, 100_000);
        assert_eq!(cfg.ring_capacity, 2048);
        assert_eq!(cfg.micro_path_threshold, 64);
        assert_eq!(cfg.hot_path_max_stages, 6);
    }

    #[test]
    fn memory_budget_derives_group_limit() {
        let cfg = EngineConfig::new().with_group_memory_budget(6_400_000);
        assert_eq!(cfg.group_cardinality_limit, 100_000);
    }

    #[test]
    fn builder_overrides_compose() {
        let cfg = EngineConfig::new()
            .with_batch_capacity(256)
            .with_ring_capacity(512);
        assert_eq!(cfg.batch_capacity, 256);
        assert_eq!(cfg.ring_capacity, 512);
    }
}
