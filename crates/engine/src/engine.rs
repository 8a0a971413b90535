//! The engine's embedding-API entry point (specification §6).
//!
//! [`Engine`] owns one [`DocumentStore`] per named collection, compiles and
//! routes `execute` calls across the micro/columnar/fallback paths, and
//! drives [`IvmPipeline`] subscriptions as collections change. A
//! [`DeltaScheduler`] is started lazily the first time a caller wants
//! batched delta delivery; direct `ingest`/`remove`/`apply_delta` calls
//! propagate to subscribers synchronously, matching the single-threaded,
//! non-reentrant-per-instance concurrency model (specification §5).

use crate::base::DocumentStore;
use crate::compiler::{self, ExecutionPath, ExecutionPlan};
use crate::fallback::{self, ForeignLookup};
use crate::ivm::{IvmPipeline, RowDelta};
use crate::operator::{Hints, Operator, Schema};
use crate::operators::{GroupOperator, LimitOperator, LookupOperator, MatchOperator, ProjectOperator, SkipOperator, SortOperator, UnwindOperator};
use crate::plan::Stage;
use crate::stats::{EngineStats, StatsCollector};
use aggvm_concurrency::DeltaScheduler;
use aggvm_core::{Delta, Document, Error, EngineConfig, Result, RowId};
use aggvm_storage::ColumnarBatch;
use rustc_hash::FxHashMap;
use std::cell::RefCell;
use std::rc::Rc;

/// A live `store.subscribe(plan)` registration: a compiled incremental
/// pipeline plus the observer callback deltas are delivered to.
struct Subscription {
    collection: String,
    pipeline: IvmPipeline,
    observer: Box<dyn FnMut(RowDelta)>,
}

/// The engine: named collections, their subscriptions, and execution
/// statistics. Not `Send`/`Sync` — one instance is driven from a single
/// thread, per the specification's concurrency model; run multiple engines
/// on separate threads if you need parallelism.
pub struct Engine {
    config: EngineConfig,
    collections: FxHashMap<String, DocumentStore>,
    subscriptions: Vec<Subscription>,
    scheduler: Option<DeltaScheduler>,
    stats: StatsCollector,
}

impl Default for Engine {
    fn default() -> Self {
        Engine::new(EngineConfig::default())
    }
}

impl Engine {
    /// A fresh engine with no collections or subscriptions.
    pub fn new(config: EngineConfig) -> Self {
        Engine {
            config,
            collections: FxHashMap::default(),
            subscriptions: Vec::new(),
            scheduler: None,
            stats: StatsCollector::new(),
        }
    }

    fn collection_mut(&mut self, name: &str) -> &mut DocumentStore {
        self.collections.entry(name.to_string()).or_default()
    }

    /// `store.ingest(document) → RowId`. Allocates a RowId in `collection`
    /// and propagates the resulting `+1` delta to every matching
    /// subscription.
    pub fn ingest(&mut self, collection: &str, doc: Document) -> Result<RowId> {
        let row_id = self.collection_mut(collection).ingest(doc.clone());
        self.propagate(collection, Delta::insert(row_id), &doc)?;
        Ok(row_id)
    }

    /// `store.remove(rowId) → bool`. Frees `row_id` in `collection` and
    /// propagates the `-1` delta to every matching subscription. Returns
    /// `false` if the row was not present.
    pub fn remove(&mut self, collection: &str, row_id: RowId) -> Result<bool> {
        let Some(doc) = self.collections.get(collection).and_then(|store| store.get(row_id)) else {
            return Ok(false);
        };
        self.collection_mut(collection).remove(row_id);
        self.propagate(collection, Delta::remove(row_id), &doc)?;
        Ok(true)
    }

    /// `store.applyDelta(delta)`. For when the caller already mutated the
    /// collection directly (e.g. replaying a buffered delta) and only needs
    /// subscriptions re-driven; `delta.row_id` must already resolve in
    /// `collection`.
    pub fn apply_delta(&mut self, collection: &str, delta: Delta) -> Result<()> {
        let doc = self
            .collections
            .get(collection)
            .and_then(|store| store.get(delta.row_id))
            .ok_or_else(|| Error::internal("I2", "applyDelta referenced a row absent from the store"))?;
        self.propagate(collection, delta, &doc)
    }

    fn propagate(&mut self, collection: &str, delta: Delta, doc: &Document) -> Result<()> {
        if let Some(scheduler) = &self.scheduler {
            let _ = scheduler.submit(delta);
        }
        for sub in self.subscriptions.iter_mut().filter(|s| s.collection == collection) {
            for row_delta in sub.pipeline.apply(delta, doc)? {
                (sub.observer)(row_delta);
            }
        }
        Ok(())
    }

    /// `store.subscribe(plan) → observer`. Compiles `stages` for incremental
    /// maintenance and registers `observer` to receive the resulting deltas
    /// as `collection` changes. Rejects `$limit`/`$skip` and any other
    /// non-incremental stage with `InvalidPipeline`.
    pub fn subscribe(&mut self, collection: &str, stages: Vec<Stage>, observer: impl FnMut(RowDelta) + 'static) -> Result<()> {
        let pipeline = IvmPipeline::new(stages, self, self.config.group_cardinality_limit)?;
        self.subscriptions.push(Subscription {
            collection: collection.to_string(),
            pipeline,
            observer: Box::new(observer),
        });
        Ok(())
    }

    /// Start the delta scheduler (specification §4.8), using the engine's
    /// configured ring capacity and throughput target. Submitted deltas are
    /// still applied synchronously to subscriptions; the scheduler only
    /// tracks batching/backpressure signals for `stats()`.
    pub fn start_scheduler(&mut self) {
        let target = self.config.throughput_target_per_sec;
        let capacity = self.config.ring_capacity;
        self.scheduler = Some(DeltaScheduler::start(capacity, target, |_batch| {}));
    }

    /// `engine.compile(pipeline) → ExecutionPlan`. Also records any
    /// rejected stages against `rejectionsByReason`.
    pub fn compile(&mut self, stages: &[Stage]) -> ExecutionPlan {
        let plan = compiler::compile(stages);
        for stage_plan in &plan.stages {
            if let Some(reason) = &stage_plan.rejection {
                self.stats.record_rejection(reason);
            }
        }
        plan
    }

    /// `engine.execute(collection, pipeline) → sequence<Document>`. Routes
    /// across the micro/columnar/fallback paths per the compiled plan's row
    /// count, splitting a partially-eligible pipeline into a columnar prefix
    /// followed by a fallback tail over the materialized intermediate.
    pub fn execute(&mut self, collection: &str, stages: &[Stage]) -> Result<Vec<Document>> {
        let rows: Vec<(RowId, Document)> = self.collections.get(collection).map(|store| store.iter().map(|(id, doc)| (id, doc.clone())).collect()).unwrap_or_default();
        let plan = self.compile(stages);
        let path = compiler::choose_path(&plan, rows.len());
        self.stats.record_path(path);

        match path {
            ExecutionPath::Micro | ExecutionPath::Fallback => {
                let docs = rows.into_iter().map(|(_, doc)| doc).collect();
                fallback::run_pipeline(stages, docs, self)
            }
            ExecutionPath::Columnar => {
                let prefix = &stages[..plan.hot_prefix_len];
                let tail = &stages[plan.hot_prefix_len..];
                let intermediate = self.run_columnar_prefix(prefix, rows)?;
                if tail.is_empty() {
                    Ok(intermediate)
                } else {
                    fallback::run_pipeline(tail, intermediate, self)
                }
            }
        }
    }

    fn run_columnar_prefix(&self, stages: &[Stage], rows: Vec<(RowId, Document)>) -> Result<Vec<Document>> {
        let base_store = Rc::new(RefCell::new(DocumentStore::new()));
        {
            let mut store = base_store.borrow_mut();
            for (row_id, doc) in &rows {
                store.ingest_at(*row_id, doc.clone());
            }
        }

        let mut batch = ColumnarBatch::new(rows.len().max(1));
        for (row_id, doc) in &rows {
            batch.push_row(*row_id, doc.iter())?;
        }

        for stage in stages {
            let mut op: Box<dyn Operator> = self.build_operator(stage, Rc::clone(&base_store))?;
            op.init(&Schema::default(), &Hints::new(batch.len().max(1)))?;
            let pushed = op.push(batch)?.batch;
            batch = match op.flush()? {
                Some(flushed) => flushed,
                None => pushed,
            };
            op.close();
        }

        Ok(batch.selection().iter().map(|slot| crate::operators::row_document(&batch, slot)).collect())
    }

    fn build_operator(&self, stage: &Stage, store: Rc<RefCell<DocumentStore>>) -> Result<Box<dyn Operator>> {
        Ok(match stage {
            Stage::Match(pred) => Box::new(MatchOperator::new(pred.clone())),
            Stage::Project { include_id, includes, computed } => Box::new(ProjectOperator::new(*include_id, includes.clone(), computed.clone())),
            Stage::Group { id, fields } => Box::new(GroupOperator::new(id.clone(), fields.clone(), self.config.group_cardinality_limit)),
            Stage::Sort(keys) => Box::new(SortOperator::new(keys.clone())),
            Stage::Limit(n) => Box::new(LimitOperator::new(*n)),
            Stage::Skip(n) => Box::new(SkipOperator::new(*n)),
            Stage::Unwind { field, preserve_null_and_empty, include_array_index } => {
                Box::new(UnwindOperator::new(field.clone(), *preserve_null_and_empty, include_array_index.clone(), store))
            }
            Stage::Lookup { from, local_field, foreign_field, as_field, .. } => {
                let foreign_docs = self.collection(from);
                Box::new(LookupOperator::new(local_field.clone().unwrap_or_default(), foreign_field.clone().unwrap_or_default(), as_field.clone(), foreign_docs))
            }
        })
    }

    /// `engine.stats() → { hotPathHits, fallbacks, columnarHits,
    /// p99LatencyMs, throughputDeltasPerSec, rejectionsByReason }`.
    pub fn stats(&self) -> EngineStats {
        let (p99_ms, throughput) = match &self.scheduler {
            Some(scheduler) => {
                let s = scheduler.stats();
                (s.p99_latency_ms, s.throughput_per_sec)
            }
            None => (0.0, 0.0),
        };
        self.stats.snapshot(p99_ms, throughput)
    }
}

impl ForeignLookup for Engine {
    fn collection(&self, name: &str) -> Vec<Document> {
        self.collections.get(name).map(|store| store.iter().map(|(_, doc)| doc.clone()).collect()).unwrap_or_default()
    }
}
