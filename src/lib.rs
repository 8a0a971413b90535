//! # aggvm
//!
//! A columnar, incrementally-maintained execution engine for MongoDB-style
//! aggregation pipelines over in-memory document collections.
//!
//! Pipelines run two ways against the same collection: a full-scan
//! `execute`, routed across a micro-path, a vectorized columnar hot-path, or
//! a row-at-a-time fallback interpreter depending on the pipeline's shape
//! and the input size; and an incremental `subscribe`, which threads signed
//! `+1`/`-1` deltas through the pipeline's stages instead of re-executing it
//! as the collection changes.
//!
//! # Quick Start
//!
//! ```
//! use aggvm::{Document, Engine, EngineConfig, Value, parse_pipeline};
//!
//! fn main() -> aggvm::Result<()> {
//!     let mut engine = Engine::new(EngineConfig::default());
//!
//!     let mut alice = Document::new();
//!     alice.insert("user", Value::String("alice".into()));
//!     alice.insert("amount", Value::Int(40));
//!     engine.ingest("orders", alice)?;
//!
//!     let mut bob = Document::new();
//!     bob.insert("user", Value::String("bob".into()));
//!     bob.insert("amount", Value::Int(15));
//!     engine.ingest("orders", bob)?;
//!
//!     let pipeline = serde_json::json!([
//!         { "$match": { "amount": { "$gte": 20 } } },
//!         { "$group": { "_id": null, "total": { "$sum": "$amount" } } },
//!     ]);
//!     let stages = parse_pipeline(pipeline.as_array().unwrap())?;
//!     let result = engine.execute("orders", &stages)?;
//!     assert_eq!(result[0].get("total"), Some(&Value::Double(40.0)));
//!
//!     Ok(())
//! }
//! ```
//!
//! # Components
//!
//! | Component | Purpose | Key Types |
//! |-----------|---------|-----------|
//! | **Column vectors & batch** | Structure-of-arrays row storage | `ColumnarBatch`, `ColumnVector`, `SelectionVector` |
//! | **Row-id space** | Physical/virtual row addressing | `RowId`, `RowIdSpace` |
//! | **Operator ABI** | One module per pipeline stage | `Operator`, `MatchOperator`, `GroupOperator`, ... |
//! | **Compiler & router** | Micro/columnar/fallback routing | `compile`, `choose_path`, `ExecutionPlan` |
//! | **IVM store & delta engine** | Incremental maintenance | `IvmStore`, `IvmPipeline`, `RowDelta` |
//! | **Delta scheduler** | Adaptive batching under backpressure | `DeltaScheduler`, `SlidingWindowMetrics` |
//!
//! # Architecture
//!
//! [`Engine`] is the entry point: it owns one [`DocumentStore`] per named
//! collection, compiles pipelines via [`compile`], and drives registered
//! [`IvmPipeline`] subscriptions as collections change. The storage,
//! concurrency, and engine crates are internal; this crate re-exports the
//! stable public surface.

pub use aggvm_core::{hash_value, Delta, Document, Error, EngineConfig, Result, RowId, Sign, Value};
pub use aggvm_concurrency::{DeltaScheduler, SchedulerStats, Signals, SlidingWindowMetrics};
pub use aggvm_engine::*;
