//! Operator ABI, pipeline compiler/router, late materialization, IVM store,
//! and the fallback interpreter — the execution engine for aggvm's
//! columnar, incrementally-maintained aggregation pipelines.
//!
//! [`engine::Engine`] is the crate's entry point: it owns a
//! [`base::DocumentStore`], compiles pipelines via [`compiler::compile`],
//! and routes each run across the micro/columnar/fallback paths described
//! in the specification's pipeline-compiler section.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod accumulator;
mod base;
mod compiler;
mod engine;
mod expr;
mod fallback;
mod ivm;
mod materialize;
mod operator;
mod operators;
mod plan;
mod stats;

pub use base::DocumentStore;
pub use compiler::{compile, choose_path, ExecutionPath, ExecutionPlan, RejectionReason, StagePlan, MAX_HOT_PATH_STAGES, MICRO_PATH_ROW_THRESHOLD};
pub use engine::Engine;
pub use expr::{eval, EvalScope, Expr, Predicate};
pub use fallback::{run_pipeline, ForeignLookup};
pub use ivm::{Dimension, IvmPipeline, IvmStore, LiveSet, RowDelta};
pub use materialize::{MaterializeCache, Overlay};
pub use operator::{Hints, Operator, OperatorMetrics, PushOutput, Schema, TransformSink};
pub use operators::{GroupOperator, LimitOperator, LookupOperator, MatchOperator, ProjectOperator, SkipOperator, SortOperator, UnwindOperator};
pub use plan::{parse_pipeline, Accumulator, GroupId, Stage};
pub use stats::EngineStats;
