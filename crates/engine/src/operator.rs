//! The operator ABI (specification §4.4): `init → push → flush → close`.

use aggvm_core::{Result, RowId, Value};
use aggvm_storage::{ColumnKind, ColumnarBatch};
use std::time::Duration;

/// The field/kind shape flowing into an operator, resolved once in `init`.
#[derive(Debug, Clone, Default)]
pub struct Schema {
    /// Known fields and their columnar kind, in declaration order.
    pub fields: Vec<(String, ColumnKind)>,
}

impl Schema {
    /// `true` if `field` is a known columnar field.
    pub fn has_field(&self, field: &str) -> bool {
        self.fields.iter().any(|(name, _)| name == field)
    }

    /// The columnar kind of `field`, if known.
    pub fn kind_of(&self, field: &str) -> Option<ColumnKind> {
        self.fields.iter().find(|(name, _)| name == field).map(|(_, k)| *k)
    }
}

/// Called by an operator whenever it produces or rewrites a field's value
/// for a row, so late materialization (§4.6) can replay the transform onto
/// the base document at the sink without the operator retaining state.
pub type TransformSink<'a> = dyn FnMut(RowId, &str, Value) + 'a;

/// Planning and resource hints passed to `init`.
pub struct Hints<'a> {
    /// Expected rows per pushed batch, used to presize output batches.
    pub expected_batch_size: usize,
    /// Expected fraction of rows a `$match` stage will admit, `[0, 1]`.
    pub expected_selectivity: f64,
    /// Field paths the input is already known to be sorted by, if any.
    pub known_sorted_fields: Vec<String>,
    /// Soft memory budget in bytes for blocking operators (`$group`,
    /// `$sort`'s order-statistics tree).
    pub memory_budget: usize,
    /// Sink for late-materialization transforms. `None` when the caller has
    /// no use for per-row overlays (e.g. the micro-path).
    pub on_transform: Option<&'a mut TransformSink<'a>>,
}

impl<'a> Hints<'a> {
    /// Hints with no sort knowledge and no transform sink, sized for
    /// `expected_batch_size` rows.
    pub fn new(expected_batch_size: usize) -> Self {
        Hints {
            expected_batch_size,
            expected_selectivity: 1.0,
            known_sorted_fields: Vec::new(),
            memory_budget: usize::MAX,
            on_transform: None,
        }
    }
}

/// Per-push timing and row-count metrics.
#[derive(Debug, Clone, Copy, Default)]
pub struct OperatorMetrics {
    /// Rows the operator received.
    pub rows_in: usize,
    /// Rows the operator emitted.
    pub rows_out: usize,
    /// Wall time spent in this push.
    pub elapsed: Duration,
}

/// The result of a non-blocking `push`.
pub struct PushOutput {
    /// The (possibly narrowed) output batch.
    pub batch: ColumnarBatch,
    /// Timing and row-count metrics for this push.
    pub metrics: OperatorMetrics,
}

/// A single stage of a compiled columnar pipeline.
pub trait Operator {
    /// Resolve field references, precompile predicates/expressions, and size
    /// any internal buffers from `hints`.
    fn init(&mut self, schema: &Schema, hints: &Hints) -> Result<()>;

    /// Process one input batch. Must not buffer rows across calls unless the
    /// operator is documented as blocking (`$group`, `$sort`+`$limit`).
    fn push(&mut self, batch: ColumnarBatch) -> Result<PushOutput>;

    /// Emit any buffered state. Non-blocking operators always return `None`.
    fn flush(&mut self) -> Result<Option<ColumnarBatch>>;

    /// Release held resources. Must be safe to call more than once.
    fn close(&mut self);

    /// `true` if this operator can apply a `+1` delta without a re-scan.
    fn can_increment(&self) -> bool;

    /// `true` if this operator can apply a `-1` delta without a re-scan.
    fn can_decrement(&self) -> bool;
}
