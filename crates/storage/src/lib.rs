//! Columnar storage primitives: column vectors, selection vectors, the
//! row-id space, and the group-key data structures that back `$group`,
//! `$sort`+`$limit`, and incremental view maintenance.
//!
//! This crate has no notion of a pipeline or an operator; it is the
//! structure-of-arrays substrate [`aggvm_engine`] builds execution on top
//! of.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod batch;
mod column;
mod dict;
mod hash_table;
mod multiset;
mod order_stat;
mod row_space;
mod selection;
mod validity;

pub use batch::{value_kind, ColumnarBatch};
pub use column::{ColumnKind, ColumnVector};
pub use dict::StringPool;
pub use hash_table::{GroupKey, RobinHoodMap};
pub use multiset::RefCountedMultiSet;
pub use order_stat::OrderStatTree;
pub use row_space::{RowIdSpace, VirtualRowInfo};
pub use selection::SelectionVector;
pub use validity::{BitSet, ValidityBitmap};
