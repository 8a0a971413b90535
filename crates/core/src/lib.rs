//! Core types for aggvm
//!
//! This crate defines the foundational types shared by every other crate in
//! the workspace:
//! - [`Value`] / [`Document`]: the document data model (specification §3)
//! - [`RowId`]: the physical/virtual row identifier space
//! - [`Error`] / [`Result`]: the crate-wide error taxonomy
//! - [`EngineConfig`]: typed tunables for the batch runtime, compiler, and
//!   scheduler

#![warn(missing_docs)]

pub mod delta;
pub mod error;
pub mod limits;
pub mod row_id;
pub mod value;

pub use delta::{Delta, Sign};
pub use error::{Error, Result};
pub use limits::EngineConfig;
pub use row_id::RowId;
pub use value::{hash_value, Document, Value};
