//! Crate-wide error type for aggvm.
//!
//! A single `Error` enum is shared by every layer (storage, engine, the
//! embedding API) so that the wire error codes in the specification's
//! external-interfaces section map 1:1 onto Rust variants. We use `thiserror`
//! for `Display`/`std::error::Error` plumbing, matching the rest of the
//! codebase's error model.

use thiserror::Error;

/// Result type alias for aggvm operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type for the aggvm engine.
///
/// Variant names double as the machine-readable wire codes handed back to
/// callers and observers (`engine.stats().rejectionsByReason`, plan
/// validation failures, etc). Keep them stable across versions.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum Error {
    /// A plan referenced a stage key the compiler does not recognize.
    #[error("unknown stage: {0}")]
    UnknownStage(String),

    /// A `$match` predicate could not be lowered to the vectorized path and
    /// the caller requested strict mode (no row-by-row fallback).
    #[error("unsupported predicate at stage {stage_index}: {reason}")]
    UnsupportedPredicate {
        /// Index of the offending stage within the pipeline.
        stage_index: usize,
        /// Human-readable reason the predicate could not be lowered.
        reason: String,
    },

    /// A `$group` accumulator could not be lowered to a columnar kernel.
    #[error("unsupported accumulator at stage {stage_index}: {reason}")]
    UnsupportedAccumulator {
        /// Index of the offending stage within the pipeline.
        stage_index: usize,
        /// Human-readable reason the accumulator could not be lowered.
        reason: String,
    },

    /// A resizable structure (column vector, group hash table, ring buffer)
    /// would exceed its configured maximum.
    #[error("capacity exceeded: {0}")]
    CapacityExceeded(String),

    /// The pipeline itself is malformed: wrong stage arity, an invalid `_id`
    /// expression, an operand of the wrong type, and so on.
    #[error("invalid pipeline at stage {stage_index}: {reason}")]
    InvalidPipeline {
        /// Index of the offending stage within the pipeline.
        stage_index: usize,
        /// Human-readable reason the pipeline is invalid.
        reason: String,
    },

    /// The pipeline run's cancellation token tripped at a batch boundary.
    #[error("pipeline execution cancelled")]
    Cancelled,

    /// A structural invariant (selection index out of bounds, freed RowId
    /// referenced, etc.) was violated. These are bugs, not user errors.
    #[error("internal invariant violation ({invariant}): {message}")]
    Internal {
        /// The invariant id from the specification (e.g. `"I1"`).
        invariant: &'static str,
        /// Human-readable detail.
        message: String,
    },
}

impl Error {
    /// Construct an [`Error::Internal`] for the given invariant id.
    pub fn internal(invariant: &'static str, message: impl Into<String>) -> Self {
        Error::Internal {
            invariant,
            message: message.into(),
        }
    }

    /// The stable wire code for this error, as named in the specification's
    /// external-interfaces section.
    pub fn code(&self) -> &'static str {
        match self {
            Error::UnknownStage(_) => "UnknownStage",
            Error::UnsupportedPredicate { .. } => "UnsupportedPredicate",
            Error::UnsupportedAccumulator { .. } => "UnsupportedAccumulator",
            Error::CapacityExceeded(_) => "CapacityExceeded",
            Error::InvalidPipeline { .. } => "InvalidPipeline",
            Error::Cancelled => "Cancelled",
            Error::Internal { .. } => "Internal",
        }
    }

    /// Whether this error is recoverable by transparently falling back to
    /// row-at-a-time evaluation, rather than being surfaced to the caller.
    pub fn is_fallback_reason(&self) -> bool {
        matches!(
            self,
            Error::UnsupportedPredicate { .. } | Error::UnsupportedAccumulator { .. }
        )
    }

    /// Whether this error is benign and requires no state rollback.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }
}
