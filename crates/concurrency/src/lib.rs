//! The delta batching scheduler: a bounded ring buffer of [`Delta`]s, a
//! sliding-window view of latency/throughput/pressure, and the adaptive
//! batching loop that ties them together (specification §4.8).
//!
//! Nothing here knows about pipelines or operators; the engine crate is the
//! consumer that turns drained batches into IVM store updates.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod metrics;
mod ring_buffer;
mod scheduler;

pub use aggvm_core::Delta;
pub use metrics::{Signals, SlidingWindowMetrics};
pub use ring_buffer::{DeltaRing, RingFull};
pub use scheduler::{DeltaScheduler, SchedulerStats};
