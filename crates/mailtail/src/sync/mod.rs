//! Incremental sync: engine, processing pipeline and the tail loop
//!
//! One worker per mailbox. The [`SyncEngine`] produces candidate ids, the
//! [`Pipeline`] turns them into emitted messages, and the
//! [`CheckpointCoordinator`] is the only writer of resume state. [`Tailer`]
//! ties them together and sleeps between cycles on a cancellable
//! [`Shutdown`] token.

mod checkpoint;
mod engine;
mod pipeline;
mod runner;
mod shutdown;

pub use checkpoint::CheckpointCoordinator;
pub use engine::{Cycle, CycleOutcome, RunMode, SyncEngine, SyncMode};
pub use pipeline::{
    Budget, Pipeline, PipelineOptions, ProcessOutcome, StopReason, SubjectFilter,
};
pub use runner::{FULL_LISTING_PAGE_SIZE, RunSummary, TailError, TailOptions, Tailer};
pub use shutdown::Shutdown;
