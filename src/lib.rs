//! A five-stage character pipeline with resettable statistics.
//!
//! Characters flow from a source through a transform into a sink. Two
//! circular buffers connect the stages, and every slot is handed over with an
//! explicit ready/released handshake: a producer only moves on once each of
//! its consumers has released the current slot.
//!
//! ```text
//!            ┌─► input-accounting
//!  source ───┤
//!            └─► transform ───┬─► output-accounting
//!                             └─► sink
//! ```
//!
//! The accounting stages tally the raw and transformed streams. A
//! [`ResetCoordinator`] can pause the source, wait for the in-flight cycle to
//! drain, and flush and zero both tallies without losing or double-counting a
//! character.
//!
//! # Features
//!
//! - Multi-reader slot handshake on top of `parking_lot` condition variables
//! - Single-writer cursors enforced by ownership
//! - Quiescent resets with an optional re-key hook for the transform
//! - Periodic reset trigger driven by a crossbeam ticker
//! - Per-stage tick counters
//!
//! # Example
//!
//! ```ignore
//! use char_pipeline::{BytesSource, MemoryLog, PipelineBuilder, SharedSink, ShiftCipher};
//! use std::sync::Arc;
//!
//! let sink = SharedSink::new();
//! let running = PipelineBuilder::new()
//!     .input_capacity(2)
//!     .output_capacity(2)
//!     .build()?
//!     .start(BytesSource::new("AB"), Arc::new(ShiftCipher::new(1)), sink.clone(), MemoryLog::new())?;
//!
//! running.coordinator().reset();
//! let report = running.wait()?;
//! ```

pub mod buffer;
pub mod config;
pub mod error;
pub mod handshake;
pub mod io;
pub mod metrics;
pub mod pipeline;
pub mod reset;
pub mod stage;
pub mod stats;
pub mod transform;

// Re-exports for convenience
pub use buffer::{CircularBuffer, CursorOwner, CursorView};
pub use error::{PipelineError, Result};
pub use handshake::{FanOut, Semaphore, SlotLink};
pub use io::{
    BytesSource, ChannelSource, CharSink, CharSource, ReaderSource, SharedSink, Symbol,
    WriterSink,
};
pub use metrics::{StageKind, StageTicks, TickSnapshot};
pub use pipeline::{Pipeline, PipelineBuilder, RunReport, RunningPipeline};
pub use reset::{PauseGate, ResetCoordinator, ResetGuard, ResetTrigger};
pub use stage::StageOutcome;
pub use stats::{CountLog, CountSnapshot, MemoryLog, Tally, WriterLog};
pub use transform::{FnTransform, Identity, ShiftCipher, Transform};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
