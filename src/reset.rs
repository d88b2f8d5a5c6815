//! Pausing the pipeline at a cycle boundary to snapshot and zero its counters.
//!
//! The source stage holds the [`PauseGate`] for the whole of each cycle, so
//! a coordinator that owns the gate knows no new character is being read.
//! Owning the gate is not enough on its own: the cycle that just finished may
//! still be travelling through the transform, output-accounting and sink
//! stages. [`ResetCoordinator::begin_reset`] therefore also waits until every
//! downstream stage has ticked as many times as the source has since the last
//! reset, and only then touches the statistics.

use crate::buffer::CursorView;
use crate::error::{PipelineError, Result};
use crate::metrics::{StageKind, StageTicks};
use crate::stats::{Accumulator, CountLog, CountSnapshot};
use crossbeam::channel::{select, tick, unbounded, Sender};
use parking_lot::{Mutex, MutexGuard};
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Exclusive lock serializing source cycles against resets
#[derive(Debug, Default)]
pub struct PauseGate {
    lock: Mutex<()>,
    end_of_stream: AtomicBool,
}

impl PauseGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the gate, blocking while a reset (or a source cycle) holds it
    pub fn enter(&self) -> MutexGuard<'_, ()> {
        self.lock.lock()
    }

    /// Release the gate, handing it straight to a waiter if there is one
    ///
    /// The source re-enters immediately after leaving, so an ordinary unlock
    /// would let it win the gate back indefinitely.
    pub fn leave(permit: MutexGuard<'_, ()>) {
        MutexGuard::unlock_fair(permit);
    }

    /// Called by the source while it still holds the gate for its final cycle
    pub(crate) fn mark_end_of_stream(&self) {
        self.end_of_stream.store(true, Ordering::Release);
    }

    /// Whether the source has completed its end-marker cycle
    pub fn end_of_stream(&self) -> bool {
        self.end_of_stream.load(Ordering::Acquire)
    }
}

/// Shared state a reset needs to reach into
pub(crate) struct ResetParts {
    pub gate: Arc<PauseGate>,
    pub ticks: StageTicks,
    pub input_stats: Accumulator,
    pub output_stats: Accumulator,
    pub input_cursor: CursorView,
    pub output_cursor: CursorView,
    pub log: Box<dyn CountLog>,
}

/// Quiesces the pipeline and flushes its statistics
pub struct ResetCoordinator {
    gate: Arc<PauseGate>,
    ticks: StageTicks,
    input_stats: Accumulator,
    output_stats: Accumulator,
    input_cursor: CursorView,
    output_cursor: CursorView,
    log: Mutex<Box<dyn CountLog>>,
    flushes: AtomicU64,
    resets: AtomicU64,
}

impl ResetCoordinator {
    pub(crate) fn new(parts: ResetParts) -> Self {
        Self {
            gate: parts.gate,
            ticks: parts.ticks,
            input_stats: parts.input_stats,
            output_stats: parts.output_stats,
            input_cursor: parts.input_cursor,
            output_cursor: parts.output_cursor,
            log: Mutex::new(parts.log),
            flushes: AtomicU64::new(0),
            resets: AtomicU64::new(0),
        }
    }

    /// Pause the source and drain the pipeline, then flush and zero the counters
    ///
    /// Blocks until the source is between cycles and every downstream stage
    /// has finished the cycle in flight. Returns `None` without flushing when
    /// the end marker has already gone through: the final flush on shutdown
    /// accounts for everything left. The pipeline stays paused until the
    /// returned guard is ended or dropped.
    pub fn begin_reset(&self) -> Option<ResetGuard<'_>> {
        let permit = self.gate.enter();
        if self.gate.end_of_stream() {
            debug!("Reset requested after end of stream, ignoring");
            PauseGate::leave(permit);
            return None;
        }

        let cycles = self.ticks.stage(StageKind::Source).since_reset();
        for kind in StageKind::CONSUMERS {
            self.ticks.stage(kind).wait_for(cycles);
        }
        for kind in StageKind::ALL {
            self.ticks.stage(kind).drain();
        }

        let snapshot = self.flush_counts();
        self.input_cursor.request_rewind();
        self.output_cursor.request_rewind();
        self.resets.fetch_add(1, Ordering::Relaxed);
        debug!("Pipeline paused after {} cycles", cycles);

        Some(ResetGuard {
            permit: Some(permit),
            snapshot,
        })
    }

    /// Run `f` while the pipeline is paused, e.g. to change the cipher key
    pub fn reset_with<F>(&self, f: F) -> Option<CountSnapshot>
    where
        F: FnOnce(&CountSnapshot),
    {
        let guard = self.begin_reset()?;
        f(guard.snapshot());
        Some(guard.end_reset())
    }

    /// Reset without doing anything while paused
    pub fn reset(&self) -> Option<CountSnapshot> {
        self.reset_with(|_| {})
    }

    /// Whether the end marker has passed the source
    pub fn is_terminated(&self) -> bool {
        self.gate.end_of_stream()
    }

    /// Number of resets that flushed counts
    pub fn resets(&self) -> u64 {
        self.resets.load(Ordering::Relaxed)
    }

    /// Number of snapshots handed to the count log, including the final one
    pub fn flushes(&self) -> u64 {
        self.flushes.load(Ordering::Relaxed)
    }

    /// Take both tallies and hand them to the log; log failures are only reported
    fn flush_counts(&self) -> CountSnapshot {
        let snapshot = self.take_snapshot();
        if let Err(e) = self.log.lock().flush(&snapshot) {
            warn!("Failed to write flush #{}: {}", snapshot.sequence, e);
        }
        snapshot
    }

    fn take_snapshot(&self) -> CountSnapshot {
        let snapshot = CountSnapshot {
            sequence: self.flushes.fetch_add(1, Ordering::Relaxed) + 1,
            input: self.input_stats.take(),
            output: self.output_stats.take(),
        };
        info!(
            "Flush #{}: {} input, {} output characters",
            snapshot.sequence,
            snapshot.input.total(),
            snapshot.output.total()
        );
        snapshot
    }

    /// Flush whatever accumulated since the last reset, once every stage has exited
    pub(crate) fn final_flush(&self) -> io::Result<CountSnapshot> {
        let permit = self.gate.enter();
        let snapshot = self.take_snapshot();
        let result = self.log.lock().flush(&snapshot);
        PauseGate::leave(permit);
        result.map(|()| snapshot)
    }
}

/// Held while the pipeline is paused for a reset
///
/// Dropping the guard ends the reset.
#[must_use = "the pipeline stays paused until the guard is dropped"]
pub struct ResetGuard<'a> {
    permit: Option<MutexGuard<'a, ()>>,
    snapshot: CountSnapshot,
}

impl ResetGuard<'_> {
    /// Counts flushed by this reset
    pub fn snapshot(&self) -> &CountSnapshot {
        &self.snapshot
    }

    /// Release the pause gate and let the source start its next cycle
    pub fn end_reset(mut self) -> CountSnapshot {
        if let Some(permit) = self.permit.take() {
            PauseGate::leave(permit);
        }
        self.snapshot.clone()
    }
}

impl Drop for ResetGuard<'_> {
    fn drop(&mut self) {
        if let Some(permit) = self.permit.take() {
            PauseGate::leave(permit);
        }
    }
}

/// Background thread that requests a reset on a fixed interval
///
/// Stops on its own once the pipeline has terminated.
pub struct ResetTrigger {
    stop: Option<Sender<()>>,
    handle: Option<JoinHandle<u64>>,
}

impl ResetTrigger {
    /// Start requesting resets every `interval`, calling `on_reset` while paused
    pub fn spawn<F>(
        coordinator: Arc<ResetCoordinator>,
        interval: Duration,
        mut on_reset: F,
    ) -> Result<Self>
    where
        F: FnMut(&CountSnapshot) + Send + 'static,
    {
        let (stop_tx, stop_rx) = unbounded::<()>();
        let ticker = tick(interval);

        let handle = thread::Builder::new()
            .name("reset-trigger".into())
            .spawn(move || {
                let mut resets = 0;
                loop {
                    select! {
                        recv(stop_rx) -> _ => break,
                        recv(ticker) -> _ => {
                            if coordinator.reset_with(&mut on_reset).is_none() {
                                break;
                            }
                            resets += 1;
                        }
                    }
                }
                debug!("Reset trigger finished after {} resets", resets);
                resets
            })
            .map_err(|e| PipelineError::ThreadError(e.to_string()))?;

        Ok(Self {
            stop: Some(stop_tx),
            handle: Some(handle),
        })
    }

    /// Stop requesting resets and return how many were performed
    pub fn stop(mut self) -> Result<u64> {
        drop(self.stop.take());
        match self.handle.take() {
            Some(handle) => handle
                .join()
                .map_err(|_| PipelineError::ThreadError("reset trigger panicked".into())),
            None => Ok(0),
        }
    }
}

impl Drop for ResetTrigger {
    fn drop(&mut self) {
        drop(self.stop.take());
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
