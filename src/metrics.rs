use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// The five stages of the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageKind {
    Source,
    InputAccounting,
    Transform,
    OutputAccounting,
    Sink,
}

impl StageKind {
    pub const ALL: [StageKind; 5] = [
        StageKind::Source,
        StageKind::InputAccounting,
        StageKind::Transform,
        StageKind::OutputAccounting,
        StageKind::Sink,
    ];

    /// The four stages downstream of the source
    pub const CONSUMERS: [StageKind; 4] = [
        StageKind::InputAccounting,
        StageKind::Transform,
        StageKind::OutputAccounting,
        StageKind::Sink,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            StageKind::Source => "source",
            StageKind::InputAccounting => "input-accounting",
            StageKind::Transform => "transform",
            StageKind::OutputAccounting => "output-accounting",
            StageKind::Sink => "sink",
        }
    }

    fn index(&self) -> usize {
        *self as usize
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Completed iterations of one stage
///
/// `since_reset` is drained by every reset; `lifetime` never is. Once the
/// stage has exited the counter is closed and waiting on it no longer blocks.
#[derive(Debug, Default)]
pub struct TickCounter {
    since_reset: Mutex<u64>,
    advanced: Condvar,
    lifetime: AtomicU64,
    closed: AtomicBool,
}

impl TickCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one completed iteration
    pub fn tick(&self) {
        let mut ticks = self.since_reset.lock();
        *ticks += 1;
        self.lifetime.fetch_add(1, Ordering::Relaxed);
        self.advanced.notify_all();
    }

    /// Iterations completed since the last drain
    pub fn since_reset(&self) -> u64 {
        *self.since_reset.lock()
    }

    /// Iterations completed since the pipeline started
    pub fn lifetime(&self) -> u64 {
        self.lifetime.load(Ordering::Relaxed)
    }

    /// Block until at least `target` iterations have completed since the last
    /// drain, or the stage has exited
    pub fn wait_for(&self, target: u64) {
        let mut ticks = self.since_reset.lock();
        while *ticks < target && !self.is_closed() {
            self.advanced.wait(&mut ticks);
        }
    }

    /// Mark the stage as exited and wake every waiter
    pub fn close(&self) {
        let _ticks = self.since_reset.lock();
        self.closed.store(true, Ordering::Release);
        self.advanced.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Zero the since-reset count, returning what it held
    pub fn drain(&self) -> u64 {
        std::mem::take(&mut *self.since_reset.lock())
    }
}

/// Tick counters for all five stages
#[derive(Debug, Clone)]
pub struct StageTicks {
    counters: Arc<[TickCounter; 5]>,
    start_time: Instant,
}

impl StageTicks {
    pub fn new() -> Self {
        Self {
            counters: Arc::new(Default::default()),
            start_time: Instant::now(),
        }
    }

    pub fn stage(&self, kind: StageKind) -> &TickCounter {
        &self.counters[kind.index()]
    }

    /// Source cycles per second since the pipeline was created
    pub fn throughput_cps(&self) -> f64 {
        let elapsed = self.start_time.elapsed();
        let total = self.stage(StageKind::Source).lifetime();
        if elapsed.as_secs_f64() == 0.0 {
            0.0
        } else {
            total as f64 / elapsed.as_secs_f64()
        }
    }

    /// Get a snapshot of current tick counts
    pub fn snapshot(&self) -> TickSnapshot {
        TickSnapshot {
            since_reset: StageKind::ALL.map(|kind| self.stage(kind).since_reset()),
            lifetime: StageKind::ALL.map(|kind| self.stage(kind).lifetime()),
            throughput_cps: self.throughput_cps(),
            elapsed: self.start_time.elapsed(),
        }
    }
}

impl Default for StageTicks {
    fn default() -> Self {
        Self::new()
    }
}

/// Tick counts at a point in time, indexed in [`StageKind::ALL`] order
#[derive(Debug, Clone)]
pub struct TickSnapshot {
    pub since_reset: [u64; 5],
    pub lifetime: [u64; 5],
    pub throughput_cps: f64,
    pub elapsed: Duration,
}

impl TickSnapshot {
    pub fn lifetime_of(&self, kind: StageKind) -> u64 {
        self.lifetime[kind.index()]
    }

    /// Format tick counts as a human-readable string
    pub fn format(&self) -> String {
        let stages = StageKind::ALL
            .iter()
            .map(|kind| {
                format!(
                    "{}: {} ({} since reset)",
                    kind,
                    self.lifetime[kind.index()],
                    self.since_reset[kind.index()]
                )
            })
            .collect::<Vec<_>>()
            .join(", ");
        format!(
            "{}, Throughput: {:.2} chars/s, Elapsed: {:.2}s",
            stages,
            self.throughput_cps,
            self.elapsed.as_secs_f64()
        )
    }
}
