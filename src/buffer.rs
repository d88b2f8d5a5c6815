use crate::error::{PipelineError, Result};
use crossbeam::utils::CachePadded;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// Fixed-capacity circular buffer indexed by an external cursor
///
/// The buffer itself imposes no ordering: which slot may be written or read
/// is decided by the handshake between the producer and its consumers.
/// Each slot sits behind its own lock so a read can never observe a torn
/// value, but under the handshake those locks are never contended.
#[derive(Debug)]
pub struct CircularBuffer<T: Copy + Default> {
    slots: Box<[Mutex<T>]>,
}

impl<T: Copy + Default> CircularBuffer<T> {
    /// Create a buffer with `capacity` slots
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(PipelineError::Config(
                "buffer capacity must be greater than 0".into(),
            ));
        }
        Ok(Self {
            slots: (0..capacity).map(|_| Mutex::new(T::default())).collect(),
        })
    }

    /// Number of slots
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Slot index used for a given cursor value
    pub fn slot_index(&self, cursor: u64) -> usize {
        (cursor % self.slots.len() as u64) as usize
    }

    /// Store `value` in the slot selected by `cursor`
    pub fn write(&self, cursor: u64, value: T) {
        *self.slots[self.slot_index(cursor)].lock() = value;
    }

    /// Read the slot selected by `cursor`
    pub fn read(&self, cursor: u64) -> T {
        *self.slots[self.slot_index(cursor)].lock()
    }
}

#[derive(Debug, Default)]
struct CursorState {
    value: CachePadded<AtomicU64>,
    rewind_requested: AtomicBool,
}

/// Create a cursor, returning the single writable handle and a read-only view
pub fn cursor() -> (CursorOwner, CursorView) {
    let state = Arc::new(CursorState::default());
    (
        CursorOwner {
            state: Arc::clone(&state),
        },
        CursorView { state },
    )
}

/// Exclusive, writable handle to a cursor, held by the producing stage
///
/// Not `Clone`: exactly one stage can advance a given cursor.
#[derive(Debug)]
pub struct CursorOwner {
    state: Arc<CursorState>,
}

impl CursorOwner {
    /// Start a cycle and return the cursor value to write at
    ///
    /// A rewind requested by a reset takes effect here, before the slot is
    /// written and before any consumer is told to read it.
    pub fn begin_cycle(&mut self) -> u64 {
        if self.state.rewind_requested.swap(false, Ordering::AcqRel) {
            self.state.value.store(0, Ordering::Release);
        }
        self.state.value.load(Ordering::Acquire)
    }

    /// Move to the next slot once every consumer has acknowledged the current one
    pub fn advance(&mut self) {
        self.state.value.fetch_add(1, Ordering::AcqRel);
    }

    pub fn get(&self) -> u64 {
        self.state.value.load(Ordering::Acquire)
    }
}

/// Read-only view of a cursor, handed to consumer stages
///
/// Only meaningful after the consumer has seen "slot ready": the owner does
/// not move the cursor between publishing a slot and receiving every release.
#[derive(Debug, Clone)]
pub struct CursorView {
    state: Arc<CursorState>,
}

impl CursorView {
    pub fn get(&self) -> u64 {
        self.state.value.load(Ordering::Acquire)
    }

    /// Ask the owner to restart from zero at the beginning of its next cycle
    pub(crate) fn request_rewind(&self) {
        self.state.rewind_requested.store(true, Ordering::Release);
    }

    /// Whether a rewind is waiting for the owner's next cycle
    pub fn rewind_pending(&self) -> bool {
        self.state.rewind_requested.load(Ordering::Acquire)
    }
}
