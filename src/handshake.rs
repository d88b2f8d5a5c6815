//! Slot handshake between a producer stage and its consumers.
//!
//! Every producer → consumer edge is a [`SlotLink`]: the producer posts
//! "slot ready" after writing a slot, the consumer posts "slot released"
//! after reading it. A producer with several consumers owns one link per
//! consumer and waits on every link's release before it advances its cursor.

use parking_lot::{Condvar, Mutex};
use std::sync::Arc;

/// Counting semaphore built on a mutex and condition variable
#[derive(Debug, Default)]
pub struct Semaphore {
    permits: Mutex<usize>,
    available: Condvar,
}

impl Semaphore {
    /// Create a semaphore holding `permits` initial permits
    pub fn new(permits: usize) -> Self {
        Self {
            permits: Mutex::new(permits),
            available: Condvar::new(),
        }
    }

    /// Release one permit, waking a single waiter
    pub fn post(&self) {
        let mut permits = self.permits.lock();
        *permits += 1;
        self.available.notify_one();
    }

    /// Block until a permit is available, then take it
    pub fn wait(&self) {
        let mut permits = self.permits.lock();
        while *permits == 0 {
            self.available.wait(&mut permits);
        }
        *permits -= 1;
    }

    /// Take a permit if one is available without blocking
    pub fn try_wait(&self) -> bool {
        let mut permits = self.permits.lock();
        if *permits == 0 {
            return false;
        }
        *permits -= 1;
        true
    }

    /// Current number of permits
    pub fn permits(&self) -> usize {
        *self.permits.lock()
    }
}

/// The ready/released pair for one producer → consumer edge
#[derive(Debug)]
pub struct SlotLink {
    name: &'static str,
    ready: Semaphore,
    released: Semaphore,
}

impl SlotLink {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            ready: Semaphore::new(0),
            released: Semaphore::new(0),
        }
    }

    /// Name of the consumer on the far end of this link
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Producer side: the current slot holds a fresh element
    pub fn signal_ready(&self) {
        self.ready.post();
    }

    /// Consumer side: block until the producer publishes a slot
    pub fn wait_ready(&self) {
        self.ready.wait();
    }

    /// Consumer side: done reading the current slot
    pub fn signal_released(&self) {
        self.released.post();
    }

    /// Producer side: block until the consumer has read the current slot
    pub fn wait_released(&self) {
        self.released.wait();
    }
}

/// Producer's view of its consumers: one independent link per named consumer
#[derive(Debug, Clone)]
pub struct FanOut {
    links: Vec<Arc<SlotLink>>,
}

impl FanOut {
    pub fn new(links: Vec<Arc<SlotLink>>) -> Self {
        Self { links }
    }

    /// Signal "slot ready" to every consumer
    pub fn publish(&self) {
        for link in &self.links {
            link.signal_ready();
        }
    }

    /// Wait for "slot released" from every consumer
    pub fn await_release(&self) {
        for link in &self.links {
            link.wait_released();
        }
    }

    pub fn consumers(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.links.iter().map(|link| link.name())
    }
}
