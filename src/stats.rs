//! Character statistics for the input and output streams.
//!
//! The accounting stages add to a [`Tally`]; a reset takes both tallies as
//! one [`CountSnapshot`] and hands it to a [`CountLog`].

use crate::transform::ALPHABET_LEN;
use parking_lot::Mutex;
use std::fmt::Write as _;
use std::io::{self, BufWriter, Write};
use std::sync::Arc;

/// Total character count plus case-insensitive letter frequencies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Tally {
    total: u64,
    letters: [u64; ALPHABET_LEN as usize],
}

impl Tally {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one character
    pub fn record(&mut self, byte: u8) {
        self.total += 1;
        if byte.is_ascii_alphabetic() {
            self.letters[(byte.to_ascii_uppercase() - b'A') as usize] += 1;
        }
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    /// Occurrences of `letter`, ignoring case; zero for non-letters
    pub fn letter(&self, letter: u8) -> u64 {
        if letter.is_ascii_alphabetic() {
            self.letters[(letter.to_ascii_uppercase() - b'A') as usize]
        } else {
            0
        }
    }

    /// Letter counts in alphabetical order, skipping letters never seen
    pub fn letters(&self) -> impl Iterator<Item = (char, u64)> + '_ {
        self.letters
            .iter()
            .enumerate()
            .filter(|(_, count)| **count > 0)
            .map(|(i, count)| ((b'A' + i as u8) as char, *count))
    }

    fn format_line(&self, label: &str) -> String {
        let mut line = format!("Total {} count: {}", label, self.total);
        for (letter, count) in self.letters() {
            let _ = write!(line, " {}:{}", letter, count);
        }
        line
    }
}

/// Statistics accumulated for one reset window
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CountSnapshot {
    /// 1-based flush number over the lifetime of the pipeline
    pub sequence: u64,
    pub input: Tally,
    pub output: Tally,
}

impl CountSnapshot {
    /// Format the snapshot as a human-readable report
    pub fn format(&self) -> String {
        format!(
            "Flush #{}\n{}\n{}\n",
            self.sequence,
            self.input.format_line("input"),
            self.output.format_line("output")
        )
    }
}

/// One tally, written only by its accounting stage and drained by a reset
#[derive(Debug, Clone, Default)]
pub struct Accumulator {
    tally: Arc<Mutex<Tally>>,
}

impl Accumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, byte: u8) {
        self.tally.lock().record(byte);
    }

    /// Current tally without clearing it
    pub fn peek(&self) -> Tally {
        *self.tally.lock()
    }

    /// Read and zero the tally in one step
    pub fn take(&self) -> Tally {
        std::mem::take(&mut *self.tally.lock())
    }
}

/// Durable destination for count snapshots
pub trait CountLog: Send + 'static {
    fn flush(&mut self, snapshot: &CountSnapshot) -> io::Result<()>;
}

/// Appends formatted reports to any writer (typically the log file)
pub struct WriterLog<W: Write> {
    writer: BufWriter<W>,
}

impl<W: Write> WriterLog<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: BufWriter::new(writer),
        }
    }
}

impl<W: Write + Send + 'static> CountLog for WriterLog<W> {
    fn flush(&mut self, snapshot: &CountSnapshot) -> io::Result<()> {
        self.writer.write_all(snapshot.format().as_bytes())?;
        self.writer.flush()
    }
}

/// Keeps every snapshot in memory; clones share the same record
#[derive(Debug, Clone, Default)]
pub struct MemoryLog {
    snapshots: Arc<Mutex<Vec<CountSnapshot>>>,
}

impl MemoryLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshots(&self) -> Vec<CountSnapshot> {
        self.snapshots.lock().clone()
    }

    /// Sum of input totals over all flushes
    pub fn total_input(&self) -> u64 {
        self.snapshots.lock().iter().map(|s| s.input.total()).sum()
    }

    /// Sum of output totals over all flushes
    pub fn total_output(&self) -> u64 {
        self.snapshots.lock().iter().map(|s| s.output.total()).sum()
    }
}

impl CountLog for MemoryLog {
    fn flush(&mut self, snapshot: &CountSnapshot) -> io::Result<()> {
        self.snapshots.lock().push(snapshot.clone());
        Ok(())
    }
}
