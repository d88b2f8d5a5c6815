//! Character sources and sinks at the two ends of the pipeline.
//!
//! A source hands out one [`Symbol`] per call and keeps returning
//! [`Symbol::End`] once the stream is exhausted. A sink receives every
//! transformed character in output order, followed by a single `finish`.

use crossbeam::channel::Receiver;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::io::{self, BufReader, BufWriter, ErrorKind, Read, Write};
use std::sync::Arc;

/// One element travelling through the circular buffers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Symbol {
    /// A data character
    Char(u8),
    /// End-of-stream marker
    #[default]
    End,
}

impl Symbol {
    /// Whether this is the end-of-stream marker
    pub fn is_end(&self) -> bool {
        matches!(self, Symbol::End)
    }

    /// Apply `f` to a data character; the end marker passes through untouched
    pub fn map<F: FnOnce(u8) -> u8>(self, f: F) -> Symbol {
        match self {
            Symbol::Char(c) => Symbol::Char(f(c)),
            Symbol::End => Symbol::End,
        }
    }
}

impl From<Option<u8>> for Symbol {
    fn from(value: Option<u8>) -> Self {
        value.map_or(Symbol::End, Symbol::Char)
    }
}

/// Blocking producer of input characters
pub trait CharSource: Send + 'static {
    /// Fetch the next character, or [`Symbol::End`] once the stream is exhausted.
    ///
    /// Must keep returning `End` on every call after the first one.
    fn next_symbol(&mut self) -> io::Result<Symbol>;
}

/// Blocking consumer of output characters
pub trait CharSink: Send + 'static {
    /// Deliver one transformed character
    fn emit(&mut self, byte: u8) -> io::Result<()>;

    /// Called once after the end marker has been observed
    fn finish(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Reads bytes from any [`Read`] implementation
pub struct ReaderSource<R: Read> {
    reader: BufReader<R>,
    exhausted: bool,
}

impl<R: Read> ReaderSource<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader: BufReader::new(reader),
            exhausted: false,
        }
    }
}

impl<R: Read + Send + 'static> CharSource for ReaderSource<R> {
    fn next_symbol(&mut self) -> io::Result<Symbol> {
        if self.exhausted {
            return Ok(Symbol::End);
        }
        let mut byte = [0u8; 1];
        loop {
            match self.reader.read(&mut byte) {
                Ok(0) => {
                    self.exhausted = true;
                    return Ok(Symbol::End);
                }
                Ok(_) => return Ok(Symbol::Char(byte[0])),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.exhausted = true;
                    return Err(e);
                }
            }
        }
    }
}

/// In-memory byte sequence
#[derive(Debug, Clone, Default)]
pub struct BytesSource {
    bytes: VecDeque<u8>,
}

impl BytesSource {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            bytes: bytes.into().into(),
        }
    }
}

impl CharSource for BytesSource {
    fn next_symbol(&mut self) -> io::Result<Symbol> {
        Ok(self.bytes.pop_front().into())
    }
}

/// Bytes delivered over a channel; a disconnected channel ends the stream
pub struct ChannelSource {
    receiver: Receiver<u8>,
}

impl ChannelSource {
    pub fn new(receiver: Receiver<u8>) -> Self {
        Self { receiver }
    }
}

impl CharSource for ChannelSource {
    fn next_symbol(&mut self) -> io::Result<Symbol> {
        Ok(self.receiver.recv().ok().into())
    }
}

/// Writes characters to any [`Write`] implementation, flushed on finish
pub struct WriterSink<W: Write> {
    writer: BufWriter<W>,
}

impl<W: Write> WriterSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: BufWriter::new(writer),
        }
    }
}

impl<W: Write + Send + 'static> CharSink for WriterSink<W> {
    fn emit(&mut self, byte: u8) -> io::Result<()> {
        self.writer.write_all(&[byte])
    }

    fn finish(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}

/// Collects output into a shared buffer that can be inspected while running
#[derive(Debug, Clone, Default)]
pub struct SharedSink {
    bytes: Arc<Mutex<Vec<u8>>>,
}

impl SharedSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of everything emitted so far
    pub fn contents(&self) -> Vec<u8> {
        self.bytes.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.bytes.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.lock().is_empty()
    }
}

impl CharSink for SharedSink {
    fn emit(&mut self, byte: u8) -> io::Result<()> {
        self.bytes.lock().push(byte);
        Ok(())
    }
}
