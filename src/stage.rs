use crate::buffer::{CircularBuffer, CursorOwner, CursorView};
use crate::error::{PipelineError, Result};
use crate::handshake::{FanOut, SlotLink};
use crate::io::{CharSink, CharSource, Symbol};
use crate::metrics::{StageKind, StageTicks};
use crate::reset::PauseGate;
use crate::stats::Accumulator;
use crate::transform::Transform;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, error, trace, warn};

/// What a stage reports once it has processed the end marker
#[derive(Debug)]
pub struct StageOutcome {
    pub kind: StageKind,
    /// Data characters handled (the end marker is not counted)
    pub characters: u64,
    /// First error the stage ran into: a failed read or write, or a panic
    /// inside a collaborator
    pub error: Option<PipelineError>,
}

impl StageOutcome {
    fn new(kind: StageKind) -> Self {
        Self {
            kind,
            characters: 0,
            error: None,
        }
    }

    fn finished(self, ticks: &StageTicks) -> Self {
        ticks.stage(self.kind).close();
        debug!(
            "Stage {} finished after {} characters",
            self.kind, self.characters
        );
        self
    }
}

/// Call into a collaborator, turning a panic into a stage error
fn guarded<T>(kind: StageKind, call: impl FnOnce() -> T) -> Result<T> {
    panic::catch_unwind(AssertUnwindSafe(call)).map_err(|payload| {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".into());
        error!("Collaborator of the {} stage panicked: {}", kind, message);
        PipelineError::StageError(format!("{} panicked: {}", kind, message))
    })
}

/// Consumer end of one slot handshake
pub(crate) struct SlotReader {
    link: Arc<SlotLink>,
    buffer: Arc<CircularBuffer<Symbol>>,
    cursor: CursorView,
}

impl SlotReader {
    pub fn new(
        link: Arc<SlotLink>,
        buffer: Arc<CircularBuffer<Symbol>>,
        cursor: CursorView,
    ) -> Self {
        Self {
            link,
            buffer,
            cursor,
        }
    }

    /// Wait for the producer's next slot, copy it out and release it
    fn next(&self) -> Symbol {
        self.link.wait_ready();
        let symbol = self.buffer.read(self.cursor.get());
        self.link.signal_released();
        symbol
    }
}

/// Reads characters and publishes them into the input buffer
pub(crate) struct SourceStage {
    pub source: Box<dyn CharSource>,
    pub buffer: Arc<CircularBuffer<Symbol>>,
    pub cursor: CursorOwner,
    pub consumers: FanOut,
    pub gate: Arc<PauseGate>,
    pub ticks: StageTicks,
}

impl SourceStage {
    pub fn run(mut self) -> StageOutcome {
        let mut outcome = StageOutcome::new(StageKind::Source);
        debug!(
            "Source publishing to {:?}",
            self.consumers.consumers().collect::<Vec<_>>()
        );

        loop {
            let permit = self.gate.enter();
            let position = self.cursor.begin_cycle();

            let read = guarded(StageKind::Source, || self.source.next_symbol())
                .and_then(|read| read.map_err(PipelineError::from));
            let symbol = match read {
                Ok(symbol) => symbol,
                Err(e) => {
                    warn!("Source read failed, ending stream: {}", e);
                    outcome.error.get_or_insert(e);
                    Symbol::End
                }
            };
            trace!("Source cycle {}: {:?}", position, symbol);

            self.buffer.write(position, symbol);
            self.consumers.publish();
            self.consumers.await_release();
            self.cursor.advance();
            self.ticks.stage(StageKind::Source).tick();

            if symbol.is_end() {
                self.gate.mark_end_of_stream();
                PauseGate::leave(permit);
                return outcome.finished(&self.ticks);
            }
            outcome.characters += 1;
            PauseGate::leave(permit);
        }
    }
}

/// Counts every character of one buffer into an accumulator
pub(crate) struct AccountingStage {
    pub kind: StageKind,
    pub reader: SlotReader,
    pub stats: Accumulator,
    pub ticks: StageTicks,
}

impl AccountingStage {
    pub fn run(self) -> StageOutcome {
        let mut outcome = StageOutcome::new(self.kind);
        loop {
            let symbol = self.reader.next();
            if let Symbol::Char(byte) = symbol {
                self.stats.record(byte);
                outcome.characters += 1;
            }
            self.ticks.stage(self.kind).tick();

            if symbol.is_end() {
                return outcome.finished(&self.ticks);
            }
        }
    }
}

/// Applies the transform and publishes results into the output buffer
pub(crate) struct TransformStage {
    pub reader: SlotReader,
    pub transform: Arc<dyn Transform>,
    pub buffer: Arc<CircularBuffer<Symbol>>,
    pub cursor: CursorOwner,
    pub consumers: FanOut,
    pub ticks: StageTicks,
}

impl TransformStage {
    pub fn run(mut self) -> StageOutcome {
        let mut outcome = StageOutcome::new(StageKind::Transform);
        debug!("Transform stage using {}", self.transform.name());
        // Set once the output side has been sent an early end marker
        let mut output_closed = false;

        loop {
            let symbol = self.reader.next();

            // Keep releasing input slots so the source can run to its end
            if output_closed {
                self.ticks.stage(StageKind::Transform).tick();
                if symbol.is_end() {
                    return outcome.finished(&self.ticks);
                }
                continue;
            }

            let transformed = match symbol {
                Symbol::Char(byte) => {
                    match guarded(StageKind::Transform, || self.transform.apply(byte)) {
                        Ok(byte) => Symbol::Char(byte),
                        Err(e) => {
                            warn!("Transform failed, closing the output side: {}", e);
                            outcome.error = Some(e);
                            Symbol::End
                        }
                    }
                }
                Symbol::End => Symbol::End,
            };

            let position = self.cursor.begin_cycle();
            self.buffer.write(position, transformed);
            self.consumers.publish();
            self.consumers.await_release();
            self.cursor.advance();
            self.ticks.stage(StageKind::Transform).tick();

            if symbol.is_end() {
                return outcome.finished(&self.ticks);
            }
            if transformed.is_end() {
                output_closed = true;
                continue;
            }
            outcome.characters += 1;
        }
    }
}

/// Delivers transformed characters to the output collaborator
pub(crate) struct SinkStage {
    pub reader: SlotReader,
    pub sink: Box<dyn CharSink>,
    pub ticks: StageTicks,
}

impl SinkStage {
    pub fn run(mut self) -> StageOutcome {
        let mut outcome = StageOutcome::new(StageKind::Sink);
        loop {
            let symbol = self.reader.next();
            match symbol {
                // After a write failure output is discarded, but every slot is
                // still released so the transform stage never stalls.
                Symbol::Char(byte) if outcome.error.is_none() => {
                    let written = guarded(StageKind::Sink, || self.sink.emit(byte))
                        .and_then(|written| written.map_err(PipelineError::from));
                    if let Err(e) = written {
                        warn!("Sink write failed, discarding further output: {}", e);
                        outcome.error = Some(e);
                    } else {
                        outcome.characters += 1;
                    }
                }
                Symbol::Char(_) => {}
                Symbol::End => {
                    if outcome.error.is_none() {
                        let finished = guarded(StageKind::Sink, || self.sink.finish())
                            .and_then(|finished| finished.map_err(PipelineError::from));
                        if let Err(e) = finished {
                            warn!("Sink flush failed: {}", e);
                            outcome.error = Some(e);
                        }
                    }
                }
            }
            self.ticks.stage(StageKind::Sink).tick();

            if symbol.is_end() {
                return outcome.finished(&self.ticks);
            }
        }
    }
}
