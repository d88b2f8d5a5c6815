use crate::buffer::{cursor, CircularBuffer};
use crate::error::{PipelineError, Result};
use crate::handshake::{FanOut, SlotLink};
use crate::io::{CharSink, CharSource, Symbol};
use crate::metrics::{StageKind, StageTicks, TickSnapshot};
use crate::reset::{PauseGate, ResetCoordinator, ResetParts};
use crate::stage::{
    AccountingStage, SinkStage, SlotReader, SourceStage, StageOutcome, TransformStage,
};
use crate::stats::{Accumulator, CountLog, CountSnapshot};
use crate::transform::Transform;
use std::sync::Arc;
use std::thread::{Builder, JoinHandle};
use tracing::{debug, error, info, warn};

/// Capacity used when the builder is not told otherwise
pub const DEFAULT_CAPACITY: usize = 8;

type StageRun = Box<dyn FnOnce() -> StageOutcome + Send>;

/// Builder for constructing pipelines
#[derive(Debug, Clone)]
pub struct PipelineBuilder {
    input_capacity: usize,
    output_capacity: usize,
}

impl PipelineBuilder {
    /// Create a new pipeline builder
    pub fn new() -> Self {
        Self {
            input_capacity: DEFAULT_CAPACITY,
            output_capacity: DEFAULT_CAPACITY,
        }
    }

    /// Number of slots in the buffer between the source and its consumers
    pub fn input_capacity(mut self, capacity: usize) -> Self {
        self.input_capacity = capacity;
        self
    }

    /// Number of slots in the buffer between the transform and its consumers
    pub fn output_capacity(mut self, capacity: usize) -> Self {
        self.output_capacity = capacity;
        self
    }

    /// Build the pipeline
    pub fn build(self) -> Result<Pipeline> {
        let input_buffer = CircularBuffer::new(self.input_capacity).map_err(|_| {
            PipelineError::Config(format!(
                "input buffer capacity must be greater than 0, got {}",
                self.input_capacity
            ))
        })?;
        let output_buffer = CircularBuffer::new(self.output_capacity).map_err(|_| {
            PipelineError::Config(format!(
                "output buffer capacity must be greater than 0, got {}",
                self.output_capacity
            ))
        })?;

        Ok(Pipeline {
            input_buffer: Arc::new(input_buffer),
            output_buffer: Arc::new(output_buffer),
            ticks: StageTicks::new(),
        })
    }
}

impl Default for PipelineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A configured pipeline that has not been started yet
pub struct Pipeline {
    input_buffer: Arc<CircularBuffer<Symbol>>,
    output_buffer: Arc<CircularBuffer<Symbol>>,
    ticks: StageTicks,
}

impl Pipeline {
    pub fn input_capacity(&self) -> usize {
        self.input_buffer.capacity()
    }

    pub fn output_capacity(&self) -> usize {
        self.output_buffer.capacity()
    }

    /// Spawn the five stage threads
    ///
    /// `log` receives one snapshot per reset and a final one from
    /// [`RunningPipeline::wait`].
    pub fn start<S, K, L>(
        self,
        source: S,
        transform: Arc<dyn Transform>,
        sink: K,
        log: L,
    ) -> Result<RunningPipeline>
    where
        S: CharSource,
        K: CharSink,
        L: CountLog,
    {
        self.start_with(source, transform, sink, log, spawn_stage)
    }

    fn start_with<S, K, L, F>(
        self,
        source: S,
        transform: Arc<dyn Transform>,
        sink: K,
        log: L,
        mut spawn: F,
    ) -> Result<RunningPipeline>
    where
        S: CharSource,
        K: CharSink,
        L: CountLog,
        F: FnMut(StageKind, StageRun) -> Result<JoinHandle<StageOutcome>>,
    {
        let (input_owner, input_view) = cursor();
        let (output_owner, output_view) = cursor();

        let to_input_accounting = Arc::new(SlotLink::new(StageKind::InputAccounting.name()));
        let to_transform = Arc::new(SlotLink::new(StageKind::Transform.name()));
        let to_output_accounting = Arc::new(SlotLink::new(StageKind::OutputAccounting.name()));
        let to_sink = Arc::new(SlotLink::new(StageKind::Sink.name()));

        let input_stats = Accumulator::new();
        let output_stats = Accumulator::new();
        let gate = Arc::new(PauseGate::new());

        let coordinator = Arc::new(ResetCoordinator::new(ResetParts {
            gate: Arc::clone(&gate),
            ticks: self.ticks.clone(),
            input_stats: input_stats.clone(),
            output_stats: output_stats.clone(),
            input_cursor: input_view.clone(),
            output_cursor: output_view.clone(),
            log: Box::new(log),
        }));

        let source_stage = SourceStage {
            source: Box::new(source),
            buffer: Arc::clone(&self.input_buffer),
            cursor: input_owner,
            consumers: FanOut::new(vec![
                Arc::clone(&to_input_accounting),
                Arc::clone(&to_transform),
            ]),
            gate,
            ticks: self.ticks.clone(),
        };
        let input_accounting = AccountingStage {
            kind: StageKind::InputAccounting,
            reader: SlotReader::new(
                Arc::clone(&to_input_accounting),
                Arc::clone(&self.input_buffer),
                input_view.clone(),
            ),
            stats: input_stats,
            ticks: self.ticks.clone(),
        };
        let transform_stage = TransformStage {
            reader: SlotReader::new(
                Arc::clone(&to_transform),
                Arc::clone(&self.input_buffer),
                input_view,
            ),
            transform,
            buffer: Arc::clone(&self.output_buffer),
            cursor: output_owner,
            consumers: FanOut::new(vec![
                Arc::clone(&to_output_accounting),
                Arc::clone(&to_sink),
            ]),
            ticks: self.ticks.clone(),
        };
        let output_accounting = AccountingStage {
            kind: StageKind::OutputAccounting,
            reader: SlotReader::new(
                Arc::clone(&to_output_accounting),
                Arc::clone(&self.output_buffer),
                output_view.clone(),
            ),
            stats: output_stats,
            ticks: self.ticks.clone(),
        };
        let sink_stage = SinkStage {
            reader: SlotReader::new(
                Arc::clone(&to_sink),
                Arc::clone(&self.output_buffer),
                output_view,
            ),
            sink: Box::new(sink),
            ticks: self.ticks.clone(),
        };

        debug!(
            "Starting pipeline with input capacity {} and output capacity {}",
            self.input_capacity(),
            self.output_capacity()
        );

        // Consumers first: if a spawn fails, nothing upstream of the running
        // stages has started, so each of them is parked on its first slot.
        let stages: [(StageKind, StageRun); 5] = [
            (StageKind::Sink, Box::new(move || sink_stage.run())),
            (
                StageKind::OutputAccounting,
                Box::new(move || output_accounting.run()),
            ),
            (StageKind::Transform, Box::new(move || transform_stage.run())),
            (
                StageKind::InputAccounting,
                Box::new(move || input_accounting.run()),
            ),
            (StageKind::Source, Box::new(move || source_stage.run())),
        ];

        let mut started = Vec::with_capacity(stages.len());
        let mut handles = Vec::with_capacity(stages.len());
        for (kind, run) in stages {
            match spawn(kind, run) {
                Ok(handle) => {
                    started.push(kind);
                    handles.push(handle);
                }
                Err(e) => {
                    warn!(
                        "Failed to start the {} stage, stopping {} started stages",
                        kind,
                        started.len()
                    );
                    // Hand the first slot to the parked stages as an end marker
                    if started.contains(&StageKind::Transform) {
                        self.input_buffer.write(0, Symbol::End);
                        to_transform.signal_ready();
                        if started.contains(&StageKind::InputAccounting) {
                            to_input_accounting.signal_ready();
                        }
                    } else {
                        self.output_buffer.write(0, Symbol::End);
                        for (kind, link) in [
                            (StageKind::Sink, &to_sink),
                            (StageKind::OutputAccounting, &to_output_accounting),
                        ] {
                            if started.contains(&kind) {
                                link.signal_ready();
                            }
                        }
                    }
                    for handle in handles {
                        let _ = handle.join();
                    }
                    return Err(e);
                }
            }
        }

        Ok(RunningPipeline {
            handles,
            coordinator,
            ticks: self.ticks,
        })
    }
}

fn spawn_stage(kind: StageKind, run: StageRun) -> Result<JoinHandle<StageOutcome>> {
    Builder::new()
        .name(kind.name().into())
        .spawn(run)
        .map_err(|e| PipelineError::ThreadError(format!("failed to spawn {}: {}", kind, e)))
}

/// A running pipeline that can be reset and waited on
pub struct RunningPipeline {
    handles: Vec<JoinHandle<StageOutcome>>,
    coordinator: Arc<ResetCoordinator>,
    ticks: StageTicks,
}

impl RunningPipeline {
    /// Shared handle for requesting resets from any thread
    pub fn coordinator(&self) -> Arc<ResetCoordinator> {
        Arc::clone(&self.coordinator)
    }

    pub fn ticks(&self) -> &StageTicks {
        &self.ticks
    }

    /// Whether every stage has processed the end marker
    pub fn is_finished(&self) -> bool {
        self.handles.iter().all(|handle| handle.is_finished())
    }

    /// Wait for the end marker to drain through every stage, then flush the
    /// remaining counts
    ///
    /// Every stage is joined and the final flush happens even when a stage
    /// failed; the failure is returned afterwards. A stage thread that
    /// panicked outright takes precedence over errors the stages reported.
    pub fn wait(self) -> Result<RunReport> {
        let mut outcomes = Vec::with_capacity(self.handles.len());
        let mut panicked = Vec::new();
        for handle in self.handles {
            let name = handle.thread().name().unwrap_or("stage").to_string();
            match handle.join() {
                Ok(outcome) => outcomes.push(outcome),
                Err(_) => {
                    error!("Stage thread {} panicked", name);
                    panicked.push(name);
                }
            }
        }

        let final_flush = self.coordinator.final_flush();

        let mut report = RunReport {
            characters_read: 0,
            characters_emitted: 0,
            resets: self.coordinator.resets(),
            flushes: self.coordinator.flushes(),
            final_snapshot: None,
            ticks: self.ticks.snapshot(),
        };
        let mut first_error = None;
        for outcome in outcomes {
            match outcome.kind {
                StageKind::Source => report.characters_read = outcome.characters,
                StageKind::Sink => report.characters_emitted = outcome.characters,
                _ => {}
            }
            if first_error.is_none() {
                first_error = outcome.error;
            }
        }
        if !panicked.is_empty() {
            return Err(PipelineError::ThreadError(format!(
                "stage panicked: {}",
                panicked.join(", ")
            )));
        }
        if let Some(e) = first_error {
            return Err(e);
        }

        report.final_snapshot = Some(final_flush?);
        info!("Pipeline finished: {}", report.format());
        Ok(report)
    }
}

/// Totals for a completed run
#[derive(Debug, Clone)]
pub struct RunReport {
    pub characters_read: u64,
    pub characters_emitted: u64,
    /// Resets that flushed counts (not counting the final flush)
    pub resets: u64,
    /// Snapshots handed to the count log, including the final one
    pub flushes: u64,
    pub final_snapshot: Option<CountSnapshot>,
    pub ticks: TickSnapshot,
}

impl RunReport {
    pub fn format(&self) -> String {
        format!(
            "Read: {}, Emitted: {}, Resets: {}, Flushes: {}",
            self.characters_read, self.characters_emitted, self.resets, self.flushes
        )
    }
}
