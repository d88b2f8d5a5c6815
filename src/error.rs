use thiserror::Error;

/// Result type for character pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Errors that can occur while building or running a pipeline
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Configuration error (buffer capacities, CLI values)
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O failure reported by a source, sink or count log
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A collaborator panicked inside a running stage
    #[error("Stage execution failed: {0}")]
    StageError(String),

    /// Thread spawn or join error
    #[error("Thread error: {0}")]
    ThreadError(String),
}
