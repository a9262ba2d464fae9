use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for pipeline setup and run operations
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Fatal errors: raised while setting a pipeline up, before any of its
/// threads are running, or when joining a thread that panicked
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Invalid capacity, worker count or other configuration value
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid command line
    #[error("Usage: {0}")]
    Usage(String),

    /// An input could not be opened
    #[error("Cannot open input '{}': {source}", path.display())]
    Input {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Pipeline has no producers to run
    #[error("Cannot run pipeline with no producers")]
    NoProducers,

    /// The OS refused to create a thread
    #[error("Failed to spawn thread '{name}': {source}")]
    Spawn {
        name: String,
        #[source]
        source: io::Error,
    },

    /// A producer or worker thread panicked
    #[error("Thread '{0}' panicked")]
    ThreadPanicked(String),
}

/// Errors scoped to a single record. They are logged by the thread that hit
/// them and the record is dropped; the pipeline keeps running.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RecordError {
    /// Raw input could not be turned into a payload
    #[error("line {line}: {reason}")]
    Parse { line: u64, reason: String },

    /// A fixed-size binary record could not be turned into a payload
    #[error("record {record}: {reason}")]
    Decode { record: u64, reason: String },

    /// The payload was well-formed but refused by a stage
    #[error("rejected: {0}")]
    Rejected(String),

    /// Processing failed for this record
    #[error("processing failed: {0}")]
    Processing(String),
}

impl RecordError {
    /// Shorthand for a parse error without a line number
    pub fn parse(reason: impl Into<String>) -> Self {
        RecordError::Parse {
            line: 0,
            reason: reason.into(),
        }
    }

    /// Attach a line number to a parse error; other variants are unchanged
    pub fn at_line(self, line: u64) -> Self {
        match self {
            RecordError::Parse { reason, .. } => RecordError::Parse { line, reason },
            other => other,
        }
    }

    /// Turn a parse error into a [`RecordError::Decode`] of binary record
    /// `record`; other variants are unchanged
    pub fn at_record(self, record: u64) -> Self {
        match self {
            RecordError::Parse { reason, .. } | RecordError::Decode { reason, .. } => {
                RecordError::Decode { record, reason }
            }
            other => other,
        }
    }
}
