//! A bounded, multi-stage thread pipeline with cooperative termination.
//!
//! Producer threads read records from their sources into a bounded queue.
//! Stages of worker threads pop, process and push downstream, and a sink on
//! the calling thread drains the final queue. The run ends exactly once,
//! after every upstream thread is done, without losing or duplicating data.
//!
//! # Features
//!
//! - Blocking bounded queues (mutex plus two condition variables) with
//!   idempotent half-close and abort
//! - Termination gates: the last feeder of a queue closes it, poisons it with
//!   one end-of-stream marker per consumer, or both
//! - RAII feeder handles, so a finished or panicking thread always releases
//!   its gate
//! - Typed builder: producers, any number of stages, then a sink
//! - Cancellation, per-stage metrics and a serialized line report
//!
//! # Example
//!
//! ```no_run
//! use bounded_pipeline::{sink, EventLog, FilterStage, IterSource, PipelineBuilder};
//!
//! let report = PipelineBuilder::new()
//!     .event_log(EventLog::stdout())
//!     .producers(vec![IterSource::new(vec![3i64, -1, 4]), IterSource::new(vec![1, 5])])?
//!     .stage("worker", 2, |_| FilterStage::new("non_negative", |v: &i64| *v >= 0))?
//!     .run(sink::Count::new())?;
//!
//! assert_eq!(report.output, 4);
//! # Ok::<(), bounded_pipeline::PipelineError>(())
//! ```

pub mod buffer;
pub mod cancel;
pub mod config;
pub mod error;
pub mod event_log;
pub mod gate;
pub mod metrics;
pub mod pipeline;
pub mod record;
pub mod sink;
pub mod source;
pub mod stage;

// Re-exports for convenience
pub use buffer::{BoundedQueue, PushStatus, TryPushError};
pub use cancel::CancellationToken;
pub use config::{CliArgs, PipelineConfig};
pub use error::{PipelineError, RecordError, Result};
pub use event_log::EventLog;
pub use gate::{CloseStrategy, Feeder, FeederGroup, TerminationGate};
pub use metrics::{MetricsSnapshot, StageMetrics};
pub use pipeline::{
    PipelineBuilder, PipelineReport, PipelineState, PipelineStatus, QueueReport, StageBuilder,
    StageReport,
};
pub use record::{Message, ProducerId, Record};
pub use sink::Sink;
pub use source::{ChunkParseFn, ChunkSource, IterSource, LineSource, ParseFn, Source};
pub use stage::{FilterStage, FnStage, MapStage, PassthroughStage, Stage, StageResult, StageRunner};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
