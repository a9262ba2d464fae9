use crate::buffer::{BoundedQueue, PushStatus};
use crate::error::RecordError;
use crate::event_log::EventLog;
use crate::gate::Feeder;
use crate::metrics::StageMetrics;
use crate::record::{Message, Record};
use std::marker::PhantomData;
use std::time::Instant;
use tracing::{info, warn};

/// Outcome of processing one record: forward it, drop it (`Ok(None)`), or
/// report a record-level failure (the record is dropped as well)
pub type StageResult<O> = std::result::Result<Option<Record<O>>, RecordError>;

/// Trait for a processing stage in the pipeline.
///
/// Each worker thread owns its own instance, so `&mut self` state is local
/// to that worker. Anything aggregated across workers belongs in the sink.
pub trait Stage<I, O>: Send + 'static {
    /// Process one record
    fn process(&mut self, record: Record<I>) -> StageResult<O>;

    /// Called on the worker thread before the first record
    fn on_start(&mut self) {}

    /// Called on the worker thread after the input reached end-of-stream
    fn on_shutdown(&mut self) {}

    /// Get a human-readable name for this stage
    fn name(&self) -> &str {
        "stage"
    }
}

/// Runs one worker: pops from the stage input, processes, pushes downstream
pub struct StageRunner<I, O> {
    label: String,
    input: BoundedQueue<Message<I>>,
    output: Feeder<O>,
    metrics: StageMetrics,
    log: EventLog,
    log_records: bool,
}

impl<I, O> StageRunner<I, O> {
    /// Worker `label` popping from `input` and feeding `output`
    pub fn new(
        label: impl Into<String>,
        input: BoundedQueue<Message<I>>,
        output: Feeder<O>,
        metrics: StageMetrics,
        log: EventLog,
    ) -> Self {
        Self {
            label: label.into(),
            input,
            output,
            metrics,
            log,
            log_records: true,
        }
    }

    /// Write one report line per record (on by default)
    pub fn log_records(mut self, enabled: bool) -> Self {
        self.log_records = enabled;
        self
    }

    /// Get a reference to the metrics
    pub fn metrics(&self) -> &StageMetrics {
        &self.metrics
    }

    /// Run `stage` until the input ends or the output stops accepting.
    ///
    /// Returns the number of records this worker forwarded. The worker's
    /// feeder handle is released on return, closing the output queue if this
    /// was the last worker feeding it.
    pub fn run<S: Stage<I, O>>(self, mut stage: S) -> u64 {
        let Self {
            label,
            input,
            output,
            metrics,
            log,
            log_records,
        } = self;

        stage.on_start();
        info!(worker = %label, stage = stage.name(), "worker started");

        let mut forwarded = 0u64;
        while let Some(Message::Data(record)) = input.pop() {
            metrics.record_received();
            let key = record.to_string();
            let started = Instant::now();

            match stage.process(record) {
                Ok(Some(out)) => {
                    metrics.record_latency(started.elapsed().as_nanos() as u64);
                    if log_records {
                        log.event(&label, format_args!("{key} accepted"));
                    }
                    if output.push(out) == PushStatus::Rejected {
                        metrics.record_rejected();
                        warn!(worker = %label, record = %key, "output closed, stopping");
                        break;
                    }
                    metrics.record_forwarded();
                    forwarded += 1;
                }
                Ok(None) => {
                    metrics.record_latency(started.elapsed().as_nanos() as u64);
                    metrics.record_filtered();
                    if log_records {
                        log.event(&label, format_args!("{key} filtered"));
                    }
                }
                Err(err) => {
                    metrics.record_failed();
                    warn!(worker = %label, record = %key, error = %err, "record dropped");
                    log.event(&label, format_args!("{key} dropped: {err}"));
                }
            }
        }

        stage.on_shutdown();
        info!(worker = %label, forwarded, "worker finished");
        log.terminated(&label);
        output.finish();
        forwarded
    }
}

/// A simple pass-through stage
#[derive(Debug, Default)]
pub struct PassthroughStage;

impl<T: Send + 'static> Stage<T, T> for PassthroughStage {
    fn process(&mut self, record: Record<T>) -> StageResult<T> {
        Ok(Some(record))
    }

    fn name(&self) -> &str {
        "passthrough"
    }
}

/// A filtering stage that passes through records whose payload matches a predicate
#[derive(Debug)]
pub struct FilterStage<F> {
    name: String,
    predicate: F,
}

impl<F> FilterStage<F> {
    /// Create a new filter stage
    pub fn new(name: impl Into<String>, predicate: F) -> Self {
        Self {
            name: name.into(),
            predicate,
        }
    }
}

impl<T, F> Stage<T, T> for FilterStage<F>
where
    T: Send + 'static,
    F: FnMut(&T) -> bool + Send + 'static,
{
    fn process(&mut self, record: Record<T>) -> StageResult<T> {
        if (self.predicate)(&record.payload) {
            Ok(Some(record))
        } else {
            Ok(None)
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// A mapping stage that transforms each payload; a mapping error drops the record
#[derive(Debug)]
pub struct MapStage<F> {
    name: String,
    mapper: F,
}

impl<F> MapStage<F> {
    /// Create a new map stage
    pub fn new(name: impl Into<String>, mapper: F) -> Self {
        Self {
            name: name.into(),
            mapper,
        }
    }
}

impl<I, O, F> Stage<I, O> for MapStage<F>
where
    I: Send + 'static,
    O: Send + 'static,
    F: FnMut(I) -> std::result::Result<O, RecordError> + Send + 'static,
{
    fn process(&mut self, record: Record<I>) -> StageResult<O> {
        record.try_map(&mut self.mapper).map(Some)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// A stage backed by a closure over whole records
pub struct FnStage<I, F> {
    name: String,
    f: F,
    _input: PhantomData<fn(I)>,
}

impl<I, F> FnStage<I, F> {
    /// Create a new closure stage
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
            _input: PhantomData,
        }
    }
}

impl<I, O, F> Stage<I, O> for FnStage<I, F>
where
    I: 'static,
    O: 'static,
    F: FnMut(Record<I>) -> StageResult<O> + Send + 'static,
{
    fn process(&mut self, record: Record<I>) -> StageResult<O> {
        (self.f)(record)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Report label of worker `index` (zero-based) in a stage of `workers` threads:
/// `WORKER` for a single worker, `WORKER-1`, `WORKER-2`... otherwise
pub fn worker_label(stage: &str, index: usize, workers: usize) -> String {
    let name = stage.to_uppercase();
    if workers == 1 {
        name
    } else {
        format!("{name}-{}", index + 1)
    }
}
