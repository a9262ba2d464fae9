use crate::buffer::{BoundedQueue, PushStatus};
use crate::cancel::CancellationToken;
use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::event_log::EventLog;
use crate::gate::{Feeder, FeederGroup};
use crate::metrics::{MetricsSnapshot, StageMetrics};
use crate::record::{Message, ProducerId, Record};
use crate::sink::Sink;
use crate::source::Source;
use crate::stage::{worker_label, Stage, StageRunner};
use parking_lot::Mutex;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{info, warn};

/// Lifecycle of a pipeline run. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PipelineState {
    /// Producers are emitting
    Running,
    /// All producers are done; end-of-stream is propagating stage by stage
    Draining,
    /// The final queue is closed and empty; the sink loop returned
    Drained,
    /// Every thread has been joined
    Joined,
}

impl PipelineState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => PipelineState::Running,
            1 => PipelineState::Draining,
            2 => PipelineState::Drained,
            _ => PipelineState::Joined,
        }
    }
}

/// Shared, observable pipeline state
#[derive(Debug)]
pub struct PipelineStatus {
    state: AtomicU8,
}

impl PipelineStatus {
    fn new() -> Self {
        Self {
            state: AtomicU8::new(PipelineState::Running as u8),
        }
    }

    /// Current state
    pub fn state(&self) -> PipelineState {
        PipelineState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Move to `to` unless the pipeline is already there or further along
    pub(crate) fn advance(&self, to: PipelineState) -> bool {
        let previous = self.state.fetch_max(to as u8, Ordering::AcqRel);
        let moved = previous < to as u8;
        if moved {
            info!(from = ?PipelineState::from_u8(previous), to = ?to, "pipeline state changed");
        }
        moved
    }
}

/// Peak occupancy and contention of one queue after a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueReport {
    pub name: String,
    pub capacity: usize,
    pub peak_len: usize,
    pub block_count: u64,
}

/// Counters of one stage (the producer group is reported as `producers`)
#[derive(Debug, Clone)]
pub struct StageReport {
    pub name: String,
    pub workers: usize,
    pub metrics: MetricsSnapshot,
}

/// Everything a finished run hands back
#[derive(Debug)]
pub struct PipelineReport<R> {
    /// What the sink produced
    pub output: R,
    pub state: PipelineState,
    pub cancelled: bool,
    pub cancel_reason: Option<String>,
    pub stages: Vec<StageReport>,
    pub queues: Vec<QueueReport>,
}

impl<R> PipelineReport<R> {
    /// Report of the stage called `name`
    pub fn stage(&self, name: &str) -> Option<&StageReport> {
        self.stages.iter().find(|s| s.name == name)
    }

    /// Report of the queue called `name`
    pub fn queue(&self, name: &str) -> Option<&QueueReport> {
        self.queues.iter().find(|q| q.name == name)
    }

    /// Get a summary of all metrics
    pub fn metrics_summary(&self) -> String {
        let mut summary = String::from("Pipeline Metrics Summary:\n");
        for stage in &self.stages {
            summary.push_str(&format!(
                "  Stage {} (x{}): {}\n",
                stage.name,
                stage.workers,
                stage.metrics.format()
            ));
        }
        for queue in &self.queues {
            summary.push_str(&format!(
                "  Queue {}: peak {}/{}, blocked pushes {}\n",
                queue.name, queue.peak_len, queue.capacity, queue.block_count
            ));
        }
        summary
    }
}

/// A thread waiting to be spawned
struct Launch {
    name: String,
    body: Box<dyn FnOnce() + Send>,
}

impl Launch {
    /// A panic in `body` cancels the whole run before it propagates to the
    /// join, so no other thread stays blocked on a queue the panicking thread
    /// would have drained.
    fn new<F>(name: String, token: CancellationToken, body: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        let thread_name = name.clone();
        Self {
            name,
            body: Box::new(move || {
                if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(body)) {
                    token.cancel(format!("thread '{thread_name}' panicked"));
                    panic::resume_unwind(payload);
                }
            }),
        }
    }

    /// The body is kept outside the thread closure until the thread runs, so
    /// a failed spawn lets the caller abort the queues before the body (and
    /// the feeder handles it owns) is dropped.
    fn spawn(self, token: &CancellationToken) -> Result<(String, JoinHandle<()>)> {
        let Launch { name, body } = self;
        let slot = Arc::new(Mutex::new(Some(body)));
        let thread_slot = Arc::clone(&slot);

        let spawned = thread::Builder::new().name(name.clone()).spawn(move || {
            let body = thread_slot.lock().take();
            if let Some(body) = body {
                body();
            }
        });

        match spawned {
            Ok(handle) => Ok((name, handle)),
            Err(source) => {
                token.cancel(format!("failed to spawn '{name}'"));
                drop(slot.lock().take());
                Err(PipelineError::Spawn { name, source })
            }
        }
    }
}

/// Threads of the stage not yet connected to a downstream queue
struct Pending<T> {
    feeders: usize,
    attach: Box<dyn FnOnce(Vec<Feeder<T>>) -> Vec<Launch>>,
}

trait QueueHandle {
    fn report(&self) -> QueueReport;
    fn abort(&self);
}

struct NamedQueue<T> {
    name: String,
    queue: BoundedQueue<T>,
}

impl<T> QueueHandle for NamedQueue<T> {
    fn report(&self) -> QueueReport {
        QueueReport {
            name: self.name.clone(),
            capacity: self.queue.capacity(),
            peak_len: self.queue.peak_len(),
            block_count: self.queue.block_count(),
        }
    }

    fn abort(&self) {
        self.queue.abort();
    }
}

struct StageEntry {
    name: String,
    workers: usize,
    metrics: StageMetrics,
}

/// Wiring shared by every builder step
struct Core {
    config: PipelineConfig,
    log: EventLog,
    token: CancellationToken,
    status: Arc<PipelineStatus>,
    launches: Vec<Launch>,
    stages: Vec<StageEntry>,
    queues: Vec<Box<dyn QueueHandle>>,
    upstream_is_producers: bool,
}

impl Core {
    /// Create the queue read by `consumers` threads, hand one feeder per
    /// pending thread and turn those threads into launches
    fn connect<T: Send + 'static>(
        &mut self,
        name: String,
        capacity: usize,
        consumers: usize,
        pending: Pending<T>,
    ) -> Result<BoundedQueue<Message<T>>> {
        let queue = BoundedQueue::new(capacity)?;

        let on_cancel = queue.clone();
        self.token.on_cancel(move || {
            on_cancel.abort();
        });
        self.queues.push(Box::new(NamedQueue {
            name: name.clone(),
            queue: queue.clone(),
        }));

        let mut group = FeederGroup::new(queue.clone())
            .consumers(consumers)
            .strategy(self.config.close_strategy)
            .name(name);
        if std::mem::take(&mut self.upstream_is_producers) {
            let status = Arc::clone(&self.status);
            group = group.on_close(move || {
                status.advance(PipelineState::Draining);
            });
        }

        let feeders = group.split(pending.feeders);
        self.launches.extend((pending.attach)(feeders));
        Ok(queue)
    }
}

impl Drop for Core {
    fn drop(&mut self) {
        // Launches left here were never spawned. Their feeders would push
        // end-of-stream markers into queues nobody reads, so abort first.
        if !self.launches.is_empty() {
            for queue in &self.queues {
                queue.abort();
            }
        }
    }
}

/// Entry point: configuration, report target and cancellation of one run
pub struct PipelineBuilder {
    config: PipelineConfig,
    log: EventLog,
    token: CancellationToken,
    status: Arc<PipelineStatus>,
}

impl PipelineBuilder {
    /// Default configuration, reporting to standard output
    pub fn new() -> Self {
        Self::with_config(PipelineConfig::default())
    }

    /// Use `config`, reporting to standard output
    pub fn with_config(config: PipelineConfig) -> Self {
        Self {
            config,
            log: EventLog::stdout(),
            token: CancellationToken::new(),
            status: Arc::new(PipelineStatus::new()),
        }
    }

    /// Replace the configuration
    pub fn config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    /// Where report lines go
    pub fn event_log(mut self, log: EventLog) -> Self {
        self.log = log;
        self
    }

    /// Use an externally owned token to cancel the run
    pub fn cancellation(mut self, token: CancellationToken) -> Self {
        self.token = token;
        self
    }

    /// Token cancelling this run
    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Observe the run state from other threads
    pub fn status(&self) -> Arc<PipelineStatus> {
        Arc::clone(&self.status)
    }

    /// One producer thread per source, with ids `P1`, `P2`, ... in order
    pub fn producers<T, S>(self, sources: Vec<S>) -> Result<StageBuilder<T>>
    where
        T: Send + 'static,
        S: Source<T> + 'static,
    {
        self.config.validate()?;
        if sources.is_empty() {
            return Err(PipelineError::NoProducers);
        }

        let feeders = sources.len();
        let metrics = StageMetrics::new();
        let log = self.log.clone();
        let token = self.token.clone();
        let log_records = self.config.log_records;
        let producer_metrics = metrics.clone();

        let attach = Box::new(move |feeders: Vec<Feeder<T>>| -> Vec<Launch> {
            sources
                .into_iter()
                .zip(feeders)
                .enumerate()
                .map(|(index, (source, feeder))| {
                    let id = ProducerId(index as u32 + 1);
                    let producer = Producer {
                        id,
                        source,
                        feeder,
                        log: log.clone(),
                        token: token.clone(),
                        metrics: producer_metrics.clone(),
                        log_records,
                    };
                    Launch::new(format!("producer-{}", id.0), token.clone(), move || {
                        producer.run()
                    })
                })
                .collect()
        });

        Ok(StageBuilder {
            core: Core {
                config: self.config,
                log: self.log,
                token: self.token,
                status: self.status,
                launches: Vec::new(),
                stages: vec![StageEntry {
                    name: String::from("producers"),
                    workers: feeders,
                    metrics,
                }],
                queues: Vec::new(),
                upstream_is_producers: true,
            },
            pending: Pending { feeders, attach },
        })
    }
}

impl Default for PipelineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A partially wired pipeline whose last step emits records of type `T`
pub struct StageBuilder<T> {
    core: Core,
    pending: Pending<T>,
}

impl<T: Send + 'static> StageBuilder<T> {
    /// Append a stage of `workers` threads. `factory(i)` builds the stage
    /// instance owned by worker `i`.
    pub fn stage<O, S, F>(
        self,
        name: impl Into<String>,
        workers: usize,
        mut factory: F,
    ) -> Result<StageBuilder<O>>
    where
        O: Send + 'static,
        S: Stage<T, O>,
        F: FnMut(usize) -> S,
    {
        let name = name.into();
        if workers == 0 {
            return Err(PipelineError::Config(format!(
                "stage '{name}' needs at least one worker"
            )));
        }

        let StageBuilder { mut core, pending } = self;
        let capacity = core.config.queue_capacity;
        let input = core.connect(format!("{name}-input"), capacity, workers, pending)?;

        let metrics = StageMetrics::new();
        core.stages.push(StageEntry {
            name: name.clone(),
            workers,
            metrics: metrics.clone(),
        });

        let instances: Vec<S> = (0..workers).map(&mut factory).collect();
        let log = core.log.clone();
        let token = core.token.clone();
        let log_records = core.config.log_records;

        let attach = Box::new(move |feeders: Vec<Feeder<O>>| -> Vec<Launch> {
            instances
                .into_iter()
                .zip(feeders)
                .enumerate()
                .map(|(index, (stage, feeder))| {
                    let label = worker_label(&name, index, workers);
                    let runner =
                        StageRunner::new(label, input.clone(), feeder, metrics.clone(), log.clone())
                            .log_records(log_records);
                    let thread_name = format!("{}-{}", name.to_lowercase(), index + 1);
                    Launch::new(thread_name, token.clone(), move || {
                        runner.run(stage);
                    })
                })
                .collect()
        });

        Ok(StageBuilder {
            core,
            pending: Pending {
                feeders: workers,
                attach,
            },
        })
    }

    /// Start every thread, drain the final queue into `sink` on the calling
    /// thread, then join everything.
    pub fn run<K: Sink<T>>(self, mut sink: K) -> Result<PipelineReport<K::Output>> {
        let StageBuilder { mut core, pending } = self;
        let capacity = core.config.sink_capacity;
        let final_queue = core.connect(String::from("sink-input"), capacity, 1, pending)?;

        let launches = std::mem::take(&mut core.launches);
        info!(threads = launches.len(), "starting pipeline");

        let mut handles = Vec::with_capacity(launches.len());
        let mut launches = launches.into_iter();
        let mut spawn_error = None;
        for launch in launches.by_ref() {
            match launch.spawn(&core.token) {
                Ok(handle) => handles.push(handle),
                Err(err) => {
                    spawn_error = Some(err);
                    break;
                }
            }
        }
        if let Some(err) = spawn_error {
            drop(launches);
            join_all(handles);
            core.status.advance(PipelineState::Joined);
            return Err(err);
        }

        let drained = panic::catch_unwind(AssertUnwindSafe(|| {
            while let Some(Message::Data(record)) = final_queue.pop() {
                sink.consume(record, &core.log);
            }
        }));
        if let Err(payload) = drained {
            core.token.cancel("sink panicked");
            join_all(handles);
            core.status.advance(PipelineState::Joined);
            panic::resume_unwind(payload);
        }
        core.status.advance(PipelineState::Drained);
        core.log.terminated(&core.config.main_label);

        let panicked = join_all(handles);
        core.status.advance(PipelineState::Joined);
        if let Some(name) = panicked {
            return Err(PipelineError::ThreadPanicked(name));
        }

        Ok(PipelineReport {
            output: sink.finish(),
            state: core.status.state(),
            cancelled: core.token.is_cancelled(),
            cancel_reason: core.token.reason(),
            stages: core
                .stages
                .iter()
                .map(|stage| StageReport {
                    name: stage.name.clone(),
                    workers: stage.workers,
                    metrics: stage.metrics.snapshot(),
                })
                .collect(),
            queues: core.queues.iter().map(|queue| queue.report()).collect(),
        })
    }
}

impl<T> fmt::Debug for StageBuilder<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StageBuilder")
            .field("stages", &self.core.stages.len())
            .field("pending_feeders", &self.pending.feeders)
            .finish()
    }
}

/// Join every handle; returns the name of the first thread that panicked
fn join_all(handles: Vec<(String, JoinHandle<()>)>) -> Option<String> {
    let mut panicked = None;
    for (name, handle) in handles {
        if handle.join().is_err() {
            warn!(thread = %name, "thread panicked");
            panicked.get_or_insert(name);
        }
    }
    panicked
}

struct Producer<T, S> {
    id: ProducerId,
    source: S,
    feeder: Feeder<T>,
    log: EventLog,
    token: CancellationToken,
    metrics: StageMetrics,
    log_records: bool,
}

impl<T, S: Source<T>> Producer<T, S> {
    fn run(self) {
        let Producer {
            id,
            mut source,
            feeder,
            log,
            token,
            metrics,
            log_records,
        } = self;
        let label = id.label();
        let source_name = source.name();
        info!(producer = %label, source = %source_name, "producer started");
        log.event(&label, format_args!("reading '{source_name}'"));

        let mut seq = 0u64;
        while !token.is_cancelled() {
            let Some(item) = source.next_item() else {
                break;
            };
            metrics.record_received();
            match item {
                Ok(payload) => {
                    let record = Record::new(id, seq, payload);
                    seq += 1;
                    if log_records {
                        log.event(&label, format_args!("{record} emitted"));
                    }
                    if feeder.push(record) == PushStatus::Rejected {
                        metrics.record_rejected();
                        warn!(producer = %label, "queue closed, stopping");
                        break;
                    }
                    metrics.record_forwarded();
                }
                Err(err) => {
                    metrics.record_failed();
                    warn!(producer = %label, error = %err, "skipping malformed input");
                    log.event(&label, format_args!("skipped: {err}"));
                }
            }
        }

        info!(producer = %label, emitted = seq, "producer finished");
        log.terminated(&label);
        feeder.finish();
    }
}
