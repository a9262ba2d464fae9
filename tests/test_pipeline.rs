use bounded_pipeline::sink::{for_each, Collect, Count};
use bounded_pipeline::source::parse_value;
use bounded_pipeline::{
    CancellationToken, CloseStrategy, EventLog, FilterStage, FnStage, IterSource, LineSource,
    MapStage, PassthroughStage, PipelineBuilder, PipelineConfig, PipelineError, PipelineState,
    ProducerId, Record, RecordError,
};
use std::collections::HashSet;
use std::io::Write;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

fn quiet(config: PipelineConfig) -> PipelineBuilder {
    PipelineBuilder::with_config(config.with_record_logging(false)).event_log(EventLog::discard())
}

/// Endless counter that flags when the producer owning it has dropped it
struct Numbers {
    next: u32,
    dropped: Arc<AtomicBool>,
}

impl Iterator for Numbers {
    type Item = u32;

    fn next(&mut self) -> Option<u32> {
        self.next += 1;
        Some(self.next)
    }
}

impl Drop for Numbers {
    fn drop(&mut self) {
        self.dropped.store(true, Ordering::SeqCst);
    }
}

fn lines_starting_with(log: &EventLog, prefix: &str) -> usize {
    log.lines().iter().filter(|line| line.starts_with(prefix)).count()
}

#[test]
fn test_two_producers_one_worker() {
    let log = EventLog::capture();
    let report = PipelineBuilder::with_config(PipelineConfig::new().with_queue_capacity(2))
        .event_log(log.clone())
        .producers(vec![
            IterSource::new(vec![3i64, -1, 4]),
            IterSource::new(vec![1i64, 5]),
        ])
        .expect("producers")
        .stage("worker", 1, |_| FilterStage::new("non_negative", |v: &i64| *v >= 0))
        .expect("stage")
        .run(Collect::new())
        .expect("run");

    let mut payloads: Vec<i64> = report.output.iter().map(|r| r.payload).collect();
    payloads.sort_unstable();
    assert_eq!(payloads, vec![1, 3, 4, 5]);
    assert_eq!(report.state, PipelineState::Joined);

    assert_eq!(log.count("[P1] terminazione"), 1);
    assert_eq!(log.count("[P2] terminazione"), 1);
    assert_eq!(log.count("[WORKER] terminazione"), 1);
    assert_eq!(log.count("[MAIN] terminazione"), 1);

    let worker_done = log.position("[WORKER] terminazione").unwrap();
    assert!(log.position("[P1] terminazione").unwrap() < worker_done);
    assert!(log.position("[P2] terminazione").unwrap() < worker_done);
    assert!(worker_done < log.position("[MAIN] terminazione").unwrap());
    assert_eq!(log.count("[WORKER] P1#1 filtered"), 1);
}

#[test]
fn test_single_lane_preserves_order() {
    let config = PipelineConfig::new()
        .with_queue_capacity(1)
        .with_sink_capacity(1);
    let report = quiet(config)
        .producers(vec![IterSource::new(0..200u32)])
        .unwrap()
        .stage("worker", 1, |_| PassthroughStage)
        .unwrap()
        .run(Collect::new())
        .unwrap();

    let payloads: Vec<u32> = report.output.iter().map(|r| r.payload).collect();
    assert_eq!(payloads, (0..200).collect::<Vec<_>>());
    let seqs: Vec<u64> = report.output.iter().map(|r| r.seq).collect();
    assert_eq!(seqs, (0..200).collect::<Vec<_>>());
}

#[test]
fn test_no_loss_no_duplication() {
    const PRODUCERS: u64 = 4;
    const PER_PRODUCER: u64 = 500;

    let sources: Vec<_> = (0..PRODUCERS)
        .map(|p| IterSource::new((0..PER_PRODUCER).map(move |i| p * PER_PRODUCER + i)))
        .collect();

    let config = PipelineConfig::new()
        .with_queue_capacity(3)
        .with_sink_capacity(1);
    let report = quiet(config)
        .producers(sources)
        .unwrap()
        .stage("double", 3, |_| {
            MapStage::new("double", |v: u64| Ok::<_, RecordError>(v * 2))
        })
        .unwrap()
        .stage("half", 2, |_| MapStage::new("half", |v: u64| Ok::<_, RecordError>(v / 2)))
        .unwrap()
        .run(Collect::new())
        .unwrap();

    assert_eq!(report.output.len() as u64, PRODUCERS * PER_PRODUCER);

    let keys: HashSet<(ProducerId, u64)> = report.output.iter().map(Record::key).collect();
    assert_eq!(keys.len() as u64, PRODUCERS * PER_PRODUCER);

    let payloads: HashSet<u64> = report.output.iter().map(|r| r.payload).collect();
    assert_eq!(payloads, (0..PRODUCERS * PER_PRODUCER).collect());

    for record in &report.output {
        let producer = u64::from(record.origin.0 - 1);
        assert_eq!(record.payload, producer * PER_PRODUCER + record.seq);
    }
}

#[test]
fn test_queues_stay_within_capacity() {
    let config = PipelineConfig::new()
        .with_queue_capacity(2)
        .with_sink_capacity(1);
    let sources: Vec<_> = (0..6).map(|_| IterSource::new(0..300u32)).collect();
    let report = quiet(config)
        .producers(sources)
        .unwrap()
        .stage("worker", 4, |_| PassthroughStage)
        .unwrap()
        .run(Count::new())
        .unwrap();

    assert_eq!(report.output, 1800);
    assert_eq!(report.queues.len(), 2);
    for queue in &report.queues {
        assert!(
            queue.peak_len <= queue.capacity,
            "{} peaked at {} over capacity {}",
            queue.name,
            queue.peak_len,
            queue.capacity
        );
    }
}

#[test]
fn test_close_only_strategy_terminates() {
    let config = PipelineConfig::new().with_close_strategy(CloseStrategy::Close);
    let sources: Vec<_> = (0..3).map(|_| IterSource::new(0..50i32)).collect();
    let report = quiet(config)
        .producers(sources)
        .unwrap()
        .stage("worker", 4, |_| PassthroughStage)
        .unwrap()
        .run(Count::new())
        .unwrap();
    assert_eq!(report.output, 150);
}

#[test]
fn test_poison_only_strategy_terminates() {
    let config = PipelineConfig::new()
        .with_close_strategy(CloseStrategy::Poison)
        .with_queue_capacity(1);
    let sources: Vec<_> = (0..2).map(|_| IterSource::new(0..50i32)).collect();
    let report = quiet(config)
        .producers(sources)
        .unwrap()
        .stage("worker", 5, |_| PassthroughStage)
        .unwrap()
        .stage("verifier", 3, |_| PassthroughStage)
        .unwrap()
        .run(Count::new())
        .unwrap();
    assert_eq!(report.output, 100);
}

#[test]
fn test_empty_sources_terminate() {
    let sources: Vec<IterSource<u8>> = (0..3).map(|_| IterSource::new(Vec::new())).collect();
    let report = quiet(PipelineConfig::new())
        .producers(sources)
        .unwrap()
        .stage("worker", 2, |_| PassthroughStage)
        .unwrap()
        .run(Count::new())
        .unwrap();
    assert_eq!(report.output, 0);
    assert_eq!(report.state, PipelineState::Joined);
}

#[test]
fn test_cancellation_still_joins() {
    let token = CancellationToken::new();
    let sink_token = token.clone();
    let mut seen = 0u64;

    let report = quiet(PipelineConfig::new().with_queue_capacity(4))
        .cancellation(token.clone())
        .producers(vec![IterSource::new(0u64..), IterSource::new(0u64..)])
        .unwrap()
        .stage("worker", 2, |_| PassthroughStage)
        .unwrap()
        .run(for_each(|_record: Record<u64>, _log: &EventLog| {
            seen += 1;
            if seen == 10 {
                sink_token.cancel("enough records");
            }
        }))
        .unwrap();

    assert!(report.cancelled);
    assert_eq!(report.cancel_reason.as_deref(), Some("enough records"));
    assert_eq!(report.state, PipelineState::Joined);
    assert!(seen >= 10);
}

#[test]
fn test_stage_errors_are_skipped() {
    let log = EventLog::capture();
    let report = PipelineBuilder::with_config(PipelineConfig::new())
        .event_log(log.clone())
        .producers(vec![IterSource::new(vec!["1", "two", "3"])])
        .unwrap()
        .stage("parse", 1, |_| {
            MapStage::new("parse", |s: &'static str| {
                s.parse::<i64>()
                    .map_err(|e| RecordError::Processing(e.to_string()))
            })
        })
        .unwrap()
        .run(Collect::new())
        .unwrap();

    let payloads: Vec<i64> = report.output.iter().map(|r| r.payload).collect();
    assert_eq!(payloads, vec![1, 3]);
    assert_eq!(report.stage("parse").unwrap().metrics.failed, 1);
    assert_eq!(lines_starting_with(&log, "[PARSE] P1#1 dropped:"), 1);
}

#[test]
fn test_line_source_skips_malformed_lines() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "10\nnot a number\n\n-4\n7").unwrap();

    let log = EventLog::capture();
    let source = LineSource::open(file.path(), parse_value::<i64>).unwrap();
    let report = PipelineBuilder::new()
        .event_log(log.clone())
        .producers(vec![source])
        .unwrap()
        .stage("worker", 2, |_| FilterStage::new("non_negative", |v: &i64| *v >= 0))
        .unwrap()
        .run(Collect::new())
        .unwrap();

    let mut payloads: Vec<i64> = report.output.iter().map(|r| r.payload).collect();
    payloads.sort_unstable();
    assert_eq!(payloads, vec![7, 10]);
    assert_eq!(report.stage("producers").unwrap().metrics.failed, 1);
    assert_eq!(lines_starting_with(&log, "[P1] skipped: line 2:"), 1);
}

#[test]
fn test_missing_input_is_setup_error() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("missing.txt");
    let result = LineSource::open(&missing, parse_value::<i64>);
    match result {
        Err(PipelineError::Input { path, .. }) => assert_eq!(path, missing),
        other => panic!("expected an input error, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn test_panicking_stage_is_reported() {
    let result = quiet(PipelineConfig::new().with_queue_capacity(2))
        .producers(vec![IterSource::new(0..1000u32)])
        .unwrap()
        .stage("worker", 1, |_| {
            FnStage::new("explode", |record: Record<u32>| {
                if record.payload == 13 {
                    panic!("unlucky record");
                }
                Ok::<_, RecordError>(Some(record))
            })
        })
        .unwrap()
        .run(Count::new());

    assert!(matches!(result, Err(PipelineError::ThreadPanicked(name)) if name == "worker-1"));
}

#[test]
fn test_producers_straight_to_sink_reports() {
    let log = EventLog::capture();
    let report = PipelineBuilder::with_config(PipelineConfig::new().with_main_label("SINK"))
        .event_log(log.clone())
        .producers(vec![IterSource::new(vec!['a', 'b'])])
        .unwrap()
        .run(for_each(|record: Record<char>, log: &EventLog| {
            log.event("SINK", format_args!("got {}", record.payload));
        }))
        .unwrap();

    assert_eq!(report.state, PipelineState::Joined);
    assert_eq!(log.count("[P1] P1#0 emitted"), 1);
    assert_eq!(log.count("[SINK] got b"), 1);
    assert_eq!(log.lines().last().map(String::as_str), Some("[SINK] terminazione"));
}

#[test]
fn test_panicking_sink_stops_every_thread() {
    let dropped = Arc::new(AtomicBool::new(false));
    let builder = quiet(
        PipelineConfig::new()
            .with_queue_capacity(1)
            .with_sink_capacity(1),
    );
    let status = builder.status();
    let token = builder.cancellation_token();
    let source = IterSource::new(Numbers {
        next: 0,
        dropped: Arc::clone(&dropped),
    });

    let result = panic::catch_unwind(AssertUnwindSafe(|| {
        builder
            .producers(vec![source])
            .unwrap()
            .stage("worker", 1, |_| PassthroughStage)
            .unwrap()
            .run(for_each(|record: Record<u32>, _log: &EventLog| {
                if record.payload == 5 {
                    panic!("sink failure");
                }
            }))
    }));

    assert!(result.is_err());
    assert!(token.is_cancelled());
    assert_eq!(token.reason().as_deref(), Some("sink panicked"));
    assert_eq!(status.state(), PipelineState::Joined);
    assert!(dropped.load(Ordering::SeqCst));
}
