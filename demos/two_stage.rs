//! Two-stage pipeline: parse rows, then check them
//!
//! Pipeline:
//! 1. Producers: three in-memory sources of comma-separated rows
//! 2. Parse: turns each row into a list of integers (malformed rows are dropped)
//! 3. Check: keeps rows whose values are strictly increasing
//! 4. Sink: prints accepted rows and a summary on the main thread
//!
//! Usage: cargo run --example two_stage --release

use bounded_pipeline::sink::for_each;
use bounded_pipeline::source::parse_fields;
use bounded_pipeline::{
    EventLog, FnStage, IterSource, MapStage, PipelineBuilder, PipelineConfig, Record, RecordError,
    Result as PipelineResult, Stage, StageResult,
};

/// Check stage keeping rows whose values are strictly increasing
struct IncreasingCheck {
    checked: u64,
}

impl Stage<Vec<i64>, Vec<i64>> for IncreasingCheck {
    fn process(&mut self, record: Record<Vec<i64>>) -> StageResult<Vec<i64>> {
        self.checked += 1;
        if record.payload.windows(2).all(|pair| pair[0] < pair[1]) {
            Ok(Some(record))
        } else {
            Err(RecordError::Rejected(format!("{:?} is not increasing", record.payload)))
        }
    }

    fn on_shutdown(&mut self) {
        tracing::info!(checked = self.checked, "check worker done");
    }

    fn name(&self) -> &str {
        "increasing"
    }
}

fn main() -> PipelineResult<()> {
    println!("=== Two-stage pipeline ===\n");

    let rows = [
        vec!["1,2,3", "4,5,6", "9,8,7"],
        vec!["10,20,30", "oops,1", "3,3,4"],
        vec!["-5,0,5", "2,4,8,16"],
    ];
    let sources: Vec<_> = rows
        .into_iter()
        .enumerate()
        .map(|(i, rows)| IterSource::new(rows).named(format!("batch-{}", i + 1)))
        .collect();

    let config = PipelineConfig::new()
        .with_queue_capacity(2)
        .with_sink_capacity(1);

    let mut accepted = 0usize;
    let report = PipelineBuilder::with_config(config)
        .event_log(EventLog::stdout())
        .producers(sources)?
        .stage("parse", 2, |_| MapStage::new("parse", |row: &'static str| parse_fields::<i64>(row)))?
        .stage("check", 2, |_| IncreasingCheck { checked: 0 })?
        .stage("label", 1, |_| {
            FnStage::new("label", |record: Record<Vec<i64>>| {
                Ok::<_, RecordError>(Some(record.map(|values| {
                    let joined: Vec<String> = values.iter().map(i64::to_string).collect();
                    joined.join(" < ")
                })))
            })
        })?
        .run(for_each(|record: Record<String>, log: &EventLog| {
            accepted += 1;
            log.event("MAIN", format_args!("{record} ok: {}", record.payload));
        }))?;

    println!("\n=== Results ===");
    println!("Accepted rows: {accepted}");
    println!("{}", report.metrics_summary());
    Ok(())
}
