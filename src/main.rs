//! Filters the integers of one or more files through a pool of workers.
//!
//! Usage: bounded-pipeline <worker-count> <input-file>...
//!
//! One producer per file, a `worker` stage dropping negative values and a
//! sink printing every accepted value and their total.

use anyhow::Context;
use bounded_pipeline::sink::for_each;
use bounded_pipeline::source::parse_value;
use bounded_pipeline::{
    CliArgs, EventLog, FilterStage, LineSource, ParseFn, PipelineBuilder, PipelineConfig,
    PipelineError, Record,
};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let program = std::env::args()
        .next()
        .unwrap_or_else(|| String::from("bounded-pipeline"));

    match run(std::env::args().skip(1)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err:#}");
            if matches!(
                err.downcast_ref::<PipelineError>(),
                Some(PipelineError::Usage(_))
            ) {
                eprintln!("usage: {}", CliArgs::usage(&program));
            }
            ExitCode::FAILURE
        }
    }
}

fn run(args: impl Iterator<Item = String>) -> anyhow::Result<()> {
    let args = CliArgs::parse(args)?;
    let config = PipelineConfig::from_env()?;

    let parse: ParseFn<i64> = parse_value::<i64>;
    let sources = args
        .inputs
        .iter()
        .map(|path| LineSource::open(path, parse))
        .collect::<Result<Vec<_>, _>>()?;

    let mut total = 0i64;
    let report = PipelineBuilder::with_config(config)
        .event_log(EventLog::stdout())
        .producers(sources)?
        .stage("worker", args.workers, |_| {
            FilterStage::new("non_negative", |value: &i64| *value >= 0)
        })?
        .run(for_each(|record: Record<i64>, log: &EventLog| {
            total += record.payload;
            log.event("MAIN", format_args!("{record} value {}", record.payload));
        }))
        .context("pipeline run failed")?;

    println!("total {total}");
    tracing::info!("{}", report.metrics_summary());
    Ok(())
}
