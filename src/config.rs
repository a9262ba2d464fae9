use crate::error::{PipelineError, Result};
use crate::gate::CloseStrategy;
use std::env;
use std::path::PathBuf;

/// Default capacity of the queue in front of each stage
pub const DEFAULT_QUEUE_CAPACITY: usize = 10;

/// Default capacity of the queue read by the sink
pub const DEFAULT_SINK_CAPACITY: usize = 3;

/// Environment variable overriding [`PipelineConfig::queue_capacity`]
pub const QUEUE_CAPACITY_VAR: &str = "PIPELINE_QUEUE_CAPACITY";

/// Environment variable overriding [`PipelineConfig::sink_capacity`]
pub const SINK_CAPACITY_VAR: &str = "PIPELINE_SINK_CAPACITY";

/// Sizing and behaviour of a pipeline run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    pub queue_capacity: usize,
    pub sink_capacity: usize,
    pub close_strategy: CloseStrategy,
    /// Report label of the sink loop
    pub main_label: String,
    /// Write one report line per record
    pub log_records: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            sink_capacity: DEFAULT_SINK_CAPACITY,
            close_strategy: CloseStrategy::default(),
            main_label: String::from("MAIN"),
            log_records: true,
        }
    }
}

impl PipelineConfig {
    /// Create a configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults, with capacities overridden from the environment when set
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        if let Some(capacity) = read_capacity(QUEUE_CAPACITY_VAR)? {
            config.queue_capacity = capacity;
        }
        if let Some(capacity) = read_capacity(SINK_CAPACITY_VAR)? {
            config.sink_capacity = capacity;
        }
        config.validate()?;
        Ok(config)
    }

    /// Set the capacity of each stage's input queue
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Set the capacity of the queue read by the sink
    pub fn with_sink_capacity(mut self, capacity: usize) -> Self {
        self.sink_capacity = capacity;
        self
    }

    /// Set how end-of-stream is propagated
    pub fn with_close_strategy(mut self, strategy: CloseStrategy) -> Self {
        self.close_strategy = strategy;
        self
    }

    /// Set the report label of the sink loop
    pub fn with_main_label(mut self, label: impl Into<String>) -> Self {
        self.main_label = label.into();
        self
    }

    /// Enable or disable one report line per record
    pub fn with_record_logging(mut self, enabled: bool) -> Self {
        self.log_records = enabled;
        self
    }

    /// Check that every capacity is at least 1
    pub fn validate(&self) -> Result<()> {
        if self.queue_capacity == 0 {
            return Err(PipelineError::Config(
                "queue capacity must be at least 1".into(),
            ));
        }
        if self.sink_capacity == 0 {
            return Err(PipelineError::Config(
                "sink capacity must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

fn read_capacity(var: &str) -> Result<Option<usize>> {
    match env::var(var) {
        Ok(value) => parse_count(var, &value).map(Some),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(env::VarError::NotUnicode(_)) => Err(PipelineError::Config(format!(
            "{var} is not valid unicode"
        ))),
    }
}

fn parse_count(what: &str, value: &str) -> Result<usize> {
    match value.trim().parse::<usize>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(PipelineError::Config(format!(
            "{what} must be a positive integer, got '{value}'"
        ))),
    }
}

/// Command line: `<worker-count> <input-file>...`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CliArgs {
    pub workers: usize,
    pub inputs: Vec<PathBuf>,
}

impl CliArgs {
    /// Parse arguments, excluding the program name
    pub fn parse<I, S>(args: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut args = args.into_iter().map(Into::into);
        let workers = args
            .next()
            .ok_or_else(|| PipelineError::Usage("missing <worker-count>".into()))?;
        let workers = parse_count("<worker-count>", &workers)
            .map_err(|e| PipelineError::Usage(e.to_string()))?;

        let inputs: Vec<PathBuf> = args.map(PathBuf::from).collect();
        if inputs.is_empty() {
            return Err(PipelineError::Usage(
                "at least one <input-file> is required".into(),
            ));
        }
        Ok(Self { workers, inputs })
    }

    /// One-line usage text for `program`
    pub fn usage(program: &str) -> String {
        format!("{program} <worker-count> <input-file> [<input-file>...]")
    }
}
