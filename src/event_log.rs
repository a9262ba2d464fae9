use parking_lot::Mutex;
use std::fmt;
use std::io::{self, Write};
use std::sync::Arc;

/// Message written when a thread (or the sink loop) terminates
pub const TERMINATION: &str = "terminazione";

enum Output {
    Writer(Box<dyn Write + Send>),
    Capture(Vec<String>),
    Discard,
}

/// Line-oriented, human-readable pipeline report.
///
/// Every line is formatted before the lock is taken and written while holding
/// one mutex, so lines from different threads never interleave. This lock is
/// independent from every queue lock and is never taken while one is held.
#[derive(Clone)]
pub struct EventLog {
    output: Arc<Mutex<Output>>,
}

impl EventLog {
    /// Report to standard output
    pub fn stdout() -> Self {
        Self::from_writer(io::stdout())
    }

    /// Report to any writer, e.g. a file
    pub fn from_writer<W: Write + Send + 'static>(writer: W) -> Self {
        Self::with_output(Output::Writer(Box::new(writer)))
    }

    /// Keep lines in memory; read them back with [`EventLog::lines`]
    pub fn capture() -> Self {
        Self::with_output(Output::Capture(Vec::new()))
    }

    /// Drop everything
    pub fn discard() -> Self {
        Self::with_output(Output::Discard)
    }

    fn with_output(output: Output) -> Self {
        Self {
            output: Arc::new(Mutex::new(output)),
        }
    }

    /// Write `[label] message`
    pub fn event(&self, label: &str, message: impl fmt::Display) {
        self.line(format!("[{label}] {message}"));
    }

    /// Write `[label] terminazione`
    pub fn terminated(&self, label: &str) {
        self.event(label, TERMINATION);
    }

    /// Write one raw line
    pub fn line(&self, text: impl Into<String>) {
        let text = text.into();
        let failed = {
            let mut output = self.output.lock();
            match &mut *output {
                Output::Writer(writer) => writeln!(writer, "{text}")
                    .and_then(|()| writer.flush())
                    .err(),
                Output::Capture(lines) => {
                    lines.push(text);
                    None
                }
                Output::Discard => None,
            }
        };
        if let Some(err) = failed {
            tracing::warn!(error = %err, "failed to write report line");
        }
    }

    /// Captured lines, in write order. Empty unless built with [`EventLog::capture`].
    pub fn lines(&self) -> Vec<String> {
        match &*self.output.lock() {
            Output::Capture(lines) => lines.clone(),
            _ => Vec::new(),
        }
    }

    /// Index of the first captured line equal to `text`
    pub fn position(&self, text: &str) -> Option<usize> {
        match &*self.output.lock() {
            Output::Capture(lines) => lines.iter().position(|line| line == text),
            _ => None,
        }
    }

    /// Number of captured lines equal to `text`
    pub fn count(&self, text: &str) -> usize {
        match &*self.output.lock() {
            Output::Capture(lines) => lines.iter().filter(|line| *line == text).count(),
            _ => 0,
        }
    }
}

impl Default for EventLog {
    fn default() -> Self {
        Self::stdout()
    }
}

impl fmt::Debug for EventLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match &*self.output.lock() {
            Output::Writer(_) => "writer",
            Output::Capture(_) => "capture",
            Output::Discard => "discard",
        };
        f.debug_struct("EventLog").field("output", &kind).finish()
    }
}
