use crate::event_log::EventLog;
use crate::record::Record;

/// The terminal consumer. It runs on the orchestrating thread, so it may
/// keep aggregate state without any synchronization.
pub trait Sink<T> {
    /// Result handed back once the final queue is drained
    type Output;

    /// Consume one record from the final queue
    fn consume(&mut self, record: Record<T>, log: &EventLog);

    /// Called after end-of-stream
    fn finish(self) -> Self::Output
    where
        Self: Sized;
}

/// Collects every record in arrival order
#[derive(Debug)]
pub struct Collect<T> {
    records: Vec<Record<T>>,
}

impl<T> Collect<T> {
    /// Create an empty collector
    pub fn new() -> Self {
        Self {
            records: Vec::new(),
        }
    }
}

impl<T> Default for Collect<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Sink<T> for Collect<T> {
    type Output = Vec<Record<T>>;

    fn consume(&mut self, record: Record<T>, _log: &EventLog) {
        self.records.push(record);
    }

    fn finish(self) -> Self::Output {
        self.records
    }
}

/// Counts records
#[derive(Debug, Default)]
pub struct Count {
    count: u64,
}

impl Count {
    /// Create a counter at zero
    pub fn new() -> Self {
        Self::default()
    }
}

impl<T> Sink<T> for Count {
    type Output = u64;

    fn consume(&mut self, _record: Record<T>, _log: &EventLog) {
        self.count += 1;
    }

    fn finish(self) -> u64 {
        self.count
    }
}

/// Calls a closure for each record
pub struct ForEach<F> {
    f: F,
}

/// Build a [`ForEach`] sink
pub fn for_each<F>(f: F) -> ForEach<F> {
    ForEach { f }
}

impl<T, F> Sink<T> for ForEach<F>
where
    F: FnMut(Record<T>, &EventLog),
{
    type Output = ();

    fn consume(&mut self, record: Record<T>, log: &EventLog) {
        (self.f)(record, log)
    }

    fn finish(self) {}
}
