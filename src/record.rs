use std::fmt;

/// One-based identifier of the producer a record originated from
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProducerId(pub u32);

impl ProducerId {
    /// Log label of the producer, e.g. `P1`
    pub fn label(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for ProducerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "P{}", self.0)
    }
}

/// Unit of data flowing through the pipeline.
///
/// `origin` and `seq` are assigned by the producer and survive every stage,
/// so `(origin, seq)` identifies a record end to end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record<T> {
    pub origin: ProducerId,
    pub seq: u64,
    pub payload: T,
}

impl<T> Record<T> {
    /// Create a record emitted by `origin` as its `seq`-th item
    pub fn new(origin: ProducerId, seq: u64, payload: T) -> Self {
        Self {
            origin,
            seq,
            payload,
        }
    }

    /// Replace the payload, keeping origin and sequence number
    pub fn map<U, F>(self, f: F) -> Record<U>
    where
        F: FnOnce(T) -> U,
    {
        Record {
            origin: self.origin,
            seq: self.seq,
            payload: f(self.payload),
        }
    }

    /// Fallible variant of [`Record::map`]
    pub fn try_map<U, E, F>(self, f: F) -> Result<Record<U>, E>
    where
        F: FnOnce(T) -> Result<U, E>,
    {
        Ok(Record {
            origin: self.origin,
            seq: self.seq,
            payload: f(self.payload)?,
        })
    }

    /// `(origin, seq)` pair identifying this record
    pub fn key(&self) -> (ProducerId, u64) {
        (self.origin, self.seq)
    }
}

impl<T> fmt::Display for Record<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.origin, self.seq)
    }
}

/// What travels through a queue: a record, or the end-of-stream marker a
/// closing feeder sends once per downstream consumer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message<T> {
    Data(Record<T>),
    EndOfStream,
}

impl<T> Message<T> {
    /// Check if this is the end-of-stream marker
    pub fn is_end_of_stream(&self) -> bool {
        matches!(self, Message::EndOfStream)
    }

    /// The carried record, or `None` for the end-of-stream marker
    pub fn into_record(self) -> Option<Record<T>> {
        match self {
            Message::Data(record) => Some(record),
            Message::EndOfStream => None,
        }
    }
}

impl<T> From<Record<T>> for Message<T> {
    fn from(record: Record<T>) -> Self {
        Message::Data(record)
    }
}
