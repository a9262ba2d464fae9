use crate::error::{PipelineError, RecordError, Result};
use std::fmt;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// A lazy, finite sequence of raw units read by one producer thread.
///
/// Each call yields one item, or a [`RecordError`] for a unit that could not
/// be decoded; the producer logs and skips those. `None` ends the sequence.
pub trait Source<T>: Send {
    fn next_item(&mut self) -> Option<std::result::Result<T, RecordError>>;

    /// Human-readable name for the report, e.g. the file path
    fn name(&self) -> String {
        String::from("source")
    }
}

impl<T, S> Source<T> for Box<S>
where
    S: Source<T> + ?Sized,
{
    fn next_item(&mut self) -> Option<std::result::Result<T, RecordError>> {
        (**self).next_item()
    }

    fn name(&self) -> String {
        (**self).name()
    }
}

type BoxedItems<T> = Box<dyn Iterator<Item = std::result::Result<T, RecordError>> + Send>;

/// Source over an in-memory iterator
pub struct IterSource<T> {
    items: BoxedItems<T>,
    name: String,
}

impl<T: 'static> IterSource<T> {
    /// Every value is a well-formed payload
    pub fn new<I>(values: I) -> Self
    where
        I: IntoIterator<Item = T>,
        I::IntoIter: Send + 'static,
    {
        Self::fallible(values.into_iter().map(Ok))
    }

    /// Values that may already carry a decoding error
    pub fn fallible<I>(items: I) -> Self
    where
        I: IntoIterator<Item = std::result::Result<T, RecordError>>,
        I::IntoIter: Send + 'static,
    {
        Self {
            items: Box::new(items.into_iter()),
            name: String::from("memory"),
        }
    }

    /// Name used in reports
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

impl<T> Source<T> for IterSource<T> {
    fn next_item(&mut self) -> Option<std::result::Result<T, RecordError>> {
        self.items.next()
    }

    fn name(&self) -> String {
        self.name.clone()
    }
}

impl<T> fmt::Debug for IterSource<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IterSource").field("name", &self.name).finish()
    }
}

/// Decoder of one line of input
pub type ParseFn<T> = fn(&str) -> std::result::Result<T, RecordError>;

/// Line-oriented text input decoded by a parse function.
///
/// Blank lines are skipped. Line numbers in parse errors are one-based.
pub struct LineSource<F> {
    reader: Box<dyn BufRead + Send>,
    parse: F,
    name: String,
    line_no: u64,
    buf: String,
    exhausted: bool,
}

impl<F> LineSource<F> {
    /// Open `path`. Failing to open is a setup error, reported before any
    /// thread starts.
    pub fn open(path: impl AsRef<Path>, parse: F) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|source| PipelineError::Input {
            path: PathBuf::from(path),
            source,
        })?;
        Ok(Self::from_reader(
            path.display().to_string(),
            BufReader::new(file),
            parse,
        ))
    }

    /// Read lines from an already open reader
    pub fn from_reader<R>(name: impl Into<String>, reader: R, parse: F) -> Self
    where
        R: BufRead + Send + 'static,
    {
        Self {
            reader: Box::new(reader),
            parse,
            name: name.into(),
            line_no: 0,
            buf: String::new(),
            exhausted: false,
        }
    }
}

impl<T, F> Source<T> for LineSource<F>
where
    F: FnMut(&str) -> std::result::Result<T, RecordError> + Send,
{
    fn next_item(&mut self) -> Option<std::result::Result<T, RecordError>> {
        while !self.exhausted {
            self.buf.clear();
            match self.reader.read_line(&mut self.buf) {
                Ok(0) => self.exhausted = true,
                Ok(_) => {
                    self.line_no += 1;
                    let line = self.buf.trim_end_matches(['\r', '\n']);
                    if line.trim().is_empty() {
                        continue;
                    }
                    return Some((self.parse)(line).map_err(|e| e.at_line(self.line_no)));
                }
                Err(e) => {
                    self.exhausted = true;
                    return Some(Err(RecordError::Processing(format!(
                        "read failed after line {}: {e}",
                        self.line_no
                    ))));
                }
            }
        }
        None
    }

    fn name(&self) -> String {
        self.name.clone()
    }
}

/// Decoder of one fixed-size binary record
pub type ChunkParseFn<T> = fn(&[u8]) -> std::result::Result<T, RecordError>;

/// Fixed-stride binary input: every `record_size` bytes are one record.
///
/// Record numbers in decode errors are one-based. A trailing record shorter
/// than `record_size` is reported as a [`RecordError::Decode`] and ends the
/// input.
pub struct ChunkSource<F> {
    reader: Box<dyn Read + Send>,
    parse: F,
    name: String,
    record_size: usize,
    records: u64,
    buf: Vec<u8>,
    exhausted: bool,
}

impl<F> ChunkSource<F> {
    /// Open `path` for records of `record_size` bytes. Failing to open, or a
    /// zero record size, is a setup error.
    pub fn open(path: impl AsRef<Path>, record_size: usize, parse: F) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|source| PipelineError::Input {
            path: PathBuf::from(path),
            source,
        })?;
        Self::from_reader(
            path.display().to_string(),
            BufReader::new(file),
            record_size,
            parse,
        )
    }

    /// Read records from an already open reader
    pub fn from_reader<R>(
        name: impl Into<String>,
        reader: R,
        record_size: usize,
        parse: F,
    ) -> Result<Self>
    where
        R: Read + Send + 'static,
    {
        if record_size == 0 {
            return Err(PipelineError::Config(
                "record size must be at least 1 byte".into(),
            ));
        }
        Ok(Self {
            reader: Box::new(reader),
            parse,
            name: name.into(),
            record_size,
            records: 0,
            buf: vec![0; record_size],
            exhausted: false,
        })
    }

    /// Fill the record buffer; returns how many bytes were read
    fn fill(&mut self) -> io::Result<usize> {
        let mut filled = 0;
        while filled < self.record_size {
            match self.reader.read(&mut self.buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        Ok(filled)
    }
}

impl<T, F> Source<T> for ChunkSource<F>
where
    F: FnMut(&[u8]) -> std::result::Result<T, RecordError> + Send,
{
    fn next_item(&mut self) -> Option<std::result::Result<T, RecordError>> {
        if self.exhausted {
            return None;
        }
        let filled = match self.fill() {
            Ok(filled) => filled,
            Err(e) => {
                self.exhausted = true;
                return Some(Err(RecordError::Processing(format!(
                    "read failed after record {}: {e}",
                    self.records
                ))));
            }
        };
        if filled == 0 {
            self.exhausted = true;
            return None;
        }

        self.records += 1;
        if filled < self.record_size {
            self.exhausted = true;
            return Some(Err(RecordError::Decode {
                record: self.records,
                reason: format!(
                    "trailing partial record of {filled} bytes, expected {}",
                    self.record_size
                ),
            }));
        }
        let record = self.records;
        Some((self.parse)(&self.buf).map_err(|e| e.at_record(record)))
    }

    fn name(&self) -> String {
        self.name.clone()
    }
}

/// Keep the raw bytes of a binary record
pub fn parse_bytes(bytes: &[u8]) -> std::result::Result<Vec<u8>, RecordError> {
    Ok(bytes.to_vec())
}

/// Parse a binary record of little-endian `i32` values
pub fn parse_i32_le(bytes: &[u8]) -> std::result::Result<Vec<i32>, RecordError> {
    if bytes.len() % 4 != 0 {
        return Err(RecordError::parse(format!(
            "{} bytes is not a whole number of i32 values",
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|word| i32::from_le_bytes([word[0], word[1], word[2], word[3]]))
        .collect())
}

/// Parse a comma-separated list of values, e.g. `36,13,27`
pub fn parse_fields<T>(line: &str) -> std::result::Result<Vec<T>, RecordError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    line.split(',')
        .map(|field| {
            let field = field.trim();
            field
                .parse::<T>()
                .map_err(|e| RecordError::parse(format!("invalid field '{field}': {e}")))
        })
        .collect()
}

/// Parse a line holding exactly one value
pub fn parse_value<T>(line: &str) -> std::result::Result<T, RecordError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    let line = line.trim();
    line.parse::<T>()
        .map_err(|e| RecordError::parse(format!("invalid value '{line}': {e}")))
}
