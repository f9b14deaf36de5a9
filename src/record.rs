//! Streaming interval record reader.
//!
//! Records are line oriented: one candidate interval per line, fields
//! separated by a comma (`"<start>,<end>\n"`). The reader never judges
//! whether a record is a valid interval; that is left to the validator, so
//! malformed lines flow through as ordinary records and get dropped later.

use crate::partition::PartitionId;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Read};
use std::path::Path;
use thiserror::Error;

/// Field separator of the record encoding.
pub const FIELD_SEPARATOR: char = ',';

/// Errors that can abort a merge job.
///
/// Malformed records are not errors; only resource failures are.
#[derive(Error, Debug)]
pub enum MergeError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Partition not found: {0}")]
    MissingPartition(PartitionId),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("No convergence after {rounds} rounds (recent sizes: {sizes:?})")]
    NoConvergence { rounds: usize, sizes: Vec<u64> },
}

pub type Result<T> = std::result::Result<T, MergeError>;

/// A raw candidate record: an arbitrary number of unparsed fields.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RawRecord {
    fields: Vec<String>,
}

impl RawRecord {
    /// Build a record from its fields.
    pub fn from_fields<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            fields: fields.into_iter().map(Into::into).collect(),
        }
    }

    /// Split one encoded line into fields. A trailing `\r` is ignored.
    pub fn from_line(line: &str) -> Self {
        let line = line.strip_suffix('\n').unwrap_or(line);
        let line = line.strip_suffix('\r').unwrap_or(line);
        Self::from_fields(line.split(FIELD_SEPARATOR))
    }

    #[inline]
    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl From<(i64, i64)> for RawRecord {
    fn from((start, end): (i64, i64)) -> Self {
        Self::from_fields([start.to_string(), end.to_string()])
    }
}

/// Anything that yields raw records one at a time.
pub trait RecordSource {
    /// Produce the next record, or `None` at end of stream.
    fn next_record(&mut self) -> Result<Option<RawRecord>>;

    /// Fill `window` with up to `max` records. Returns how many were read;
    /// fewer than `max` means the source is exhausted.
    fn read_window(&mut self, max: usize, window: &mut Vec<RawRecord>) -> Result<usize> {
        window.clear();
        while window.len() < max {
            match self.next_record()? {
                Some(record) => window.push(record),
                None => break,
            }
        }
        Ok(window.len())
    }
}

impl<S: RecordSource + ?Sized> RecordSource for &mut S {
    fn next_record(&mut self) -> Result<Option<RawRecord>> {
        (**self).next_record()
    }
}

/// A streaming record reader over any byte source.
pub struct RecordReader<R: Read> {
    reader: BufReader<R>,
    buffer: Vec<u8>,
}

impl RecordReader<File> {
    /// Open a record file from a path.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        Ok(Self::new(file))
    }
}

impl<R: Read> RecordReader<R> {
    /// Create a new reader from any readable source.
    pub fn new(reader: R) -> Self {
        Self {
            reader: BufReader::new(reader),
            buffer: Vec::with_capacity(64),
        }
    }

    /// Create a reader with custom buffer capacity.
    pub fn with_capacity(reader: R, capacity: usize) -> Self {
        Self {
            reader: BufReader::with_capacity(capacity, reader),
            buffer: Vec::with_capacity(64),
        }
    }

    /// Read the next record. Lines that are not valid UTF-8 are decoded
    /// lossily and left for validation to reject.
    pub fn read_record(&mut self) -> Result<Option<RawRecord>> {
        self.buffer.clear();
        let bytes_read = self.reader.read_until(b'\n', &mut self.buffer)?;
        if bytes_read == 0 {
            return Ok(None);
        }

        let line = String::from_utf8_lossy(&self.buffer);
        Ok(Some(RawRecord::from_line(&line)))
    }

    /// Get an iterator over all records.
    pub fn records(self) -> RecordIter<R> {
        RecordIter { reader: self }
    }
}

impl<R: Read> RecordSource for RecordReader<R> {
    fn next_record(&mut self) -> Result<Option<RawRecord>> {
        self.read_record()
    }
}

/// Iterator over raw records.
pub struct RecordIter<R: Read> {
    reader: RecordReader<R>,
}

impl<R: Read> Iterator for RecordIter<R> {
    type Item = Result<RawRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        self.reader.read_record().transpose()
    }
}

/// Adapter turning any iterator of records into a record source.
pub struct IterSource<I> {
    inner: I,
}

impl<I> IterSource<I>
where
    I: Iterator<Item = RawRecord>,
{
    pub fn new<T: IntoIterator<IntoIter = I>>(records: T) -> Self {
        Self {
            inner: records.into_iter(),
        }
    }
}

impl<I> RecordSource for IterSource<I>
where
    I: Iterator<Item = RawRecord>,
{
    fn next_record(&mut self) -> Result<Option<RawRecord>> {
        Ok(self.inner.next())
    }
}

/// Read all records from a file.
pub fn read_records<P: AsRef<Path>>(path: P) -> Result<Vec<RawRecord>> {
    RecordReader::from_path(path)?.records().collect()
}

/// Parse records from a string (useful for testing).
pub fn parse_records(content: &str) -> Vec<RawRecord> {
    content.lines().map(RawRecord::from_line).collect()
}
