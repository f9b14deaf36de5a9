//! Efficient interval output.
//!
//! Uses itoa for integer formatting to avoid allocation in the hot path.

use crate::interval::Interval;
use crate::record::Result;
use std::io::{BufWriter, Write};

/// Default buffer size for IntervalWriter (256KB).
pub const DEFAULT_BUFFER_SIZE: usize = 256 * 1024;

/// Buffered writer for the `"<start>,<end>\n"` record encoding.
pub struct IntervalWriter<W: Write> {
    writer: BufWriter<W>,
    itoa_buf: itoa::Buffer,
    written: u64,
}

impl<W: Write> IntervalWriter<W> {
    /// Create a new IntervalWriter with the default buffer.
    pub fn new(output: W) -> Self {
        Self::with_capacity(DEFAULT_BUFFER_SIZE, output)
    }

    /// Create a new IntervalWriter with specified buffer size.
    pub fn with_capacity(capacity: usize, output: W) -> Self {
        Self {
            writer: BufWriter::with_capacity(capacity, output),
            itoa_buf: itoa::Buffer::new(),
            written: 0,
        }
    }

    /// Write one interval followed by newline.
    #[inline]
    pub fn write_interval(&mut self, interval: &Interval) -> Result<()> {
        self.writer
            .write_all(self.itoa_buf.format(interval.start).as_bytes())?;
        self.writer.write_all(b",")?;
        self.writer
            .write_all(self.itoa_buf.format(interval.end).as_bytes())?;
        self.writer.write_all(b"\n")?;
        self.written += 1;
        Ok(())
    }

    /// Write a slice of intervals.
    pub fn write_all(&mut self, intervals: &[Interval]) -> Result<()> {
        for interval in intervals {
            self.write_interval(interval)?;
        }
        Ok(())
    }

    /// Write a raw line as-is with newline.
    #[inline]
    pub fn write_line(&mut self, line: &[u8]) -> Result<()> {
        self.writer.write_all(line)?;
        self.writer.write_all(b"\n")?;
        self.written += 1;
        Ok(())
    }

    /// Number of lines written so far.
    #[inline]
    pub fn written(&self) -> u64 {
        self.written
    }

    /// Flush the output buffer.
    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }

    /// Flush and return the line count, surfacing any deferred write error.
    pub fn finish(mut self) -> Result<u64> {
        self.writer.flush()?;
        let written = self.written;
        self.writer
            .into_inner()
            .map_err(|e| e.into_error())?
            .flush()?;
        Ok(written)
    }
}

/// Write intervals to a writer.
pub fn write_intervals<W: Write>(writer: W, intervals: &[Interval]) -> Result<u64> {
    let mut out = IntervalWriter::new(writer);
    out.write_all(intervals)?;
    out.finish()
}
