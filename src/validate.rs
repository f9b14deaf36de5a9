//! Interval validation.
//!
//! A candidate becomes an [`Interval`] only if it has exactly two fields,
//! both parse as integers, and `start < end`. Everything else is dropped
//! silently: malformed input is expected noise, never a job failure.

use crate::interval::Interval;
use crate::record::RawRecord;
use memchr::memchr;

/// Parse one integer field.
///
/// Accepts surrounding ASCII whitespace and a leading sign. Values that do
/// not fit in an `i64` are rejected.
#[inline]
pub fn parse_int(field: &str) -> Option<i64> {
    let field = field.trim_matches(|c: char| c.is_ascii_whitespace());
    if field.is_empty() {
        return None;
    }
    field.parse().ok()
}

/// Validate a pair of already split fields.
#[inline]
pub fn validate_pair(start: &str, end: &str) -> Option<Interval> {
    let start = parse_int(start)?;
    let end = parse_int(end)?;
    (start < end).then(|| Interval::new(start, end))
}

/// Validate a raw record.
#[inline]
pub fn validate(record: &RawRecord) -> Option<Interval> {
    match record.fields() {
        [start, end] => validate_pair(start, end),
        _ => None,
    }
}

/// Validate one encoded line without allocating.
///
/// Same rules as [`validate`]; used on the hot path when reading back
/// partitions.
#[inline]
pub fn parse_line(line: &[u8]) -> Option<Interval> {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    let line = line.strip_suffix(b"\r").unwrap_or(line);

    let comma = memchr(b',', line)?;
    let (start, rest) = (&line[..comma], &line[comma + 1..]);
    if memchr(b',', rest).is_some() {
        return None;
    }

    let start = std::str::from_utf8(start).ok()?;
    let end = std::str::from_utf8(rest).ok()?;
    validate_pair(start, end)
}

/// Keep the valid intervals of a batch, in input order.
pub fn enforce_correctness(records: &[RawRecord]) -> Vec<Interval> {
    records.iter().filter_map(validate).collect()
}
