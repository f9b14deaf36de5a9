//! Core interval type.

use std::cmp::Ordering;
use std::fmt;

/// A numeric interval with half-open coordinates `[start, end)`.
///
/// Well-formed intervals always have `start < end`; the validator is the
/// only producer of intervals from untrusted input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Interval {
    pub start: i64,
    pub end: i64,
}

impl Interval {
    /// Create a new interval.
    #[inline]
    pub fn new(start: i64, end: i64) -> Self {
        Self { start, end }
    }

    /// Check whether `other` can be folded into this interval during a sweep.
    ///
    /// Requires `self.start <= other.start`. Touching intervals
    /// (`self.end == other.start`) are mergeable.
    #[inline]
    pub fn touches(&self, other: &Interval) -> bool {
        self.end >= other.start
    }

    /// Extend this interval's end to cover `other`.
    #[inline]
    pub fn absorb(&mut self, other: &Interval) {
        self.end = self.end.max(other.end);
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.start, self.end)
    }
}

impl Ord for Interval {
    fn cmp(&self, other: &Self) -> Ordering {
        self.start
            .cmp(&other.start)
            .then(self.end.cmp(&other.end))
    }
}

impl PartialOrd for Interval {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl From<(i64, i64)> for Interval {
    fn from((start, end): (i64, i64)) -> Self {
        Self::new(start, end)
    }
}
