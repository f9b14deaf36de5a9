//! In-memory interval merge.
//!
//! Uses O(n log n) sort + O(n) single-pass sweep-line merge. This is the
//! unit of work for every chunk window of the external merge as well.

use crate::interval::Interval;
use crate::record::RawRecord;
use crate::validate::validate;

/// Result of merging one batch of candidates.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeOutcome {
    /// Sorted, pairwise disjoint intervals
    pub intervals: Vec<Interval>,
    /// True if the sweep folded at least one interval into another
    pub had_overlap: bool,
    /// Candidates rejected by validation
    pub discarded: usize,
}

impl MergeOutcome {
    #[inline]
    pub fn len(&self) -> usize {
        self.intervals.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.intervals.is_empty()
    }
}

/// Merge command.
#[derive(Debug, Clone, Copy, Default)]
pub struct MergeCommand;

impl MergeCommand {
    pub fn new() -> Self {
        Self
    }

    /// Validate, sort and sweep a batch of raw candidates.
    pub fn merge_records(&self, records: &[RawRecord]) -> MergeOutcome {
        let mut intervals = Vec::with_capacity(records.len());
        for record in records {
            if let Some(interval) = validate(record) {
                intervals.push(interval);
            }
        }
        let discarded = records.len() - intervals.len();

        let (intervals, had_overlap) = self.merge(intervals);
        MergeOutcome {
            intervals,
            had_overlap,
            discarded,
        }
    }

    /// Sort and sweep already validated intervals.
    ///
    /// Ties on start are broken by end, so the result is deterministic.
    pub fn merge(&self, mut intervals: Vec<Interval>) -> (Vec<Interval>, bool) {
        if intervals.len() < 2 {
            return (intervals, false);
        }
        intervals.sort_unstable();
        self.merge_sorted(intervals)
    }

    /// Sweep intervals already sorted by start.
    fn merge_sorted(&self, intervals: Vec<Interval>) -> (Vec<Interval>, bool) {
        let mut result: Vec<Interval> = Vec::with_capacity(intervals.len());
        let mut had_overlap = false;

        for interval in intervals {
            match result.last_mut() {
                Some(last) if last.touches(&interval) => {
                    last.absorb(&interval);
                    had_overlap = true;
                }
                _ => result.push(interval),
            }
        }

        (result, had_overlap)
    }

    /// Insert one interval into a merged set, keeping it merged.
    ///
    /// Returns true if the interval collapsed into (or swallowed) a
    /// neighbour. Equivalent to re-merging the whole set with the extra
    /// interval, in O(log n + k) for k collapsed neighbours.
    pub fn absorb_into(&self, set: &mut Vec<Interval>, interval: Interval) -> bool {
        let mut pos = set.partition_point(|x| x.start <= interval.start);
        let mut collapsed = false;

        if pos > 0 && set[pos - 1].touches(&interval) {
            pos -= 1;
            set[pos].absorb(&interval);
            collapsed = true;
        } else {
            set.insert(pos, interval);
        }

        let mut next = pos + 1;
        while next < set.len() && set[pos].touches(&set[next]) {
            next += 1;
        }
        if next > pos + 1 {
            let tail = set[next - 1];
            set[pos].absorb(&tail);
            set.drain(pos + 1..next);
            collapsed = true;
        }

        collapsed
    }
}

/// Merge raw candidates held in memory.
///
/// Total: malformed candidates are dropped, never reported as errors.
pub fn merge_in_memory(records: &[RawRecord]) -> MergeOutcome {
    MergeCommand::new().merge_records(records)
}

/// Check the merged-set invariant: `set[i].end < set[i + 1].start`.
pub fn is_merged(set: &[Interval]) -> bool {
    set.iter().all(|i| i.start < i.end) && set.windows(2).all(|w| w[0].end < w[1].start)
}
