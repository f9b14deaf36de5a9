//! Parallel processing utilities using Rayon.
//!
//! Chunk windows within one pass are independent, so they can be merged on
//! the thread pool. Results always come back in source order.

use crate::commands::merge::{MergeCommand, MergeOutcome};
use crate::record::RawRecord;
use rayon::prelude::*;

/// Minimum number of records in a batch before enabling parallelization.
/// Below this threshold, sequential processing is faster due to
/// thread spawn overhead.
pub const PARALLEL_THRESHOLD: usize = 10_000;

/// Merge each window independently, preserving window order.
pub fn merge_windows(windows: &[Vec<RawRecord>], merger: &MergeCommand) -> Vec<MergeOutcome> {
    let total: usize = windows.iter().map(Vec::len).sum();

    if windows.len() < 2 || total < PARALLEL_THRESHOLD {
        return windows.iter().map(|w| merger.merge_records(w)).collect();
    }

    windows
        .par_iter()
        .map(|w| merger.merge_records(w))
        .collect()
}
