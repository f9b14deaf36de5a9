//! K-way join of sorted partitions.
//!
//! Every partition of a chunk pass is sorted, so the whole pass can be
//! merged into one globally sorted dataset with a min-heap holding one
//! pending interval per partition. Overlaps between intervals coming from
//! different partitions are left alone here; the next chunk pass collapses
//! them.
//!
//! At most `max_fan_in` partitions are open at once. Larger passes are
//! joined in groups into intermediate runs, pass after pass, until one
//! group is left; groups are contiguous, so ties still resolve in
//! partition order.
//!
//! # Memory Complexity
//!
//! O(f) for a fan-in of f, plus one read buffer per open partition.

use crate::interval::Interval;
use crate::output::IntervalWriter;
use crate::partition::{PartitionId, PartitionStore};
use crate::record::Result;
use crate::validate::parse_line;
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::io::{BufRead, BufReader, Read};
use tracing::debug;

/// Read buffer per partition (64KB). Many partitions are open at once.
pub const PARTITION_READ_BUFFER: usize = 64 * 1024;

/// Result of joining one round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JoinOutput {
    /// The round output dataset
    pub id: PartitionId,
    /// Intervals written to it
    pub records: u64,
}

/// Sequential reader of one partition, skipping lines that do not validate.
struct PartitionCursor<R: Read> {
    reader: BufReader<R>,
    line: Vec<u8>,
}

impl<R: Read> PartitionCursor<R> {
    fn new(reader: R, capacity: usize) -> Self {
        Self {
            reader: BufReader::with_capacity(capacity, reader),
            line: Vec::with_capacity(32),
        }
    }

    fn next_interval(&mut self) -> Result<Option<Interval>> {
        loop {
            self.line.clear();
            if self.reader.read_until(b'\n', &mut self.line)? == 0 {
                return Ok(None);
            }
            if let Some(interval) = parse_line(&self.line) {
                return Ok(Some(interval));
            }
        }
    }
}

/// Joins the partitions of one chunk pass into a round output.
#[derive(Debug, Clone)]
pub struct KWayJoiner {
    read_buffer: usize,
    output_buffer: usize,
    max_fan_in: usize,
}

impl Default for KWayJoiner {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_OUTPUT_BUFFER)
    }
}

impl KWayJoiner {
    pub fn new(output_buffer: usize) -> Self {
        Self {
            read_buffer: PARTITION_READ_BUFFER,
            output_buffer,
            max_fan_in: crate::config::DEFAULT_MAX_FAN_IN,
        }
    }

    /// Set the per-partition read buffer.
    pub fn with_read_buffer(mut self, capacity: usize) -> Self {
        self.read_buffer = capacity.max(1);
        self
    }

    /// Set how many partitions may be open at once (at least 2).
    pub fn with_max_fan_in(mut self, max_fan_in: usize) -> Self {
        self.max_fan_in = max_fan_in.max(2);
        self
    }

    /// Merge `partitions` into `PartitionId::Output { round }`.
    ///
    /// Ties on `(start, end)` are broken by partition order. Intermediate
    /// runs are removed once consumed; the input partitions are left to
    /// the caller.
    pub fn join<S>(&self, store: &S, partitions: &[PartitionId], round: usize) -> Result<JoinOutput>
    where
        S: PartitionStore + ?Sized,
    {
        let mut inputs = partitions.to_vec();
        let mut pass = 0;

        while inputs.len() > self.max_fan_in {
            let mut runs = Vec::with_capacity(inputs.len().div_ceil(self.max_fan_in));
            for (index, group) in inputs.chunks(self.max_fan_in).enumerate() {
                let id = PartitionId::Run { round, pass, index };
                self.merge_group(store, group, id)?;
                remove_runs(store, group)?;
                runs.push(id);
            }
            debug!(round, pass, runs = runs.len(), "intermediate join pass complete");
            inputs = runs;
            pass += 1;
        }

        let id = PartitionId::Output { round };
        let records = self.merge_group(store, &inputs, id)?;
        remove_runs(store, &inputs)?;
        debug!(round, partitions = partitions.len(), passes = pass + 1, records, "k-way join complete");

        Ok(JoinOutput { id, records })
    }

    /// Heap-merge `group` into the partition `target`.
    fn merge_group<S>(&self, store: &S, group: &[PartitionId], target: PartitionId) -> Result<u64>
    where
        S: PartitionStore + ?Sized,
    {
        let mut cursors = Vec::with_capacity(group.len());
        for &id in group {
            cursors.push(PartitionCursor::new(store.open(id)?, self.read_buffer));
        }

        // Min-heap: (interval, partition index)
        let mut heap: BinaryHeap<Reverse<(Interval, usize)>> =
            BinaryHeap::with_capacity(cursors.len());
        for (idx, cursor) in cursors.iter_mut().enumerate() {
            if let Some(interval) = cursor.next_interval()? {
                heap.push(Reverse((interval, idx)));
            }
        }

        let mut writer = IntervalWriter::with_capacity(self.output_buffer, store.create(target)?);

        while let Some(Reverse((interval, idx))) = heap.pop() {
            writer.write_interval(&interval)?;

            if let Some(next) = cursors[idx].next_interval()? {
                heap.push(Reverse((next, idx)));
            }
        }

        writer.finish()
    }
}

fn remove_runs<S>(store: &S, ids: &[PartitionId]) -> Result<()>
where
    S: PartitionStore + ?Sized,
{
    for &id in ids {
        if let PartitionId::Run { .. } = id {
            store.remove(id)?;
        }
    }
    Ok(())
}
