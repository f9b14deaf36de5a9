//! Chunk pass: split a record stream into merged partitions.
//!
//! The source is consumed in windows of at most `chunk_size` raw records.
//! Each window is merged in memory and written as one partition, numbered
//! in source order.
//!
//! # Boundary carry
//!
//! The last merged interval of every window is held back and folded into
//! the next window before that window is written. On sorted input (every
//! round after the first) this resolves all overlaps across window
//! boundaries in a single pass, whatever the chunk size. Each partition is
//! still sorted and internally disjoint.

use crate::commands::merge::MergeCommand;
use crate::config::MergeConfig;
use crate::interval::Interval;
use crate::output::IntervalWriter;
use crate::parallel::merge_windows;
use crate::partition::{PartitionId, PartitionStore};
use crate::record::{RawRecord, RecordSource, Result};
use tracing::{debug, warn};

/// Result of one chunk pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChunkPass {
    /// Partitions in source order
    pub partitions: Vec<PartitionId>,
    /// OR of every window's overlap flag
    pub had_overlap: bool,
    /// Raw records consumed
    pub records_read: u64,
    /// Records rejected by validation
    pub records_discarded: u64,
    /// Intervals written across all partitions
    pub intervals_written: u64,
}

/// Splits a record source into merged partitions.
#[derive(Debug, Clone)]
pub struct ChunkProcessor {
    chunk_size: usize,
    batch: usize,
    output_buffer: usize,
    merger: MergeCommand,
}

impl ChunkProcessor {
    pub fn new(config: &MergeConfig) -> Self {
        Self {
            chunk_size: config.chunk_size.max(1),
            batch: config.effective_batch(),
            output_buffer: config.output_buffer,
            merger: MergeCommand::new(),
        }
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Run one chunk pass for `round`.
    ///
    /// On failure every partition already written for `round` is removed
    /// (best effort) and the error is returned; a partial pass is never
    /// handed on.
    pub fn process<Src, S>(&self, source: &mut Src, store: &S, round: usize) -> Result<ChunkPass>
    where
        Src: RecordSource + ?Sized,
        S: PartitionStore + ?Sized,
    {
        match self.process_inner(source, store, round) {
            Ok(pass) => Ok(pass),
            Err(e) => {
                if let Err(cleanup) = store.remove_round(round) {
                    warn!(round, error = %cleanup, "failed to discard partial chunk pass");
                }
                Err(e)
            }
        }
    }

    fn process_inner<Src, S>(&self, source: &mut Src, store: &S, round: usize) -> Result<ChunkPass>
    where
        Src: RecordSource + ?Sized,
        S: PartitionStore + ?Sized,
    {
        let mut pass = ChunkPass::default();
        let mut carry: Option<Interval> = None;
        let mut exhausted = false;
        let mut windows: Vec<Vec<RawRecord>> = Vec::with_capacity(self.batch);

        while !exhausted {
            // Fill a batch of windows; sequential mode uses a batch of one.
            windows.clear();
            while windows.len() < self.batch {
                let mut window = Vec::with_capacity(self.chunk_size);
                let n = source.read_window(self.chunk_size, &mut window)?;
                pass.records_read += n as u64;
                if n < self.chunk_size {
                    exhausted = true;
                }
                if n > 0 {
                    windows.push(window);
                }
                if exhausted {
                    break;
                }
            }

            let outcomes = merge_windows(&windows, &self.merger);

            for (window, outcome) in windows.iter().zip(outcomes) {
                let mut intervals = outcome.intervals;
                pass.had_overlap |= outcome.had_overlap;
                pass.records_discarded += outcome.discarded as u64;

                if let Some(held) = carry.take() {
                    pass.had_overlap |= self.merger.absorb_into(&mut intervals, held);
                }
                // Only a full window can be followed by more records.
                if window.len() == self.chunk_size {
                    carry = intervals.pop();
                }

                self.write_partition(store, round, pass.partitions.len(), &intervals, &mut pass)?;
            }
        }

        // A full final window leaves its tail interval behind.
        if let Some(held) = carry.take() {
            self.write_partition(store, round, pass.partitions.len(), &[held], &mut pass)?;
        }

        debug!(
            round,
            partitions = pass.partitions.len(),
            records = pass.records_read,
            discarded = pass.records_discarded,
            had_overlap = pass.had_overlap,
            "chunk pass complete"
        );
        Ok(pass)
    }

    fn write_partition<S>(
        &self,
        store: &S,
        round: usize,
        index: usize,
        intervals: &[Interval],
        pass: &mut ChunkPass,
    ) -> Result<()>
    where
        S: PartitionStore + ?Sized,
    {
        let id = PartitionId::Chunk { round, index };
        let mut writer = IntervalWriter::with_capacity(self.output_buffer, store.create(id)?);
        writer.write_all(intervals)?;
        pass.intervals_written += writer.finish()?;
        pass.partitions.push(id);
        Ok(())
    }
}
