//! External merge with iterative convergence.
//!
//! Merges inputs of any size in bounded memory.
//!
//! # Algorithm
//!
//! 1. Chunk pass: split the input into windows, merge each in memory,
//!    write each as a sorted partition
//! 2. K-way join: merge all partitions into one sorted round output
//! 3. Feed the round output back into step 1 until the convergence policy
//!    says the output is final
//!
//! Round state (overlap flag and recent output sizes) lives in a
//! [`RoundState`] owned by one call; nothing is shared between jobs.
//!
//! # Memory Complexity
//!
//! O(chunk_size × batch) records during a chunk pass, O(max_fan_in) during
//! a join.

use crate::commands::chunk::{ChunkPass, ChunkProcessor};
use crate::commands::kway::{JoinOutput, KWayJoiner};
use crate::config::{ConvergencePolicy, MergeConfig};
use crate::interval::Interval;
use crate::partition::{DiskStore, PartitionId, PartitionStore};
use crate::record::{MergeError, RecordReader, RecordSource, Result};
use crate::validate::parse_line;
use std::collections::VecDeque;
use std::fmt;
use std::io::{self, BufRead, BufReader, Write};
use std::path::Path;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Convergence bookkeeping for one job.
#[derive(Debug, Clone)]
pub struct RoundState {
    overlap_detected: bool,
    recent_sizes: VecDeque<u64>,
    window: usize,
}

impl RoundState {
    /// Fresh state tracking the last `window` output sizes.
    pub fn new(window: usize) -> Self {
        let window = window.max(1);
        Self {
            overlap_detected: false,
            recent_sizes: VecDeque::with_capacity(window),
            window,
        }
    }

    /// Record the outcome of a finished round.
    pub fn record(&mut self, had_overlap: bool, output_size: u64) {
        self.overlap_detected = had_overlap;
        if self.recent_sizes.len() == self.window {
            self.recent_sizes.pop_front();
        }
        self.recent_sizes.push_back(output_size);
    }

    /// Whether the latest chunk pass collapsed anything.
    pub fn overlap_detected(&self) -> bool {
        self.overlap_detected
    }

    /// The last output sizes, oldest first.
    pub fn recent_sizes(&self) -> Vec<u64> {
        self.recent_sizes.iter().copied().collect()
    }

    /// True once `window` sizes are recorded and all are equal.
    pub fn is_size_stable(&self) -> bool {
        self.recent_sizes.len() == self.window
            && self.recent_sizes.iter().all(|&s| Some(s) == self.recent_sizes.front().copied())
    }

    /// Whether the output of round `round` may be declared final.
    pub fn is_converged(&self, policy: ConvergencePolicy, round: usize) -> bool {
        match policy {
            ConvergencePolicy::SizeStability => !self.overlap_detected && self.is_size_stable(),
            // Round 0 reads unsorted input, so a quiet chunk pass proves
            // nothing about cross-window overlaps there.
            ConvergencePolicy::NoCollapse => round >= 1 && !self.overlap_detected,
        }
    }
}

/// Statistics from an external merge.
#[derive(Debug, Default, Clone)]
pub struct ExternalMergeStats {
    /// Rounds run, including round 0
    pub rounds: usize,
    /// Output size of every round, in order
    pub round_sizes: Vec<u64>,
    /// Raw records read from the input
    pub records_read: u64,
    /// Input records dropped by validation
    pub records_discarded: u64,
    /// Partitions written in round 0
    pub initial_partitions: usize,
    /// Intervals in the final result
    pub intervals_written: u64,
    pub elapsed_secs: f64,
}

impl fmt::Display for ExternalMergeStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Records: {} read, {} discarded, {} merged | Rounds: {} {:?} | Partitions: {} | {:.2}s",
            self.records_read,
            self.records_discarded,
            self.intervals_written,
            self.rounds,
            self.round_sizes,
            self.initial_partitions,
            self.elapsed_secs
        )
    }
}

/// External merge command.
pub struct ExternalMergeCommand<S: PartitionStore> {
    config: MergeConfig,
    store: S,
    chunker: ChunkProcessor,
    joiner: KWayJoiner,
    stats: ExternalMergeStats,
}

impl ExternalMergeCommand<DiskStore> {
    /// Command backed by a disk store: `config.work_dir` if set (files kept),
    /// else a temporary directory.
    pub fn with_disk_store(config: MergeConfig) -> Result<Self> {
        let store = match config.work_dir {
            Some(ref dir) => DiskStore::at(dir)?,
            None => DiskStore::temporary()?,
        };
        Self::new(config, store)
    }

    /// Merge a record file and write the final intervals to `output`.
    pub fn run<P: AsRef<Path>, W: Write>(
        &mut self,
        input_path: P,
        output: &mut W,
    ) -> Result<ExternalMergeStats> {
        let file = std::fs::File::open(input_path.as_ref())?;
        let mut reader = RecordReader::with_capacity(file, self.config.input_buffer);
        self.run_source(&mut reader, output)
    }

    /// Merge records from stdin.
    pub fn run_stdin<W: Write>(&mut self, output: &mut W) -> Result<ExternalMergeStats> {
        let stdin = io::stdin();
        let mut reader = RecordReader::with_capacity(stdin.lock(), self.config.input_buffer);
        self.run_source(&mut reader, output)
    }
}

impl<S: PartitionStore> ExternalMergeCommand<S> {
    /// Create a command over `store`. Fails on an invalid config.
    pub fn new(config: MergeConfig, store: S) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            chunker: ChunkProcessor::new(&config),
            joiner: KWayJoiner::new(config.output_buffer).with_max_fan_in(config.max_fan_in),
            config,
            store,
            stats: ExternalMergeStats::default(),
        })
    }

    pub fn config(&self) -> &MergeConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Statistics of the last completed job.
    pub fn stats(&self) -> &ExternalMergeStats {
        &self.stats
    }

    /// Merge a record source; returns the id of the final partition.
    ///
    /// The job owns the store: partitions left by an earlier job are
    /// cleared first. Either the whole job converges or an error is
    /// returned. On error no round output of this job is left in the store.
    pub fn merge_external<Src>(&mut self, source: &mut Src) -> Result<PartitionId>
    where
        Src: RecordSource + ?Sized,
    {
        let start = Instant::now();
        self.store.clear()?;
        let mut stats = ExternalMergeStats::default();
        let mut state = RoundState::new(self.config.stable_rounds);

        let mut round = 0;
        let mut output = match self.run_round(source, round, &mut state, &mut stats) {
            Ok(output) => output,
            Err(e) => return Err(self.abort(round, e)),
        };

        while !state.is_converged(self.config.policy, round) {
            if round + 1 >= self.config.max_rounds {
                let err = MergeError::NoConvergence {
                    rounds: round + 1,
                    sizes: state.recent_sizes(),
                };
                return Err(self.abort(round, err));
            }

            let previous = output.id;
            round += 1;

            let next = self
                .store
                .open(previous)
                .map(|r| RecordReader::with_capacity(r, self.config.input_buffer))
                .and_then(|mut reader| self.run_round(&mut reader, round, &mut state, &mut stats));
            output = match next {
                Ok(output) => output,
                Err(e) => return Err(self.abort(round, e)),
            };

            // Superseded by this round's output.
            if let Err(e) = self.store.remove_round(round - 1) {
                return Err(self.abort(round, e));
            }
        }

        stats.rounds = round + 1;
        stats.intervals_written = output.records;
        stats.elapsed_secs = start.elapsed().as_secs_f64();
        info!(
            rounds = stats.rounds,
            intervals = output.records,
            partition = %output.id,
            "merge converged"
        );
        self.stats = stats;

        Ok(output.id)
    }

    /// One chunk pass plus join.
    fn run_round<Src>(
        &self,
        source: &mut Src,
        round: usize,
        state: &mut RoundState,
        stats: &mut ExternalMergeStats,
    ) -> Result<JoinOutput>
    where
        Src: RecordSource + ?Sized,
    {
        let pass: ChunkPass = self.chunker.process(source, &self.store, round)?;
        let output = self.joiner.join(&self.store, &pass.partitions, round)?;

        // Chunks are only needed until their round output exists.
        self.store.remove_chunks(round)?;

        if round == 0 {
            stats.records_read = pass.records_read;
            stats.records_discarded = pass.records_discarded;
            stats.initial_partitions = pass.partitions.len();
        }
        stats.round_sizes.push(output.records);
        state.record(pass.had_overlap, output.records);

        info!(
            round,
            partitions = pass.partitions.len(),
            size = output.records,
            had_overlap = pass.had_overlap,
            "round complete"
        );
        debug!(recent_sizes = ?state.recent_sizes(), "round state");

        Ok(output)
    }

    /// Discard the partitions of the failing round and its predecessor.
    fn abort(&self, round: usize, err: MergeError) -> MergeError {
        warn!(round, error = %err, "merge aborted");
        let rounds = if round > 0 { vec![round - 1, round] } else { vec![round] };
        for r in rounds {
            if let Err(cleanup) = self.store.remove_round(r) {
                warn!(round = r, error = %cleanup, "failed to clean up partitions");
            }
        }
        err
    }

    /// Read a stored partition fully into memory.
    pub fn read_partition(&self, id: PartitionId) -> Result<Vec<Interval>> {
        let mut reader = BufReader::with_capacity(self.config.input_buffer, self.store.open(id)?);
        let mut intervals = Vec::new();
        let mut line = Vec::new();
        loop {
            line.clear();
            if reader.read_until(b'\n', &mut line)? == 0 {
                break;
            }
            if let Some(interval) = parse_line(&line) {
                intervals.push(interval);
            }
        }
        Ok(intervals)
    }

    /// Stream a stored partition to `output`. Returns bytes copied.
    pub fn copy_partition<W: Write>(&self, id: PartitionId, output: &mut W) -> Result<u64> {
        let mut reader = self.store.open(id)?;
        Ok(io::copy(&mut reader, output)?)
    }

    /// Merge `source` and stream the final intervals to `output`.
    pub fn run_source<Src, W>(&mut self, source: &mut Src, output: &mut W) -> Result<ExternalMergeStats>
    where
        Src: RecordSource + ?Sized,
        W: Write,
    {
        let id = self.merge_external(source)?;
        self.copy_partition(id, output)?;
        output.flush()?;
        Ok(self.stats.clone())
    }
}

/// Merge a record source through `store` with `config`.
pub fn merge_external<Src, S>(source: &mut Src, store: S, config: MergeConfig) -> Result<PartitionId>
where
    Src: RecordSource + ?Sized,
    S: PartitionStore,
{
    ExternalMergeCommand::new(config, store)?.merge_external(source)
}
