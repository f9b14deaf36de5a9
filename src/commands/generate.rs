//! Generate synthetic interval datasets.
//!
//! This module provides the `imerge generate` command to create record files
//! for exercising the external merge.
//!
//! Layout of a dataset:
//! - A dataset is `chains` consecutive chains of `chain_len` intervals
//! - Every interval is 7 wide and starts one before the previous end, so a
//!   chain collapses into a single interval
//! - The next chain starts one before the end of the previous chain's last
//!   record, so without gaps the whole file collapses into one interval
//! - With `non_overlaps`, a 7-wide interval is appended to every chain one
//!   unit past its end, splitting the result into `chains + 1` intervals
//! - With `errors`, one malformed record is injected at position 2 of
//!   every chain
//!
//! Deterministic via seed.

use crate::output::IntervalWriter;
use crate::record::{MergeError, Result};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::Instant;

/// Width of every generated interval.
pub const INTERVAL_WIDTH: i64 = 7;

/// Malformed records injected in `errors` mode.
const MALFORMED: [&str; 5] = ["", "1,2,3", "a,3", "a,c", "18,9"];

/// Count specification (parses 1K, 1M, etc.).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeSpec {
    pub count: u64,
}

impl SizeSpec {
    /// Parse size from string (e.g., "1K", "5M", "100").
    pub fn from_str(s: &str) -> Option<Self> {
        let s = s.trim().to_uppercase();
        if s.is_empty() {
            return None;
        }
        let (digits, multiplier) = match s.as_bytes()[s.len() - 1] {
            b'K' => (&s[..s.len() - 1], 1_000),
            b'M' => (&s[..s.len() - 1], 1_000_000),
            b'G' => (&s[..s.len() - 1], 1_000_000_000),
            _ => (s.as_str(), 1),
        };
        let n: u64 = digits.parse().ok()?;
        n.checked_mul(multiplier).map(|count| Self { count })
    }

    /// Format for display (e.g., 1000000 -> "1M").
    pub fn display(&self) -> String {
        format_count(self.count)
    }
}

/// Configuration for the generate command.
#[derive(Debug, Clone)]
pub struct GenerateConfig {
    pub output: PathBuf,
    /// Number of chains
    pub chains: u64,
    /// Intervals per chain (at least 2)
    pub chain_len: u64,
    /// First start coordinate
    pub origin: i64,
    pub errors: bool,
    pub non_overlaps: bool,
    pub seed: u64,
}

impl Default for GenerateConfig {
    fn default() -> Self {
        Self {
            output: PathBuf::from("input.txt"),
            chains: 1000,
            chain_len: 1000,
            origin: 0,
            errors: false,
            non_overlaps: false,
            seed: 42,
        }
    }
}

/// Statistics from generate operation.
#[derive(Debug, Default, Clone)]
pub struct GenerateStats {
    pub records: u64,
    pub malformed: u64,
    /// Intervals a correct merge of the file yields
    pub expected_intervals: u64,
    pub elapsed_secs: f64,
}

impl std::fmt::Display for GenerateStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} records ({} malformed), expect {} merged intervals ({:.1}s)",
            format_count(self.records),
            self.malformed,
            self.expected_intervals,
            self.elapsed_secs
        )
    }
}

/// One generated line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyntheticRecord {
    Interval { start: i64, end: i64 },
    Malformed(&'static str),
}

/// Generate command.
pub struct GenerateCommand {
    config: GenerateConfig,
}

impl GenerateCommand {
    /// Create a new generate command with the given config.
    pub fn new(config: GenerateConfig) -> Self {
        Self { config }
    }

    /// Write the dataset to `config.output`.
    pub fn run(&self) -> Result<GenerateStats> {
        self.write_to(&self.config.output)
    }

    /// Write the dataset to `path`.
    pub fn write_to(&self, path: &Path) -> Result<GenerateStats> {
        if self.config.chains == 0 {
            return Err(MergeError::InvalidConfig(
                "chains must be at least 1".to_string(),
            ));
        }

        let start = Instant::now();
        let mut stats = GenerateStats::default();
        let mut rng = SmallRng::seed_from_u64(self.config.seed);
        let mut writer = IntervalWriter::new(File::create(path)?);
        let mut next_start = self.config.origin;

        for _ in 0..self.config.chains {
            for record in self.chain(next_start, &mut rng) {
                match record {
                    SyntheticRecord::Interval { start, end } => {
                        writer.write_interval(&(start, end).into())?;
                        next_start = end - 1;
                    }
                    SyntheticRecord::Malformed(line) => {
                        writer.write_line(line.as_bytes())?;
                        stats.malformed += 1;
                    }
                }
            }
        }

        stats.records = writer.finish()?;
        stats.expected_intervals = self.expected_intervals();
        stats.elapsed_secs = start.elapsed().as_secs_f64();
        Ok(stats)
    }

    /// Intervals a correct merge of the generated data yields.
    pub fn expected_intervals(&self) -> u64 {
        if self.config.non_overlaps {
            self.config.chains + 1
        } else {
            1
        }
    }

    /// Records of one chain starting at `start`.
    pub fn chain(&self, start: i64, rng: &mut SmallRng) -> Vec<SyntheticRecord> {
        let len = self.config.chain_len.max(2);
        let mut records = Vec::with_capacity(len as usize + 2);
        let mut itr_start = start;

        for i in 0..len {
            if i == 2 && self.config.errors {
                let kind = rng.gen_range(0..MALFORMED.len());
                records.push(SyntheticRecord::Malformed(MALFORMED[kind]));
            }
            let end = itr_start + INTERVAL_WIDTH;
            records.push(SyntheticRecord::Interval {
                start: itr_start,
                end,
            });
            itr_start = end - 1;
        }

        if self.config.non_overlaps {
            let gap_start = itr_start + 1 + 1;
            records.push(SyntheticRecord::Interval {
                start: gap_start,
                end: gap_start + INTERVAL_WIDTH,
            });
        }

        records
    }
}

/// Format a count for display (e.g., 1000000 -> "1M").
fn format_count(count: u64) -> String {
    if count >= 1_000_000_000 && count % 1_000_000_000 == 0 {
        format!("{}G", count / 1_000_000_000)
    } else if count >= 1_000_000 && count % 1_000_000 == 0 {
        format!("{}M", count / 1_000_000)
    } else if count >= 1_000 && count % 1_000 == 0 {
        format!("{}K", count / 1_000)
    } else {
        count.to_string()
    }
}
