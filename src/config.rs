//! Runtime configuration for merge jobs.
//!
//! A [`MergeConfig`] is built once (defaults, then environment, then CLI
//! flags) and passed by value into the engine. Nothing here is global:
//! two jobs in one process can run with different settings.

use crate::record::{MergeError, Result};
use std::env;
use std::fmt;
use std::path::PathBuf;

/// Default number of raw records per chunk window.
pub const DEFAULT_CHUNK_SIZE: usize = 1000;

/// Number of consecutive equal output sizes that ends the convergence loop.
pub const DEFAULT_STABLE_ROUNDS: usize = 3;

/// Upper bound on convergence rounds before the job is declared stuck.
pub const DEFAULT_MAX_ROUNDS: usize = 64;

/// Partitions open at once during a k-way join.
pub const DEFAULT_MAX_FAN_IN: usize = 256;

/// Default input buffer size (256 KB).
pub const DEFAULT_INPUT_BUFFER: usize = 256 * 1024;

/// Default output buffer size (256 KB).
pub const DEFAULT_OUTPUT_BUFFER: usize = 256 * 1024;

/// Environment variables read by [`MergeConfig::from_env`].
pub const ENV_CHUNK_SIZE: &str = "IMERGE_CHUNK_SIZE";
pub const ENV_WORK_DIR: &str = "IMERGE_WORK_DIR";
pub const ENV_MAX_ROUNDS: &str = "IMERGE_MAX_ROUNDS";
pub const ENV_PARALLEL: &str = "IMERGE_PARALLEL";
pub const ENV_MAX_FAN_IN: &str = "IMERGE_MAX_FAN_IN";

/// When the convergence loop may stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConvergencePolicy {
    /// Stop once the last `stable_rounds` output sizes are equal and the
    /// latest chunk pass collapsed nothing.
    #[default]
    SizeStability,
    /// Stop after the first round (past round 0) whose chunk pass collapsed
    /// nothing at all.
    NoCollapse,
}

impl ConvergencePolicy {
    /// Parse policy from string.
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "size-stability" | "size_stability" | "size" => Some(Self::SizeStability),
            "no-collapse" | "no_collapse" | "strict" => Some(Self::NoCollapse),
            _ => None,
        }
    }
}

impl fmt::Display for ConvergencePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SizeStability => write!(f, "size-stability"),
            Self::NoCollapse => write!(f, "no-collapse"),
        }
    }
}

/// Merge job configuration.
#[derive(Debug, Clone)]
pub struct MergeConfig {
    /// Raw records per chunk window
    pub chunk_size: usize,
    /// Convergence rule
    pub policy: ConvergencePolicy,
    /// Equal trailing sizes required by `SizeStability`
    pub stable_rounds: usize,
    /// Hard limit on rounds
    pub max_rounds: usize,
    /// Partitions open at once during a join
    pub max_fan_in: usize,
    /// Merge chunk windows on the rayon pool
    pub parallel: bool,
    /// Windows held at once in parallel mode (default: pool size)
    pub parallel_batch: Option<usize>,
    /// Read buffer capacity
    pub input_buffer: usize,
    /// Write buffer capacity
    pub output_buffer: usize,
    /// Directory for partitions (default: system temp dir)
    pub work_dir: Option<PathBuf>,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            policy: ConvergencePolicy::SizeStability,
            stable_rounds: DEFAULT_STABLE_ROUNDS,
            max_rounds: DEFAULT_MAX_ROUNDS,
            max_fan_in: DEFAULT_MAX_FAN_IN,
            parallel: false,
            parallel_batch: None,
            input_buffer: DEFAULT_INPUT_BUFFER,
            output_buffer: DEFAULT_OUTPUT_BUFFER,
            work_dir: None,
        }
    }
}

impl MergeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults overlaid with `IMERGE_*` environment variables.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Some(value) = env_var(ENV_CHUNK_SIZE) {
            config.chunk_size = parse_env_usize(ENV_CHUNK_SIZE, &value)?;
        }
        if let Some(value) = env_var(ENV_MAX_ROUNDS) {
            config.max_rounds = parse_env_usize(ENV_MAX_ROUNDS, &value)?;
        }
        if let Some(value) = env_var(ENV_MAX_FAN_IN) {
            config.max_fan_in = parse_env_usize(ENV_MAX_FAN_IN, &value)?;
        }
        if let Some(value) = env_var(ENV_WORK_DIR) {
            config.work_dir = Some(PathBuf::from(value));
        }
        if let Some(value) = env_var(ENV_PARALLEL) {
            config.parallel = match value.to_lowercase().as_str() {
                "1" | "true" | "yes" => true,
                "0" | "false" | "no" => false,
                _ => {
                    return Err(MergeError::InvalidConfig(format!(
                        "{} must be a boolean, got '{}'",
                        ENV_PARALLEL, value
                    )))
                }
            };
        }

        config.validate()?;
        Ok(config)
    }

    /// Set the chunk window size.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    /// Set the convergence policy.
    pub fn with_policy(mut self, policy: ConvergencePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_stable_rounds(mut self, rounds: usize) -> Self {
        self.stable_rounds = rounds;
        self
    }

    pub fn with_max_rounds(mut self, rounds: usize) -> Self {
        self.max_rounds = rounds;
        self
    }

    /// Cap the partitions a join keeps open.
    pub fn with_max_fan_in(mut self, max_fan_in: usize) -> Self {
        self.max_fan_in = max_fan_in;
        self
    }

    /// Enable parallel window merging.
    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn with_parallel_batch(mut self, batch: usize) -> Self {
        self.parallel_batch = Some(batch);
        self
    }

    /// Set the partition directory.
    pub fn with_work_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.work_dir = Some(dir.into());
        self
    }

    /// Windows merged together in parallel mode.
    pub fn effective_batch(&self) -> usize {
        if !self.parallel {
            return 1;
        }
        self.parallel_batch
            .unwrap_or_else(rayon::current_num_threads)
            .max(1)
    }

    /// Reject settings the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(MergeError::InvalidConfig(
                "chunk size must be at least 1".to_string(),
            ));
        }
        if self.stable_rounds == 0 {
            return Err(MergeError::InvalidConfig(
                "stable rounds must be at least 1".to_string(),
            ));
        }
        if self.max_rounds == 0 {
            return Err(MergeError::InvalidConfig(
                "max rounds must be at least 1".to_string(),
            ));
        }
        if self.max_fan_in < 2 {
            return Err(MergeError::InvalidConfig(
                "max fan-in must be at least 2".to_string(),
            ));
        }
        if self.parallel_batch == Some(0) {
            return Err(MergeError::InvalidConfig(
                "parallel batch must be at least 1".to_string(),
            ));
        }
        if self.input_buffer == 0 || self.output_buffer == 0 {
            return Err(MergeError::InvalidConfig(
                "buffer sizes must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

fn env_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parse_env_usize(name: &str, value: &str) -> Result<usize> {
    value.trim().parse().map_err(|_| {
        MergeError::InvalidConfig(format!(
            "{} must be a non-negative integer, got '{}'",
            name, value
        ))
    })
}
