// Clippy allows
#![allow(clippy::too_many_arguments)]

//! imerge: overlapping interval merger
//!
//! Usage: imerge <COMMAND> [OPTIONS]

use clap::{Parser, Subcommand};
use std::io::{self, Write};
use std::path::PathBuf;
use std::process;

use imerge::commands::{
    merge_in_memory, ExternalMergeCommand, GenerateCommand, GenerateConfig, SizeSpec,
};
use imerge::config::{ConvergencePolicy, MergeConfig};
use imerge::output::write_intervals;
use imerge::record::{MergeError, RecordReader, RecordSource};

#[derive(Parser)]
#[command(name = "imerge")]
#[command(version)]
#[command(about = "Merge overlapping intervals, in memory or externally in bounded memory", long_about = None)]
struct Cli {
    /// Number of threads to use (default: number of CPUs)
    #[arg(long, short = 't', global = true)]
    threads: Option<usize>,

    /// Log filter, e.g. "info" or "imerge=debug" (default: RUST_LOG, else warn)
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Merge overlapping intervals
    Merge {
        /// Input record file (use - for stdin)
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Load every record and merge in one pass
        #[arg(long)]
        in_memory: bool,

        /// Records per chunk window (default: IMERGE_CHUNK_SIZE or 1000)
        #[arg(short, long)]
        chunk_size: Option<usize>,

        /// Directory for partitions (default: IMERGE_WORK_DIR or a temp dir)
        #[arg(short, long)]
        work_dir: Option<PathBuf>,

        /// Convergence policy: size-stability|no-collapse
        #[arg(long)]
        policy: Option<String>,

        /// Equal trailing round sizes that end a size-stability merge
        #[arg(long)]
        stable_rounds: Option<usize>,

        /// Round limit before giving up (default: IMERGE_MAX_ROUNDS or 64)
        #[arg(long)]
        max_rounds: Option<usize>,

        /// Partitions open at once while joining (default: IMERGE_MAX_FAN_IN or 256)
        #[arg(long)]
        max_fan_in: Option<usize>,

        /// Merge chunk windows in parallel
        #[arg(short, long)]
        parallel: bool,

        /// Print merge statistics to stderr
        #[arg(long)]
        stats: bool,
    },

    /// Generate a synthetic record file
    #[command(alias = "create")]
    Generate {
        /// Output file
        #[arg(short, long, default_value = "input.txt")]
        output: PathBuf,

        /// Number of overlap chains (e.g., "1K")
        #[arg(long, default_value = "1K")]
        chains: String,

        /// Intervals per chain (e.g., "1K")
        #[arg(long, default_value = "1K")]
        chain_len: String,

        /// Inject one malformed record per chain
        #[arg(long)]
        errors: bool,

        /// Append a disjoint interval after every chain
        #[arg(long)]
        non_overlaps: bool,

        /// Random seed for reproducibility
        #[arg(long, default_value = "42")]
        seed: u64,

        /// Print generation statistics to stderr
        #[arg(long)]
        stats: bool,
    },
}

fn main() {
    let cli = Cli::parse();

    if let Err(e) = imerge::logging::init(cli.log_level.as_deref()) {
        eprintln!("Error: {}", e);
        process::exit(1);
    }

    // Configure thread pool if --threads specified
    if let Some(n) = cli.threads {
        if let Err(e) = rayon::ThreadPoolBuilder::new()
            .num_threads(n)
            .build_global()
        {
            eprintln!("Error: failed to initialize thread pool: {}", e);
            process::exit(1);
        }
    }

    let result = match cli.command {
        Commands::Merge {
            input,
            in_memory,
            chunk_size,
            work_dir,
            policy,
            stable_rounds,
            max_rounds,
            max_fan_in,
            parallel,
            stats,
        } => run_merge(
            input,
            in_memory,
            chunk_size,
            work_dir,
            policy,
            stable_rounds,
            max_rounds,
            max_fan_in,
            parallel,
            stats,
        ),

        Commands::Generate {
            output,
            chains,
            chain_len,
            errors,
            non_overlaps,
            seed,
            stats,
        } => run_generate(output, chains, chain_len, errors, non_overlaps, seed, stats),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

/// `None` and `-` both mean stdin.
fn is_stdin(input: &Option<PathBuf>) -> bool {
    match input {
        Some(path) => path.to_string_lossy() == "-",
        None => true,
    }
}

fn run_merge(
    input: Option<PathBuf>,
    in_memory: bool,
    chunk_size: Option<usize>,
    work_dir: Option<PathBuf>,
    policy: Option<String>,
    stable_rounds: Option<usize>,
    max_rounds: Option<usize>,
    max_fan_in: Option<usize>,
    parallel: bool,
    stats: bool,
) -> Result<(), MergeError> {
    let mut config = MergeConfig::from_env()?;
    if let Some(n) = chunk_size {
        config = config.with_chunk_size(n);
    }
    if let Some(dir) = work_dir {
        config = config.with_work_dir(dir);
    }
    if let Some(ref name) = policy {
        let policy = ConvergencePolicy::from_str(name).ok_or_else(|| {
            MergeError::InvalidConfig(format!(
                "Invalid policy '{}'. Use: size-stability, no-collapse",
                name
            ))
        })?;
        config = config.with_policy(policy);
    }
    if let Some(n) = stable_rounds {
        config = config.with_stable_rounds(n);
    }
    if let Some(n) = max_rounds {
        config = config.with_max_rounds(n);
    }
    if let Some(n) = max_fan_in {
        config = config.with_max_fan_in(n);
    }
    if parallel {
        config = config.with_parallel(true);
    }
    config.validate()?;

    let stdout = io::stdout();
    let mut handle = stdout.lock();

    if in_memory {
        let records = match input {
            Some(ref path) if !is_stdin(&input) => read_all(RecordReader::with_capacity(
                std::fs::File::open(path)?,
                config.input_buffer,
            ))?,
            _ => {
                let stdin = io::stdin();
                read_all(RecordReader::with_capacity(stdin.lock(), config.input_buffer))?
            }
        };

        let outcome = merge_in_memory(&records);
        write_intervals(&mut handle, &outcome.intervals)?;

        if stats {
            eprintln!(
                "In-memory merge stats: Records: {} read, {} discarded, {} merged",
                records.len(),
                outcome.discarded,
                outcome.len()
            );
        }
        return Ok(());
    }

    let mut cmd = ExternalMergeCommand::with_disk_store(config)?;
    let result = match input {
        Some(ref path) if !is_stdin(&input) => cmd.run(path, &mut handle)?,
        _ => cmd.run_stdin(&mut handle)?,
    };
    handle.flush()?;

    if stats {
        eprintln!("External merge stats: {}", result);
    }

    Ok(())
}

fn read_all<S: RecordSource>(mut source: S) -> Result<Vec<imerge::RawRecord>, MergeError> {
    let mut records = Vec::new();
    while let Some(record) = source.next_record()? {
        records.push(record);
    }
    Ok(records)
}

fn run_generate(
    output: PathBuf,
    chains: String,
    chain_len: String,
    errors: bool,
    non_overlaps: bool,
    seed: u64,
    stats: bool,
) -> Result<(), MergeError> {
    let parse = |flag: &str, value: &str| {
        SizeSpec::from_str(value).map(|spec| spec.count).ok_or_else(|| {
            MergeError::InvalidConfig(format!(
                "Invalid --{} '{}'. Use formats like 1K, 5M, 100",
                flag, value
            ))
        })
    };

    let config = GenerateConfig {
        output,
        chains: parse("chains", &chains)?,
        chain_len: parse("chain-len", &chain_len)?,
        errors,
        non_overlaps,
        seed,
        ..Default::default()
    };

    let cmd = GenerateCommand::new(config);
    let result = cmd.run()?;

    if stats {
        eprintln!("Generate stats: {}", result);
    }

    Ok(())
}
