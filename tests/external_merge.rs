//! Integration tests for the external merge.
//!
//! Tests verify:
//! 1. Worked scenarios (overlap, malformed, disjoint, empty, all invalid)
//! 2. Chunked equivalence: any chunk size gives the in-memory result
//! 3. Output invariants: sorted, strictly separated, same coverage as input
//! 4. Disk-backed stores clean up after themselves
//! 5. A failing store or source aborts the job without leaving round outputs behind
//! 6. A fan-in limited join gives the same result as a single-pass join

use imerge::commands::{is_merged, merge_external, merge_in_memory, ExternalMergeCommand};
use imerge::config::{ConvergencePolicy, MergeConfig};
use imerge::interval::Interval;
use imerge::partition::{DiskStore, MemorySink, MemoryStore, PartitionId, PartitionStore};
use imerge::record::{IterSource, MergeError, RawRecord, RecordReader, RecordSource, Result};
use std::io::{Cursor, Write};

/// Small deterministic generator (64-bit LCG) for property-style checks.
struct Lcg(u64);

impl Lcg {
    fn next(&mut self) -> u64 {
        self.0 = self
            .0
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        self.0 >> 33
    }

    fn below(&mut self, n: u64) -> i64 {
        (self.next() % n) as i64
    }
}

fn records(pairs: &[(i64, i64)]) -> Vec<RawRecord> {
    pairs.iter().map(|&p| RawRecord::from(p)).collect()
}

fn external(records: Vec<RawRecord>, config: MergeConfig) -> Vec<Interval> {
    let mut cmd = ExternalMergeCommand::new(config, MemoryStore::new()).unwrap();
    let id = cmd.merge_external(&mut IterSource::new(records)).unwrap();
    cmd.read_partition(id).unwrap()
}

fn random_records(seed: u64, n: usize, with_garbage: bool) -> Vec<RawRecord> {
    let mut rng = Lcg(seed);
    (0..n)
        .map(|_| {
            if with_garbage && rng.below(10) == 0 {
                match rng.below(4) {
                    0 => RawRecord::from_fields(["x", "5"]),
                    1 => RawRecord::from_fields(["1", "2", "3"]),
                    2 => RawRecord::from_fields([""]),
                    _ => RawRecord::from((9, 3)),
                }
            } else {
                let start = rng.below(5_000) - 1_000;
                RawRecord::from((start, start + 1 + rng.below(40)))
            }
        })
        .collect()
}

/// Points covered by a set of intervals, on a coarse grid.
fn covered(intervals: &[Interval], lo: i64, hi: i64) -> Vec<bool> {
    (lo..hi)
        .map(|p| intervals.iter().any(|iv| iv.start <= p && p < iv.end))
        .collect()
}

// =============================================================================
// Scenarios
// =============================================================================

#[test]
fn test_scenario_overlapping_pair() {
    let input = records(&[(1, 5), (3, 7), (10, 12)]);
    let expected = vec![Interval::new(1, 7), Interval::new(10, 12)];

    assert_eq!(merge_in_memory(&input).intervals, expected);
    for chunk_size in [1, 2, 3, 1000] {
        assert_eq!(
            external(input.clone(), MergeConfig::new().with_chunk_size(chunk_size)),
            expected
        );
    }
}

#[test]
fn test_scenario_malformed_middle_record() {
    let input = vec![
        RawRecord::from((1, 5)),
        RawRecord::from_fields(["a", "7"]),
        RawRecord::from((10, 12)),
    ];
    let expected = vec![Interval::new(1, 5), Interval::new(10, 12)];

    assert_eq!(merge_in_memory(&input).intervals, expected);
    assert_eq!(external(input, MergeConfig::new().with_chunk_size(1)), expected);
}

#[test]
fn test_scenario_disjoint_across_chunk_boundary() {
    // Unit gaps: [2i, 2i+1) never touches [2i+2, 2i+3)
    let mut pairs: Vec<(i64, i64)> = (0..1000).map(|i| (2 * i, 2 * i + 1)).collect();
    pairs.reverse();

    let mut cmd = ExternalMergeCommand::new(
        MergeConfig::new().with_chunk_size(999),
        MemoryStore::new(),
    )
    .unwrap();
    let id = cmd.merge_external(&mut IterSource::new(records(&pairs))).unwrap();
    let out = cmd.read_partition(id).unwrap();

    assert_eq!(out.len(), 1000);
    assert!(is_merged(&out));
    // First round plus at most 2 extra
    assert!(cmd.stats().rounds <= 3);
    assert_eq!(cmd.stats().round_sizes, vec![1000, 1000, 1000]);
    assert_eq!(cmd.stats().initial_partitions, 2);
}

#[test]
fn test_scenario_empty_input() {
    assert!(merge_in_memory(&[]).is_empty());
    assert!(external(Vec::new(), MergeConfig::default()).is_empty());
}

#[test]
fn test_scenario_all_invalid() {
    let input = vec![RawRecord::from((5, 2)), RawRecord::from_fields(["x", "y"])];

    let outcome = merge_in_memory(&input);
    assert!(outcome.is_empty());
    assert_eq!(outcome.discarded, 2);
    assert!(external(input, MergeConfig::new().with_chunk_size(1)).is_empty());
}

// =============================================================================
// Properties
// =============================================================================

#[test]
fn test_chunked_equivalence_random() {
    for seed in 1..=4 {
        let input = random_records(seed, 600, true);
        let expected = merge_in_memory(&input).intervals;

        for chunk_size in [1, 2, 3, 7, 64, 599, 600, 601] {
            let got = external(input.clone(), MergeConfig::new().with_chunk_size(chunk_size));
            assert_eq!(got, expected, "seed {} chunk size {}", seed, chunk_size);
        }
    }
}

#[test]
fn test_chunked_equivalence_no_collapse_policy() {
    let input = random_records(99, 800, false);
    let expected = merge_in_memory(&input).intervals;

    for chunk_size in [1, 5, 100] {
        let config = MergeConfig::new()
            .with_chunk_size(chunk_size)
            .with_policy(ConvergencePolicy::NoCollapse);
        assert_eq!(external(input.clone(), config), expected);
    }
}

#[test]
fn test_parallel_equivalence() {
    let input = random_records(7, 30_000, true);
    let expected = merge_in_memory(&input).intervals;

    let config = MergeConfig::new()
        .with_chunk_size(2_000)
        .with_parallel(true)
        .with_parallel_batch(8);
    assert_eq!(external(input, config), expected);
}

#[test]
fn test_fan_in_limited_join_equivalence() {
    let input = random_records(21, 700, true);
    let expected = merge_in_memory(&input).intervals;

    for max_fan_in in [2, 3, 16] {
        let config = MergeConfig::new()
            .with_chunk_size(10)
            .with_max_fan_in(max_fan_in);
        let store = MemoryStore::new();
        let mut cmd = ExternalMergeCommand::new(config, &store).unwrap();
        let id = cmd.merge_external(&mut IterSource::new(input.clone())).unwrap();

        assert_eq!(cmd.read_partition(id).unwrap(), expected, "fan-in {}", max_fan_in);
        assert!(cmd.stats().initial_partitions > max_fan_in);
        // Intermediate runs never outlive their join
        assert_eq!(store.len(), 1);
    }
}

#[test]
fn test_order_and_coverage_invariants() {
    let input = random_records(42, 400, false);
    let valid: Vec<Interval> = imerge::validate::enforce_correctness(&input);
    let out = external(input, MergeConfig::new().with_chunk_size(16));

    for pair in out.windows(2) {
        assert!(pair[0].end < pair[1].start, "{} then {}", pair[0], pair[1]);
    }
    assert_eq!(covered(&out, -1_100, 4_100), covered(&valid, -1_100, 4_100));
}

#[test]
fn test_in_memory_idempotent() {
    let first = merge_in_memory(&random_records(5, 300, true));
    let again: Vec<RawRecord> = first
        .intervals
        .iter()
        .map(|iv| RawRecord::from((iv.start, iv.end)))
        .collect();
    let second = merge_in_memory(&again);

    assert_eq!(second.intervals, first.intervals);
    assert!(!second.had_overlap);
}

// =============================================================================
// Stores
// =============================================================================

#[test]
fn test_disk_store_keeps_only_final_output() {
    let dir = tempfile::tempdir().unwrap();
    let store = DiskStore::at(dir.path()).unwrap();
    let input = random_records(11, 500, true);
    let expected = merge_in_memory(&input).intervals;

    let config = MergeConfig::new().with_chunk_size(50);
    let id = merge_external(&mut IterSource::new(input), &store, config).unwrap();

    assert!(matches!(id, PartitionId::Output { .. }));
    assert!(store.path_of(id).exists());
    let entries: Vec<_> = std::fs::read_dir(dir.path())
        .unwrap()
        .map(|e| e.unwrap().path())
        .collect();
    assert_eq!(entries, vec![store.path_of(id)]);

    let content = std::fs::read_to_string(store.path_of(id)).unwrap();
    let got: Vec<Interval> = content
        .lines()
        .filter_map(|l| imerge::validate::parse_line(l.as_bytes()))
        .collect();
    assert_eq!(got, expected);
}

#[test]
fn test_work_dir_reuse_clears_stale_outputs() {
    let dir = tempfile::tempdir().unwrap();

    // A longer earlier job leaves outputs of rounds this job never reaches
    let stale = DiskStore::at(dir.path()).unwrap();
    for round in [5, 6] {
        let mut w = stale.create(PartitionId::Output { round }).unwrap();
        w.write_all(b"100,200\n").unwrap();
    }
    stale.create(PartitionId::Chunk { round: 6, index: 0 }).unwrap();
    std::fs::write(dir.path().join("notes.txt"), "not a partition").unwrap();

    let config = MergeConfig::new().with_chunk_size(2).with_work_dir(dir.path());
    let mut cmd = ExternalMergeCommand::with_disk_store(config).unwrap();
    let mut output = Vec::new();
    cmd.run_source(&mut IterSource::new(records(&[(3, 4), (1, 2)])), &mut output)
        .unwrap();
    assert_eq!(output, b"1,2\n3,4\n");

    let mut names: Vec<String> = std::fs::read_dir(dir.path())
        .unwrap()
        .map(|e| e.unwrap().file_name().into_string().unwrap())
        .collect();
    names.sort();
    assert_eq!(names, vec!["notes.txt", "output_2.txt"]);
}

#[test]
fn test_run_from_file_to_writer() {
    let mut input = tempfile::NamedTempFile::new().unwrap();
    writeln!(input, "10,12\n1,5\n\na,7\n3,7\n12,13").unwrap();
    input.flush().unwrap();

    let config = MergeConfig::new().with_chunk_size(2);
    let mut cmd = ExternalMergeCommand::with_disk_store(config).unwrap();
    let mut output = Vec::new();
    let stats = cmd.run(input.path(), &mut output).unwrap();

    assert_eq!(String::from_utf8(output).unwrap(), "1,7\n10,13\n");
    assert_eq!(stats.records_read, 6);
    assert_eq!(stats.records_discarded, 2);
    assert_eq!(stats.intervals_written, 2);
}

#[test]
fn test_reader_source_streams_file() {
    let data = "5,6\n1,2\n2,3\n";
    let mut reader = RecordReader::new(data.as_bytes());
    let store = MemoryStore::new();

    let id = merge_external(&mut reader, &store, MergeConfig::new().with_chunk_size(1)).unwrap();
    assert_eq!(store.contents(id).unwrap(), b"1,3\n5,6\n");
}

// =============================================================================
// Failure handling
// =============================================================================

/// Memory store that refuses to create one partition.
struct FailingStore {
    inner: MemoryStore,
    fail_on: PartitionId,
}

impl PartitionStore for FailingStore {
    type Writer = MemorySink;
    type Reader = Cursor<Vec<u8>>;

    fn create(&self, id: PartitionId) -> Result<MemorySink> {
        if id == self.fail_on {
            return Err(MergeError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "disk full",
            )));
        }
        self.inner.create(id)
    }

    fn open(&self, id: PartitionId) -> Result<Cursor<Vec<u8>>> {
        self.inner.open(id)
    }

    fn list(&self, round: usize) -> Result<Vec<PartitionId>> {
        self.inner.list(round)
    }

    fn remove(&self, id: PartitionId) -> Result<()> {
        self.inner.remove(id)
    }

    fn remove_chunks(&self, round: usize) -> Result<()> {
        self.inner.remove_chunks(round)
    }

    fn clear(&self) -> Result<()> {
        self.inner.clear()
    }
}

/// Source that fails after yielding `good` records.
struct FailingSource {
    good: usize,
    served: usize,
}

impl RecordSource for FailingSource {
    fn next_record(&mut self) -> Result<Option<RawRecord>> {
        if self.served == self.good {
            return Err(MergeError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "input truncated",
            )));
        }
        self.served += 1;
        let start = (self.good - self.served) as i64 * 3;
        Ok(Some(RawRecord::from((start, start + 2))))
    }
}

#[test]
fn test_failure_in_later_round_aborts_cleanly() {
    let inner = MemoryStore::new();
    let store = FailingStore {
        inner: inner.clone(),
        fail_on: PartitionId::Output { round: 1 },
    };

    let result = merge_external(
        &mut IterSource::new(records(&[(1, 3), (2, 4), (8, 9)])),
        store,
        MergeConfig::new().with_chunk_size(1),
    );

    assert!(matches!(result, Err(MergeError::Io(_))));
    assert!(inner.is_empty());
}

#[test]
fn test_failure_in_chunk_pass_aborts_cleanly() {
    let inner = MemoryStore::new();
    let store = FailingStore {
        inner: inner.clone(),
        fail_on: PartitionId::Chunk { round: 0, index: 1 },
    };

    let result = merge_external(
        &mut IterSource::new(records(&[(1, 3), (5, 6), (8, 9)])),
        store,
        MergeConfig::new().with_chunk_size(1),
    );

    assert!(result.is_err());
    assert!(inner.is_empty());
}

#[test]
fn test_source_failure_aborts_cleanly() {
    let store = MemoryStore::new();
    let mut source = FailingSource { good: 5, served: 0 };

    let result = merge_external(&mut source, &store, MergeConfig::new().with_chunk_size(2));

    assert!(matches!(result, Err(MergeError::Io(_))));
    assert_eq!(source.served, 5);
    assert!(store.is_empty());
}
