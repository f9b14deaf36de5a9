// Clippy allows for the whole crate
#![allow(clippy::too_many_arguments)]
#![allow(clippy::should_implement_trait)]
#![allow(clippy::type_complexity)]

//! imerge: overlapping interval merger
//!
//! This library merges numeric half-open intervals, either in memory or
//! externally through bounded-size partitions when the input does not fit.
//!
//! # Features
//!
//! - **Lenient input**: malformed records are dropped, never fatal
//! - **External merge**: chunk, sort, k-way join, repeat until converged
//! - **Parallel processing**: Uses Rayon to merge chunk windows concurrently
//!
//! # Example
//!
//! ```rust,no_run
//! use imerge::{commands::merge_in_memory, record::read_records};
//!
//! let records = read_records("input.txt").unwrap();
//! let outcome = merge_in_memory(&records);
//! for interval in &outcome.intervals {
//!     println!("{}", interval);
//! }
//! ```

pub mod commands;
pub mod config;
pub mod interval;
pub mod logging;
pub mod output;
pub mod parallel;
pub mod partition;
pub mod record;
pub mod validate;

// Re-export commonly used types
pub use config::{ConvergencePolicy, MergeConfig};
pub use interval::Interval;
pub use partition::{DiskStore, MemoryStore, PartitionId, PartitionStore};
pub use record::{read_records, MergeError, RawRecord, RecordReader, RecordSource, Result};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::commands::{
        is_merged, merge_external, merge_in_memory, ExternalMergeCommand, MergeCommand,
    };
    pub use crate::config::{ConvergencePolicy, MergeConfig};
    pub use crate::interval::Interval;
    pub use crate::partition::{DiskStore, MemoryStore, PartitionId, PartitionStore};
    pub use crate::record::{read_records, RawRecord, RecordReader, RecordSource};
}

#[cfg(test)]
mod tests {
    #[test]
    fn test_basic_workflow() {
        use crate::commands::merge_in_memory;
        use crate::record::parse_records;

        let content = "1,5\n3,7\nbad\n10,12\n";
        let outcome = merge_in_memory(&parse_records(content));

        assert_eq!(outcome.len(), 2);
        assert_eq!(outcome.intervals[0].start, 1);
        assert_eq!(outcome.intervals[0].end, 7);
        assert_eq!(outcome.discarded, 1);
    }

    #[test]
    fn test_external_workflow() {
        use crate::prelude::*;
        use crate::record::{parse_records, IterSource};

        let records = parse_records("8,9\n1,3\n2,4\n4,6\n");
        let store = MemoryStore::new();
        let config = MergeConfig::new().with_chunk_size(1);

        let id = merge_external(&mut IterSource::new(records), &store, config).unwrap();

        assert_eq!(store.contents(id).unwrap(), b"1,6\n8,9\n");
    }
}
