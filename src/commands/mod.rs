//! Command implementations for imerge.

pub mod chunk;
pub mod external_merge;
pub mod generate;
pub mod kway;
pub mod merge;

pub use chunk::{ChunkPass, ChunkProcessor};
pub use external_merge::{merge_external, ExternalMergeCommand, ExternalMergeStats, RoundState};
pub use generate::{GenerateCommand, GenerateConfig, GenerateStats, SizeSpec, SyntheticRecord};
pub use kway::{JoinOutput, KWayJoiner};
pub use merge::{is_merged, merge_in_memory, MergeCommand, MergeOutcome};
