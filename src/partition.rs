//! Partition storage.
//!
//! A partition is one named, ordered batch of encoded interval records.
//! Each convergence round writes its chunk partitions plus one round output;
//! nothing is ever rewritten in place, a later round simply supersedes the
//! earlier one.

use crate::record::{MergeError, Result};
use rustc_hash::FxHashMap;
use std::fmt;
use std::fs::{self, File};
use std::io::{self, Cursor, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tracing::debug;

/// Identity of a stored partition. Stable within a round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PartitionId {
    /// The `index`-th chunk written during `round`, in source order.
    Chunk { round: usize, index: usize },
    /// The joined output of `round`.
    Output { round: usize },
    /// An intermediate run of a fan-in limited join of `round`.
    Run {
        round: usize,
        pass: usize,
        index: usize,
    },
}

impl PartitionId {
    /// Round that owns this partition.
    #[inline]
    pub fn round(&self) -> usize {
        match *self {
            PartitionId::Chunk { round, .. }
            | PartitionId::Output { round }
            | PartitionId::Run { round, .. } => round,
        }
    }
}

impl fmt::Display for PartitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PartitionId::Chunk { round, index } => write!(f, "round-{}/part-{}", round, index),
            PartitionId::Output { round } => write!(f, "round-{}/output", round),
            PartitionId::Run { round, pass, index } => {
                write!(f, "round-{}/run-{}-{}", round, pass, index)
            }
        }
    }
}

/// Backing store for partitions.
///
/// Implementations may be a filesystem, an object store or an in-memory map;
/// the merge engine only relies on ids being stable within a round.
pub trait PartitionStore {
    type Writer: Write;
    type Reader: io::Read;

    /// Create (or truncate) a partition and return a sink for its records.
    fn create(&self, id: PartitionId) -> Result<Self::Writer>;

    /// Open a written partition for reading.
    fn open(&self, id: PartitionId) -> Result<Self::Reader>;

    /// Chunk partitions of `round`, ordered by index.
    fn list(&self, round: usize) -> Result<Vec<PartitionId>>;

    /// Remove one partition. Removing a missing partition is not an error.
    fn remove(&self, id: PartitionId) -> Result<()>;

    /// Remove the chunks and join runs of `round`, keeping its output.
    fn remove_chunks(&self, round: usize) -> Result<()> {
        for id in self.list(round)? {
            self.remove(id)?;
        }
        Ok(())
    }

    /// Remove every partition owned by `round`, including its output.
    fn remove_round(&self, round: usize) -> Result<()> {
        self.remove_chunks(round)?;
        self.remove(PartitionId::Output { round })
    }

    /// Remove every partition of every round.
    fn clear(&self) -> Result<()>;
}

impl<S: PartitionStore + ?Sized> PartitionStore for &S {
    type Writer = S::Writer;
    type Reader = S::Reader;

    fn create(&self, id: PartitionId) -> Result<Self::Writer> {
        (**self).create(id)
    }

    fn open(&self, id: PartitionId) -> Result<Self::Reader> {
        (**self).open(id)
    }

    fn list(&self, round: usize) -> Result<Vec<PartitionId>> {
        (**self).list(round)
    }

    fn remove(&self, id: PartitionId) -> Result<()> {
        (**self).remove(id)
    }

    fn remove_chunks(&self, round: usize) -> Result<()> {
        (**self).remove_chunks(round)
    }

    fn remove_round(&self, round: usize) -> Result<()> {
        (**self).remove_round(round)
    }

    fn clear(&self) -> Result<()> {
        (**self).clear()
    }
}

/// Filesystem partition store.
///
/// Layout: `<root>/round_<r>/part_<i>.txt` for chunks,
/// `<root>/round_<r>/run_<p>_<i>.txt` for join runs and
/// `<root>/output_<r>.txt` for round outputs.
pub struct DiskStore {
    root: PathBuf,
    // Deleted with the store when the root is temporary.
    _temp: Option<TempDir>,
}

impl DiskStore {
    /// Store in a fresh temporary directory, removed on drop.
    pub fn temporary() -> Result<Self> {
        let temp = tempfile::Builder::new().prefix("imerge-").tempdir()?;
        Ok(Self::from_temp(temp))
    }

    /// Store in a caller-owned directory. Files are left in place on drop.
    pub fn at<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        Ok(Self { root, _temp: None })
    }

    fn remove_path(&self, path: &Path) -> Result<()> {
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn from_temp(temp: TempDir) -> Self {
        Self {
            root: temp.path().to_path_buf(),
            _temp: Some(temp),
        }
    }

    /// Root directory of the store.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn round_dir(&self, round: usize) -> PathBuf {
        self.root.join(format!("round_{}", round))
    }

    /// Path where a partition lives.
    pub fn path_of(&self, id: PartitionId) -> PathBuf {
        match id {
            PartitionId::Chunk { round, index } => {
                self.round_dir(round).join(format!("part_{}.txt", index))
            }
            PartitionId::Output { round } => self.root.join(format!("output_{}.txt", round)),
            PartitionId::Run { round, pass, index } => self
                .round_dir(round)
                .join(format!("run_{}_{}.txt", pass, index)),
        }
    }
}

/// `fs::remove_dir_all` that treats a missing directory as removed.
fn remove_dir_if_exists(dir: &Path) -> Result<()> {
    match fs::remove_dir_all(dir) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

impl PartitionStore for DiskStore {
    type Writer = File;
    type Reader = File;

    fn create(&self, id: PartitionId) -> Result<File> {
        if let PartitionId::Chunk { round, .. } | PartitionId::Run { round, .. } = id {
            fs::create_dir_all(self.round_dir(round))?;
        }
        Ok(File::create(self.path_of(id))?)
    }

    fn open(&self, id: PartitionId) -> Result<File> {
        File::open(self.path_of(id)).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => MergeError::MissingPartition(id),
            _ => MergeError::Io(e),
        })
    }

    fn list(&self, round: usize) -> Result<Vec<PartitionId>> {
        let entries = match fs::read_dir(self.round_dir(round)) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut indices = Vec::new();
        for entry in entries {
            let name = entry?.file_name();
            let index = name
                .to_str()
                .and_then(|n| n.strip_prefix("part_"))
                .and_then(|n| n.strip_suffix(".txt"))
                .and_then(|n| n.parse::<usize>().ok());
            if let Some(index) = index {
                indices.push(index);
            }
        }
        indices.sort_unstable();

        Ok(indices
            .into_iter()
            .map(|index| PartitionId::Chunk { round, index })
            .collect())
    }

    fn remove(&self, id: PartitionId) -> Result<()> {
        self.remove_path(&self.path_of(id))
    }

    fn remove_chunks(&self, round: usize) -> Result<()> {
        remove_dir_if_exists(&self.round_dir(round))
    }

    fn remove_round(&self, round: usize) -> Result<()> {
        self.remove_chunks(round)?;
        debug!(round, root = %self.root.display(), "removed round from disk store");
        self.remove(PartitionId::Output { round })
    }

    /// Removes only entries named like partitions; other files in a
    /// caller-owned root are left alone.
    fn clear(&self) -> Result<()> {
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            let path = entry.path();

            if let Some(round) = name.strip_prefix("round_") {
                if round.parse::<usize>().is_ok() && path.is_dir() {
                    remove_dir_if_exists(&path)?;
                }
            } else if let Some(round) = name
                .strip_prefix("output_")
                .and_then(|n| n.strip_suffix(".txt"))
            {
                if round.parse::<usize>().is_ok() {
                    self.remove_path(&path)?;
                }
            }
        }
        Ok(())
    }
}

type SharedPartitions = Arc<Mutex<FxHashMap<PartitionId, Vec<u8>>>>;

fn poisoned() -> io::Error {
    io::Error::new(io::ErrorKind::Other, "partition map lock poisoned")
}

/// In-process partition store. Cloning shares the same partitions.
#[derive(Clone, Default)]
pub struct MemoryStore {
    partitions: SharedPartitions,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of partitions currently held.
    pub fn len(&self) -> usize {
        self.partitions.lock().map(|p| p.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of a partition's encoded bytes.
    pub fn contents(&self, id: PartitionId) -> Result<Vec<u8>> {
        let partitions = self.partitions.lock().map_err(|_| poisoned())?;
        partitions
            .get(&id)
            .cloned()
            .ok_or(MergeError::MissingPartition(id))
    }
}

/// Sink appending to one in-memory partition.
pub struct MemorySink {
    id: PartitionId,
    partitions: SharedPartitions,
}

impl Write for MemorySink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut partitions = self.partitions.lock().map_err(|_| poisoned())?;
        partitions.entry(self.id).or_default().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl PartitionStore for MemoryStore {
    type Writer = MemorySink;
    type Reader = Cursor<Vec<u8>>;

    fn create(&self, id: PartitionId) -> Result<MemorySink> {
        let mut partitions = self.partitions.lock().map_err(|_| poisoned())?;
        partitions.insert(id, Vec::new());
        Ok(MemorySink {
            id,
            partitions: Arc::clone(&self.partitions),
        })
    }

    fn open(&self, id: PartitionId) -> Result<Cursor<Vec<u8>>> {
        self.contents(id).map(Cursor::new)
    }

    fn list(&self, round: usize) -> Result<Vec<PartitionId>> {
        let partitions = self.partitions.lock().map_err(|_| poisoned())?;
        let mut ids: Vec<PartitionId> = partitions
            .keys()
            .copied()
            .filter(|id| matches!(id, PartitionId::Chunk { round: r, .. } if *r == round))
            .collect();
        ids.sort_unstable();
        Ok(ids)
    }

    fn remove(&self, id: PartitionId) -> Result<()> {
        let mut partitions = self.partitions.lock().map_err(|_| poisoned())?;
        partitions.remove(&id);
        Ok(())
    }

    fn remove_chunks(&self, round: usize) -> Result<()> {
        let mut partitions = self.partitions.lock().map_err(|_| poisoned())?;
        partitions.retain(|id, _| {
            id.round() != round || matches!(id, PartitionId::Output { .. })
        });
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        let mut partitions = self.partitions.lock().map_err(|_| poisoned())?;
        partitions.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    fn exercise_store<S: PartitionStore>(store: &S) {
        for index in [2, 0, 10, 1] {
            let mut w = store.create(PartitionId::Chunk { round: 0, index }).unwrap();
            writeln!(w, "{},{}", index, index + 1).unwrap();
            w.flush().unwrap();
        }
        store.create(PartitionId::Output { round: 0 }).unwrap();
        store
            .create(PartitionId::Run { round: 0, pass: 0, index: 0 })
            .unwrap();
        store.create(PartitionId::Chunk { round: 1, index: 0 }).unwrap();

        let ids = store.list(0).unwrap();
        let indices: Vec<usize> = ids
            .iter()
            .map(|id| match id {
                PartitionId::Chunk { index, .. } => *index,
                other => unreachable!("{}", other),
            })
            .collect();
        assert_eq!(indices, vec![0, 1, 2, 10]);

        let mut content = String::new();
        store
            .open(PartitionId::Chunk { round: 0, index: 10 })
            .unwrap()
            .read_to_string(&mut content)
            .unwrap();
        assert_eq!(content, "10,11\n");

        store.remove_chunks(0).unwrap();
        assert!(store.list(0).unwrap().is_empty());
        assert!(store.open(PartitionId::Run { round: 0, pass: 0, index: 0 }).is_err());
        assert!(store.open(PartitionId::Output { round: 0 }).is_ok());

        store.remove_round(0).unwrap();
        assert!(matches!(
            store.open(PartitionId::Output { round: 0 }),
            Err(MergeError::MissingPartition(_))
        ));
        assert_eq!(store.list(1).unwrap().len(), 1);

        // Removing twice is fine
        store.remove_round(0).unwrap();
        store.remove(PartitionId::Chunk { round: 7, index: 7 }).unwrap();
    }

    #[test]
    fn test_memory_store() {
        let store = MemoryStore::new();
        exercise_store(&store);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_disk_store() {
        let store = DiskStore::temporary().unwrap();
        exercise_store(&store);
        assert!(store.root().exists());
    }

    #[test]
    fn test_temporary_disk_store_cleans_up() {
        let root = {
            let store = DiskStore::temporary().unwrap();
            store.create(PartitionId::Output { round: 3 }).unwrap();
            store.root().to_path_buf()
        };
        assert!(!root.exists());
    }

    #[test]
    fn test_disk_store_at_keeps_files() {
        let parent = tempfile::tempdir().unwrap();
        let dir = parent.path().join("work");
        {
            let store = DiskStore::at(&dir).unwrap();
            store.create(PartitionId::Output { round: 0 }).unwrap();
        }
        assert!(dir.join("output_0.txt").exists());
    }

    #[test]
    fn test_disk_store_clear_keeps_foreign_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("notes.txt"), "keep").unwrap();
        fs::create_dir(dir.path().join("round_x")).unwrap();
        {
            let store = DiskStore::at(dir.path()).unwrap();
            store.create(PartitionId::Output { round: 9 }).unwrap();
            store.create(PartitionId::Chunk { round: 9, index: 0 }).unwrap();
            store.clear().unwrap();
        }

        let mut names: Vec<String> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        names.sort();
        assert_eq!(names, vec!["notes.txt", "round_x"]);
    }

    #[test]
    fn test_memory_store_clear() {
        let store = MemoryStore::new();
        store.create(PartitionId::Output { round: 1 }).unwrap();
        store.clear().unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn test_partition_id_display() {
        assert_eq!(
            PartitionId::Chunk { round: 2, index: 5 }.to_string(),
            "round-2/part-5"
        );
        assert_eq!(PartitionId::Output { round: 4 }.to_string(), "round-4/output");
        assert_eq!(PartitionId::Output { round: 4 }.round(), 4);
        let run = PartitionId::Run { round: 1, pass: 2, index: 3 };
        assert_eq!(run.to_string(), "round-1/run-2-3");
        assert_eq!(run.round(), 1);
    }
}
