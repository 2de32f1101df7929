//! Tracked entry model
//!
//! A [`TrackedEntry`] is the in-memory record of one discovered file and its
//! position in the directory state machine. Entries are created by the
//! scanner and mutated only by movers; batches never share an entry between
//! in-flight move tasks (upstream batch construction guarantees exclusive
//! ownership, and the pool takes entries by value).

use crate::config::Layout;
use std::cmp::Ordering;
use std::hash::{Hash, Hasher};
use std::path::PathBuf;

/// A named stage in an entry's lifecycle. The set and its on-disk directory
/// names are fixed; the root they hang off comes from [`Layout`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackedDir {
    /// Freshly discovered input ("path")
    Origin,
    /// Being assembled into a flag file ("flagging")
    Staging,
    /// Flagged and awaiting consumption ("flagged")
    Completed,
    /// Consumed by the downstream scheduler ("loaded")
    Loaded,
}

impl TrackedDir {
    /// On-disk directory name for this role.
    pub fn dir_name(&self) -> &'static str {
        match self {
            Self::Origin => "path",
            Self::Staging => "flagging",
            Self::Completed => "flagged",
            Self::Loaded => "loaded",
        }
    }
}

/// One discovered file under management.
#[derive(Debug, Clone)]
pub struct TrackedEntry {
    folder: String,
    file_name: String,
    size: u64,
    block_size: u64,
    /// Discovery timestamp, epoch milliseconds
    discovered_at: i64,
    current: TrackedDir,
    moved: bool,
}

impl TrackedEntry {
    pub fn new(
        folder: impl Into<String>,
        file_name: impl Into<String>,
        size: u64,
        block_size: u64,
        discovered_at: i64,
    ) -> Self {
        Self {
            folder: folder.into(),
            file_name: file_name.into(),
            size,
            block_size,
            discovered_at,
            current: TrackedDir::Origin,
            moved: false,
        }
    }

    pub fn folder(&self) -> &str {
        &self.folder
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn block_size(&self) -> u64 {
        self.block_size
    }

    pub fn discovered_at(&self) -> i64 {
        self.discovered_at
    }

    pub fn current(&self) -> TrackedDir {
        self.current
    }

    /// True iff the last attempted relocation actually renamed the file.
    pub fn is_moved(&self) -> bool {
        self.moved
    }

    /// Path relative to any role root.
    pub fn rel_path(&self) -> String {
        format!("{}/{}", self.folder, self.file_name)
    }

    /// Full path of this entry under the given role.
    pub fn path_in(&self, layout: &Layout, role: TrackedDir) -> PathBuf {
        layout.path_for(role, &self.folder, &self.file_name)
    }

    /// Full path of this entry at its current role.
    pub fn current_path(&self, layout: &Layout) -> PathBuf {
        self.path_in(layout, self.current)
    }

    /// Estimated number of parallel work units for the ingest job.
    pub fn map_slots(&self) -> u64 {
        self.size.div_ceil(self.block_size.max(1))
    }

    /// File name with the disambiguation suffix applied.
    pub fn suffixed_file_name(&self) -> String {
        format!("{}.{}", self.file_name, self.discovered_at)
    }

    /// Rename every tracked-directory target at once by appending the
    /// discovery timestamp. Used to resolve true name collisions.
    pub fn disambiguate(&mut self) {
        self.file_name = self.suffixed_file_name();
    }

    /// Record a successful rename into `role`.
    pub fn mark_moved(&mut self, role: TrackedDir) {
        self.current = role;
        self.moved = true;
    }

    /// Record a failed or skipped rename.
    pub fn mark_unmoved(&mut self) {
        self.moved = false;
    }
}

// Identity is (timestamp, block size, file size, path); the moved flag and
// current role are mutable bookkeeping and excluded so rollback can match
// entries across phases.
impl PartialEq for TrackedEntry {
    fn eq(&self, other: &Self) -> bool {
        self.discovered_at == other.discovered_at
            && self.block_size == other.block_size
            && self.size == other.size
            && self.folder == other.folder
            && self.file_name == other.file_name
    }
}

impl Eq for TrackedEntry {}

impl Hash for TrackedEntry {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.discovered_at.hash(state);
        self.block_size.hash(state);
        self.size.hash(state);
        self.folder.hash(state);
        self.file_name.hash(state);
    }
}

// FIFO ordering: (timestamp, file size, block size, path) ascending.
impl Ord for TrackedEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.discovered_at
            .cmp(&other.discovered_at)
            .then_with(|| self.size.cmp(&other.size))
            .then_with(|| self.block_size.cmp(&other.block_size))
            .then_with(|| self.folder.cmp(&other.folder))
            .then_with(|| self.file_name.cmp(&other.file_name))
    }
}

impl PartialOrd for TrackedEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// LIFO comparator: the exact reverse of the FIFO ordering.
pub fn lifo_cmp(a: &TrackedEntry, b: &TrackedEntry) -> Ordering {
    b.cmp(a)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn entry(ts: i64, size: u64, block: u64, name: &str) -> TrackedEntry {
        TrackedEntry::new("a", name, size, block, ts)
    }

    #[test]
    fn test_fifo_orders_by_timestamp_first() {
        let older = entry(100, 10, 5, "file1");
        let newer = entry(200, 20, 5, "file2");
        assert!(older < newer);
    }

    #[test]
    fn test_lifo_is_exact_reverse_of_fifo() {
        let pairs = [
            (entry(100, 10, 5, "file1"), entry(200, 20, 5, "file2")),
            (entry(100, 10, 5, "file1"), entry(100, 20, 5, "file1")),
            (entry(100, 10, 5, "file1"), entry(100, 10, 9, "file1")),
            (entry(100, 10, 5, "file1"), entry(100, 10, 5, "file2")),
        ];
        for (a, b) in &pairs {
            assert_eq!(lifo_cmp(a, b), a.cmp(b).reverse());
            assert_eq!(lifo_cmp(b, a), b.cmp(a).reverse());
        }
    }

    #[test]
    fn test_identity_ignores_mutable_state() {
        let a = entry(100, 10, 5, "file1");
        let mut b = a.clone();
        b.mark_moved(TrackedDir::Staging);
        assert_eq!(a, b);
    }

    #[test]
    fn test_identity_differs_on_any_field() {
        let base = entry(100, 10, 5, "file1");
        assert_ne!(base, entry(101, 10, 5, "file1"));
        assert_ne!(base, entry(100, 11, 5, "file1"));
        assert_ne!(base, entry(100, 10, 6, "file1"));
        assert_ne!(base, entry(100, 10, 5, "file2"));
    }

    #[test]
    fn test_map_slots_rounds_up() {
        assert_eq!(entry(1, 10, 5, "f").map_slots(), 2);
        assert_eq!(entry(1, 11, 5, "f").map_slots(), 3);
        assert_eq!(entry(1, 0, 5, "f").map_slots(), 0);
        // Degenerate block size must not divide by zero
        assert_eq!(entry(1, 7, 0, "f").map_slots(), 7);
    }

    #[test]
    fn test_disambiguate_moves_all_targets() {
        let layout = Layout::new(PathBuf::from("/d"));
        let mut e = entry(42, 10, 5, "file1");
        e.disambiguate();
        assert_eq!(e.file_name(), "file1.42");
        assert_eq!(
            e.path_in(&layout, TrackedDir::Completed),
            PathBuf::from("/d/flagged/a/file1.42")
        );
    }
}
