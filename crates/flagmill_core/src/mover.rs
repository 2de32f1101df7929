//! Movers: atomic relocation of one entry between tracked directories
//!
//! A mover owns one unit of work: rename one entry's file into a target
//! tracked directory, creating parents as needed. "Destination busy" is a
//! reported failure state on the returned entry, not an error; real I/O
//! failures propagate. The staging variant additionally resolves name
//! collisions by content digest before delegating.

use crate::config::Layout;
use crate::dir_cache::DirCache;
use crate::entry::{TrackedDir, TrackedEntry};
use crate::error::Result;
use crate::metrics::METRICS;
use sha2::{Digest, Sha256};
use std::fs;
use std::io;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Only the first 10 MB of a file participate in conflict digests; enough to
/// distinguish real payloads without re-reading huge inputs.
const DIGEST_CAP_BYTES: u64 = 10 * 1024 * 1024;

/// How one relocation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveStatus {
    /// Renamed into the target (or already there; idempotent retry).
    Moved,
    /// Destination busy or rename lost a race; entry unchanged.
    Unmoved,
    /// Source was a byte-identical duplicate and has been deleted.
    Discarded,
}

/// The entry handed back by a mover, with its updated bookkeeping.
#[derive(Debug, Clone)]
pub struct MoveOutcome {
    pub entry: TrackedEntry,
    pub status: MoveStatus,
}

/// Relocation strategy. Implementations must be safe to run from pool
/// workers; each call owns its entry exclusively.
pub trait Mover: Send + Sync {
    fn target(&self) -> TrackedDir;
    fn relocate(&self, entry: TrackedEntry) -> Result<MoveOutcome>;
}

/// Straight rename into the target role.
pub struct PlainMover {
    layout: Layout,
    target: TrackedDir,
    cache: Arc<DirCache>,
}

impl PlainMover {
    pub fn new(layout: Layout, target: TrackedDir, cache: Arc<DirCache>) -> Self {
        Self {
            layout,
            target,
            cache,
        }
    }

    /// Make sure the destination's parent exists, consulting the shared
    /// cache first. A creation race lost to another worker is not a failure.
    fn ensure_parent(&self, dst: &Path) -> Result<()> {
        let Some(parent) = dst.parent() else {
            return Ok(());
        };
        if self.cache.contains(parent) {
            return Ok(());
        }
        if !parent.exists() {
            match fs::create_dir_all(parent) {
                Ok(()) => {}
                Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                    debug!(dir = %parent.display(), "directory creation raced, already exists");
                }
                Err(err) => return Err(err.into()),
            }
        }
        self.cache.insert(parent.to_path_buf());
        Ok(())
    }
}

impl Mover for PlainMover {
    fn target(&self) -> TrackedDir {
        self.target
    }

    fn relocate(&self, mut entry: TrackedEntry) -> Result<MoveOutcome> {
        if entry.current() == self.target {
            // Idempotent retry: already where it should be
            entry.mark_moved(self.target);
            return Ok(MoveOutcome {
                entry,
                status: MoveStatus::Moved,
            });
        }

        let src = entry.current_path(&self.layout);
        let dst = entry.path_in(&self.layout, self.target);
        self.ensure_parent(&dst)?;

        if dst.exists() {
            error!(
                src = %src.display(),
                dst = %dst.display(),
                "destination busy, leaving entry unmoved"
            );
            METRICS.inc_move_failures();
            entry.mark_unmoved();
            return Ok(MoveOutcome {
                entry,
                status: MoveStatus::Unmoved,
            });
        }

        match fs::rename(&src, &dst) {
            Ok(()) => {
                entry.mark_moved(self.target);
                Ok(MoveOutcome {
                    entry,
                    status: MoveStatus::Moved,
                })
            }
            // Contention with another process: the file vanished from under
            // us or appeared at the destination. Reported, not thrown.
            Err(err)
                if matches!(
                    err.kind(),
                    io::ErrorKind::NotFound | io::ErrorKind::AlreadyExists
                ) =>
            {
                error!(
                    src = %src.display(),
                    dst = %dst.display(),
                    error = %err,
                    "rename lost a race, leaving entry unmoved"
                );
                METRICS.inc_move_failures();
                entry.mark_unmoved();
                Ok(MoveOutcome {
                    entry,
                    status: MoveStatus::Unmoved,
                })
            }
            Err(err) => Err(err.into()),
        }
    }
}

/// Staging mover that resolves same-name collisions before moving.
///
/// If staging, completed, or loaded already hold a file of the same name:
/// size mismatch or digest mismatch means a genuine collision and the entry
/// is disambiguated with its discovery timestamp, renaming the source file
/// in place so every role's target moves together; identical content means
/// a true duplicate, which is deleted at the source and reported
/// [`MoveStatus::Discarded`]. Entries already staged skip the conflict
/// check entirely and retry as a no-op.
pub struct ConflictResolvingMover {
    layout: Layout,
    inner: PlainMover,
}

impl ConflictResolvingMover {
    pub fn new(layout: Layout, cache: Arc<DirCache>) -> Self {
        let inner = PlainMover::new(layout.clone(), TrackedDir::Staging, cache);
        Self { layout, inner }
    }

    fn find_conflict(&self, entry: &TrackedEntry) -> Option<std::path::PathBuf> {
        const DOWNSTREAM: [TrackedDir; 3] = [
            TrackedDir::Staging,
            TrackedDir::Completed,
            TrackedDir::Loaded,
        ];
        DOWNSTREAM
            .iter()
            .map(|role| entry.path_in(&self.layout, *role))
            .find(|path| path.exists())
    }
}

impl Mover for ConflictResolvingMover {
    fn target(&self) -> TrackedDir {
        TrackedDir::Staging
    }

    fn relocate(&self, mut entry: TrackedEntry) -> Result<MoveOutcome> {
        if entry.current() == TrackedDir::Staging {
            // Idempotent retry: the same-named staging file is the entry
            // itself, not a conflict
            return self.inner.relocate(entry);
        }
        if let Some(conflict) = self.find_conflict(&entry) {
            let src = entry.current_path(&self.layout);
            let src_len = fs::metadata(&src)?.len();
            let conflict_len = fs::metadata(&conflict)?.len();

            // Cheap check first; only digest when sizes agree
            if src_len == conflict_len
                && capped_digest(&src)? == capped_digest(&conflict)?
            {
                info!(
                    src = %src.display(),
                    existing = %conflict.display(),
                    "duplicate payload, discarding source"
                );
                if let Err(err) = fs::remove_file(&src) {
                    // Orphan cleanup is eventually consistent
                    warn!(src = %src.display(), error = %err, "failed to delete duplicate");
                }
                METRICS.inc_files_discarded();
                entry.mark_unmoved();
                return Ok(MoveOutcome {
                    entry,
                    status: MoveStatus::Discarded,
                });
            }

            info!(
                src = %src.display(),
                existing = %conflict.display(),
                "name collision with distinct payload, disambiguating"
            );
            entry.disambiguate();
            let renamed = entry.current_path(&self.layout);
            // The suffix changes every role's target at once; the source
            // file must follow before the move
            match fs::rename(&src, &renamed) {
                Ok(()) => {}
                Err(err)
                    if matches!(
                        err.kind(),
                        io::ErrorKind::NotFound | io::ErrorKind::AlreadyExists
                    ) =>
                {
                    error!(
                        src = %src.display(),
                        dst = %renamed.display(),
                        error = %err,
                        "disambiguation rename lost a race, leaving entry unmoved"
                    );
                    METRICS.inc_move_failures();
                    entry.mark_unmoved();
                    return Ok(MoveOutcome {
                        entry,
                        status: MoveStatus::Unmoved,
                    });
                }
                Err(err) => return Err(err.into()),
            }
        }
        self.inner.relocate(entry)
    }
}

/// SHA-256 over at most the first [`DIGEST_CAP_BYTES`] of a file.
fn capped_digest(path: &Path) -> Result<[u8; 32]> {
    let file = fs::File::open(path)?;
    let mut reader = io::Read::take(file, DIGEST_CAP_BYTES);
    let mut hasher = Sha256::new();
    io::copy(&mut reader, &mut hasher)?;
    Ok(hasher.finalize().into())
}
