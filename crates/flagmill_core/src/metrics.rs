//! Metrics for the staging pipeline
//!
//! In-memory counters (lock-free atomics, single conceptual writer per
//! counter site) plus best-effort persistence of one JSON record per batch.
//! Metrics never block staging correctness: persistence failures are logged
//! and swallowed.

use serde::Serialize;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::warn;

/// Global metrics instance
pub static METRICS: Metrics = Metrics::new();

pub struct Metrics {
    pub flags_written: AtomicU64,
    pub files_staged: AtomicU64,
    pub files_promoted: AtomicU64,
    pub files_discarded: AtomicU64,
    pub files_restored: AtomicU64,
    pub batches_rolled_back: AtomicU64,
    pub move_failures: AtomicU64,
    pub entries_orphaned: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            flags_written: AtomicU64::new(0),
            files_staged: AtomicU64::new(0),
            files_promoted: AtomicU64::new(0),
            files_discarded: AtomicU64::new(0),
            files_restored: AtomicU64::new(0),
            batches_rolled_back: AtomicU64::new(0),
            move_failures: AtomicU64::new(0),
            entries_orphaned: AtomicU64::new(0),
        }
    }

    #[inline]
    pub fn inc_flags_written(&self) {
        self.flags_written.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn add_files_staged(&self, n: u64) {
        self.files_staged.fetch_add(n, Ordering::Relaxed);
    }

    #[inline]
    pub fn add_files_promoted(&self, n: u64) {
        self.files_promoted.fetch_add(n, Ordering::Relaxed);
    }

    #[inline]
    pub fn inc_files_discarded(&self) {
        self.files_discarded.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn inc_files_restored(&self) {
        self.files_restored.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn inc_batches_rolled_back(&self) {
        self.batches_rolled_back.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn inc_move_failures(&self) {
        self.move_failures.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn inc_entries_orphaned(&self) {
        self.entries_orphaned.fetch_add(1, Ordering::Relaxed);
    }

    /// Immutable snapshot for reading.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            flags_written: self.flags_written.load(Ordering::Relaxed),
            files_staged: self.files_staged.load(Ordering::Relaxed),
            files_promoted: self.files_promoted.load(Ordering::Relaxed),
            files_discarded: self.files_discarded.load(Ordering::Relaxed),
            files_restored: self.files_restored.load(Ordering::Relaxed),
            batches_rolled_back: self.batches_rolled_back.load(Ordering::Relaxed),
            move_failures: self.move_failures.load(Ordering::Relaxed),
            entries_orphaned: self.entries_orphaned.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub flags_written: u64,
    pub files_staged: u64,
    pub files_promoted: u64,
    pub files_discarded: u64,
    pub files_restored: u64,
    pub batches_rolled_back: u64,
    pub move_failures: u64,
    pub entries_orphaned: u64,
}

impl MetricsSnapshot {
    /// Human-readable summary for periodic logging.
    pub fn summary(&self) -> String {
        format!(
            "Flags: {} written | Files: {} staged, {} promoted, {} discarded, {} restored | \
             Rollbacks: {} | Move failures: {} | Orphaned: {}",
            self.flags_written,
            self.files_staged,
            self.files_promoted,
            self.files_discarded,
            self.files_restored,
            self.batches_rolled_back,
            self.move_failures,
            self.entries_orphaned,
        )
    }
}

/// One finalized batch, persisted as a JSON line.
#[derive(Debug, Serialize)]
pub struct BatchRecord<'a> {
    pub data_type: &'a str,
    pub flag: &'a str,
    pub file_count: usize,
    pub total_bytes: u64,
    pub map_slots: u64,
    pub discarded: usize,
    pub written_at: String,
}

/// Append a batch record to the metrics log. Best effort by design.
pub fn persist_batch(path: &Path, record: &BatchRecord<'_>) {
    let line = match serde_json::to_string(record) {
        Ok(line) => line,
        Err(err) => {
            warn!(error = %err, "failed to serialize batch record");
            return;
        }
    };
    let result = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .and_then(|mut file| {
            use std::io::Write;
            writeln!(file, "{line}")
        });
    if let Err(err) = result {
        warn!(path = %path.display(), error = %err, "failed to persist batch metrics");
    }
}
