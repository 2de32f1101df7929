//! Flag file write protocol
//!
//! One batch goes through five phases in strict order: Stage, Generate,
//! Stamp, Promote, Finalize. Phases 1 and 4 fan entries out over the mover
//! pool and block until every task reports; ordering across entries within
//! a phase is unspecified, phase ordering is not.
//!
//! Failure in any phase is modeled as data, not unwinding: a move phase
//! yields a [`PhaseResult`], and rollback is computed from it plus the
//! last-known entry states. Rollback restores every non-discarded batch
//! entry to its origin directory best-effort; what cannot be restored is
//! logged as orphaned together with its location, an accepted
//! eventual-consistency gap.

use crate::config::{FlagDataTypeConfig, FlagMakerConfig, FlagOrder, Layout};
use crate::content::{self, GENERATING_SUFFIX};
use crate::dir_cache::DirCache;
use crate::entry::{lifo_cmp, TrackedDir, TrackedEntry};
use crate::error::{FlagError, Result};
use crate::metrics::{self, BatchRecord, METRICS};
use crate::mover::{ConflictResolvingMover, MoveStatus, Mover, PlainMover};
use crate::pool::{MoverPool, PendingMove};
use filetime::FileTime;
use std::collections::VecDeque;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, error, info, warn};

/// Bounded wait per outstanding move while rolling back; after this the
/// task is abandoned and its file left for the rollback probe or the
/// startup recovery sweep.
const ROLLBACK_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// File name of the best-effort per-batch metrics log inside the flag dir.
const METRICS_LOG_NAME: &str = "flagmill_metrics.jsonl";

/// Outcome of one concurrent move phase.
#[derive(Debug)]
pub enum PhaseResult {
    Success {
        moved: Vec<TrackedEntry>,
        discarded: Vec<TrackedEntry>,
    },
    PartialFailure {
        moved: Vec<TrackedEntry>,
        failed: Vec<TrackedEntry>,
        discarded: Vec<TrackedEntry>,
    },
}

/// A finalized batch. `flag_path` is `None` when every entry turned out to
/// be a duplicate and no flag was emitted.
#[derive(Debug)]
pub struct WrittenFlag {
    pub flag_path: Option<PathBuf>,
    pub entries: Vec<TrackedEntry>,
    pub discarded: Vec<TrackedEntry>,
}

/// Everything rollback needs, collected as the phases advance.
struct RollbackCtx {
    /// Last known state of each non-discarded batch entry
    entries: Vec<TrackedEntry>,
    /// Moves still outstanding when a phase bailed
    pending: Vec<PendingMove>,
    /// Partial artifact awaiting deletion
    artifact: Option<PathBuf>,
}

pub struct FlagFileWriter {
    config: FlagMakerConfig,
    layout: Layout,
    cache: Arc<DirCache>,
    pool: MoverPool,
}

impl FlagFileWriter {
    pub fn new(config: FlagMakerConfig) -> Self {
        let layout = config.layout();
        let cache = Arc::new(DirCache::new(
            config.dir_cache_capacity,
            config.dir_cache_ttl(),
        ));
        let pool = MoverPool::new(config.worker_threads);
        Self {
            config,
            layout,
            cache,
            pool,
        }
    }

    /// Drain the mover pool and stop its workers.
    pub fn shutdown(self) {
        self.pool.shutdown();
    }

    /// Run the full write protocol for one batch. On error the filesystem
    /// has been rolled back (or orphans logged) before the error surfaces.
    pub fn write_flag(
        &self,
        dt: &FlagDataTypeConfig,
        batch: Vec<TrackedEntry>,
    ) -> Result<WrittenFlag> {
        let mut ctx = RollbackCtx {
            entries: batch.clone(),
            pending: Vec::new(),
            artifact: None,
        };
        match self.run_phases(dt, batch, &mut ctx) {
            Ok(written) => Ok(written),
            Err(err) => {
                error!(data_type = %dt.name, error = %err, "batch failed, rolling back");
                self.roll_back(ctx);
                Err(err)
            }
        }
    }

    fn run_phases(
        &self,
        dt: &FlagDataTypeConfig,
        batch: Vec<TrackedEntry>,
        ctx: &mut RollbackCtx,
    ) -> Result<WrittenFlag> {
        let batch_size = batch.len();

        // Phase 1: stage everything, resolving name conflicts
        let stage_mover: Arc<dyn Mover> = Arc::new(ConflictResolvingMover::new(
            self.layout.clone(),
            Arc::clone(&self.cache),
        ));
        let (staged, discarded) = match self.move_phase(stage_mover, batch, ctx) {
            PhaseResult::Success { moved, discarded } => (moved, discarded),
            PhaseResult::PartialFailure { failed, .. } => {
                return Err(FlagError::BatchAborted {
                    data_type: dt.name.clone(),
                    reason: format!(
                        "{} of {batch_size} entries could not be staged",
                        failed.len().max(1)
                    ),
                });
            }
        };
        METRICS.add_files_staged(staged.len() as u64);
        ctx.entries = staged.clone();

        if staged.is_empty() {
            info!(
                data_type = %dt.name,
                discarded = discarded.len(),
                "entire batch was duplicates, no flag emitted"
            );
            return Ok(WrittenFlag {
                flag_path: None,
                entries: Vec::new(),
                discarded,
            });
        }

        // Phase 2: generate content in the configured order
        let mut ordered = staged;
        match dt.order {
            FlagOrder::Fifo => ordered.sort(),
            FlagOrder::Lifo => ordered.sort_by(lifo_cmp),
        }
        let mut epoch_secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0);
        fs::create_dir_all(&self.config.flag_dir)?;
        let name = loop {
            let candidate = content::flag_name(
                epoch_secs,
                &self.config.pool,
                &dt.name,
                ordered[0].folder(),
                ordered.len(),
            );
            // Batches finalized within the same centisecond would collide
            // on the timestamp prefix
            if !self.config.flag_dir.join(&candidate).exists() {
                break candidate;
            }
            epoch_secs += 0.01;
        };
        let generating_path = self
            .config
            .flag_dir
            .join(format!("{name}{GENERATING_SUFFIX}"));
        let uris: Vec<String> = ordered
            .iter()
            .map(|entry| content::entry_uri(entry, &self.layout))
            .collect();
        let body = content::render(&self.config, dt, &uris);
        fs::write(&generating_path, &body)?;
        ctx.artifact = Some(generating_path.clone());
        for entry in &ordered {
            debug!(
                data_type = %dt.name,
                file = %entry.rel_path(),
                bytes = entry.size(),
                map_slots = entry.map_slots(),
                "flagged input file"
            );
        }

        // Phase 3: stamp the artifact with the newest discovery time
        if self.config.stamp_mtime {
            let max_ms = ordered
                .iter()
                .map(TrackedEntry::discovered_at)
                .max()
                .unwrap_or(0);
            let mtime = FileTime::from_unix_time(max_ms / 1000, (max_ms % 1000) as u32 * 1_000_000);
            filetime::set_file_mtime(&generating_path, mtime)?;
        }

        // Phase 4: promote staged entries to completed
        let promote_mover: Arc<dyn Mover> = Arc::new(PlainMover::new(
            self.layout.clone(),
            TrackedDir::Completed,
            Arc::clone(&self.cache),
        ));
        let promoted = match self.move_phase(promote_mover, ordered, ctx) {
            PhaseResult::Success { moved, .. } => moved,
            PhaseResult::PartialFailure { failed, .. } => {
                return Err(FlagError::BatchAborted {
                    data_type: dt.name.clone(),
                    reason: format!(
                        "{} of {batch_size} staged entries could not be promoted",
                        failed.len().max(1)
                    ),
                });
            }
        };
        METRICS.add_files_promoted(promoted.len() as u64);
        ctx.entries = promoted.clone();

        // Phase 5: finalize atomically and persist metrics
        let final_path = self.config.flag_dir.join(&name);
        fs::rename(&generating_path, &final_path)?;
        ctx.artifact = None;
        METRICS.inc_flags_written();
        info!(
            data_type = %dt.name,
            flag = %final_path.display(),
            files = promoted.len(),
            discarded = discarded.len(),
            "flag file finalized"
        );
        metrics::persist_batch(
            &self.config.flag_dir.join(METRICS_LOG_NAME),
            &BatchRecord {
                data_type: &dt.name,
                flag: &name,
                file_count: promoted.len(),
                total_bytes: promoted.iter().map(TrackedEntry::size).sum(),
                map_slots: promoted.iter().map(TrackedEntry::map_slots).sum(),
                discarded: discarded.len(),
                written_at: chrono::Utc::now().to_rfc3339(),
            },
        );

        Ok(WrittenFlag {
            flag_path: Some(final_path),
            entries: promoted,
            discarded,
        })
    }

    /// Fan one mover over the entries and await every task. On a lost
    /// worker the remaining handles land in `ctx.pending` for the rollback
    /// drain. On partial failure `ctx.entries` is rebuilt from the reported
    /// outcomes plus the pre-phase states of tasks that never reported;
    /// discarded entries have no file left to restore and are excluded.
    fn move_phase(
        &self,
        mover: Arc<dyn Mover>,
        entries: Vec<TrackedEntry>,
        ctx: &mut RollbackCtx,
    ) -> PhaseResult {
        let pre_phase = entries.clone();
        let mut handles: VecDeque<PendingMove> = entries
            .into_iter()
            .map(|entry| self.pool.submit(Arc::clone(&mover), entry))
            .collect();

        let mut moved = Vec::new();
        let mut failed = Vec::new();
        let mut discarded = Vec::new();
        let mut resolved = 0usize;
        let mut worker_lost = false;

        while let Some(handle) = handles.pop_front() {
            match handle.wait() {
                Ok(outcome) => {
                    resolved += 1;
                    match outcome.status {
                        MoveStatus::Moved => moved.push(outcome.entry),
                        MoveStatus::Unmoved => failed.push(outcome.entry),
                        MoveStatus::Discarded => discarded.push(outcome.entry),
                    }
                }
                Err(err) => {
                    error!(error = %err, "mover task lost, aborting phase");
                    worker_lost = true;
                    break;
                }
            }
        }
        if worker_lost {
            ctx.pending.extend(handles);
        }

        if failed.is_empty() && !worker_lost {
            PhaseResult::Success { moved, discarded }
        } else {
            let mut known: Vec<TrackedEntry> = Vec::with_capacity(pre_phase.len());
            known.extend(moved.iter().cloned());
            known.extend(failed.iter().cloned());
            // Tasks past `resolved` never reported; their files are wherever
            // the phase found them
            known.extend(pre_phase.into_iter().skip(resolved));
            ctx.entries = known;
            PhaseResult::PartialFailure {
                moved,
                failed,
                discarded,
            }
        }
    }

    /// Restore the batch after a failed phase. Deterministic cleanup: drain
    /// stragglers, probe each entry's possible locations, move it home,
    /// delete the partial artifact.
    fn roll_back(&self, ctx: RollbackCtx) {
        METRICS.inc_batches_rolled_back();

        for pending in &ctx.pending {
            match pending.wait_timeout(ROLLBACK_DRAIN_TIMEOUT) {
                Some(Ok(outcome)) => debug!(
                    entry = %outcome.entry.rel_path(),
                    "outstanding move settled during rollback"
                ),
                Some(Err(err)) => warn!(error = %err, "outstanding move failed during rollback"),
                None => warn!("outstanding move did not settle within the drain timeout"),
            }
        }

        for entry in &ctx.entries {
            self.roll_back_entry(entry);
        }

        if let Some(artifact) = &ctx.artifact {
            match fs::remove_file(artifact) {
                Ok(()) => info!(artifact = %artifact.display(), "deleted partial flag artifact"),
                Err(err) => warn!(
                    artifact = %artifact.display(),
                    error = %err,
                    "failed to delete partial flag artifact"
                ),
            }
        }
    }

    /// Move one entry back to origin from wherever it currently lives.
    /// Probes both its recorded name and its disambiguated name, since a
    /// staging conflict may have renamed the targets mid-batch.
    fn roll_back_entry(&self, entry: &TrackedEntry) {
        let origin = entry.path_in(&self.layout, TrackedDir::Origin);
        if origin.exists() {
            // Never left, or a duplicate of its own restore
            return;
        }

        let suffixed = entry.suffixed_file_name();
        let mut candidates = Vec::with_capacity(4);
        for role in [TrackedDir::Staging, TrackedDir::Completed] {
            candidates.push(entry.path_in(&self.layout, role));
            candidates.push(self.layout.path_for(role, entry.folder(), &suffixed));
        }

        for src in candidates {
            if !src.exists() {
                continue;
            }
            if let Some(parent) = origin.parent() {
                let _ = fs::create_dir_all(parent);
            }
            match fs::rename(&src, &origin) {
                Ok(()) => {
                    METRICS.inc_files_restored();
                    info!(
                        entry = %entry.rel_path(),
                        from = %src.display(),
                        "entry restored to origin"
                    );
                }
                Err(err) => {
                    METRICS.inc_entries_orphaned();
                    error!(
                        entry = %entry.rel_path(),
                        location = %src.display(),
                        error = %err,
                        "entry orphaned: could not be restored to origin"
                    );
                }
            }
            return;
        }

        METRICS.inc_entries_orphaned();
        error!(
            entry = %entry.rel_path(),
            last_role = entry.current().dir_name(),
            "entry orphaned: not found in any tracked directory during rollback"
        );
    }
}
