//! Batch selection
//!
//! The selection algorithm is a collaborator of the maker loop, reached only
//! through the [`FlagDistributor`] trait. The bundled [`GreedyDistributor`]
//! consumes discovered entries in the configured order and shrinks each
//! candidate with the size validator until it fits.

use crate::config::{FlagDataTypeConfig, FlagMakerConfig, FlagOrder, Layout};
use crate::entry::TrackedEntry;
use crate::error::{FlagError, Result};
use crate::scanner;
use crate::validator::SizeValidator;
use std::collections::VecDeque;
use tracing::debug;

/// Source of candidate batches for one data type.
///
/// `next_batch` returns `None` when no admissible batch is currently
/// available. Batches are already size-validated; an implementation must
/// never return `Some` with an empty batch (the maker treats that as a
/// fatal configuration error).
pub trait FlagDistributor: Send {
    /// Refresh the candidate view, called once per polling sweep.
    fn refresh(&mut self) -> Result<()> {
        Ok(())
    }

    /// Next candidate batch; `full_only` restricts admission to batches
    /// that would produce a full (non-partial) flag file.
    fn next_batch(&mut self, full_only: bool) -> Result<Option<Vec<TrackedEntry>>>;
}

/// Default distributor: greedy prefix of the discovery queue.
pub struct GreedyDistributor {
    config: FlagMakerConfig,
    dt: FlagDataTypeConfig,
    layout: Layout,
    validator: SizeValidator,
    queue: VecDeque<TrackedEntry>,
}

impl GreedyDistributor {
    pub fn new(config: FlagMakerConfig, dt: FlagDataTypeConfig) -> Self {
        let layout = config.layout();
        let validator = SizeValidator::new(config.clone());
        Self {
            config,
            dt,
            layout,
            validator,
            queue: VecDeque::new(),
        }
    }
}

impl FlagDistributor for GreedyDistributor {
    fn refresh(&mut self) -> Result<()> {
        let (mut entries, stats) =
            scanner::discover(&self.layout, &self.dt.folders, self.config.block_size)?;
        if self.dt.order == FlagOrder::Lifo {
            entries.reverse();
        }
        debug!(
            data_type = %self.dt.name,
            discovered = stats.files_discovered,
            errors = stats.errors,
            "refreshed candidate queue"
        );
        self.queue = entries.into();
        Ok(())
    }

    fn next_batch(&mut self, full_only: bool) -> Result<Option<Vec<TrackedEntry>>> {
        if self.queue.is_empty() {
            return Ok(None);
        }

        let mut batch: Vec<TrackedEntry> = Vec::new();
        let mut hit_size_limit = false;
        while batch.len() < self.dt.batch_max_files {
            let Some(next) = self.queue.front() else {
                break;
            };
            batch.push(next.clone());
            if self.validator.is_valid(&self.dt, &batch) {
                self.queue.pop_front();
            } else {
                batch.pop();
                if batch.is_empty() {
                    return Err(FlagError::Distributor(format!(
                        "data type '{}': a single file exceeds the flag limits",
                        self.dt.name
                    )));
                }
                hit_size_limit = true;
                break;
            }
        }

        let full = hit_size_limit || batch.len() == self.dt.batch_max_files;
        if full_only && !full {
            // Withhold the partial tail for a later sweep
            for entry in batch.into_iter().rev() {
                self.queue.push_front(entry);
            }
            return Ok(None);
        }
        Ok(Some(batch))
    }
}
