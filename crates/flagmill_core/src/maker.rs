//! Flag maker polling loop
//!
//! One control thread owns all loop state and is its only mutator; control
//! commands arrive as immutable messages over an mpsc channel and are
//! drained once per iteration (cooperative cancellation). Per data type the
//! loop applies the deadline/backlog admission policy, pulls batches from
//! the distributor and hands them to the writer. Data types are processed
//! strictly sequentially; cross-type parallelism would break the per-type
//! backlog bookkeeping.

use crate::config::{FlagDataTypeConfig, FlagMakerConfig, Layout};
use crate::content;
use crate::control::ControlCommand;
use crate::distributor::{FlagDistributor, GreedyDistributor};
use crate::entry::TrackedDir;
use crate::error::{FlagError, Result};
use crate::writer::FlagFileWriter;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

/// Per-data-type loop state.
struct DataTypeState {
    /// Next moment a partial batch may be emitted
    deadline: Instant,
    timeout: Duration,
}

impl DataTypeState {
    fn new(timeout: Duration) -> Self {
        Self {
            deadline: Instant::now() + timeout,
            timeout,
        }
    }

    fn reset(&mut self) {
        self.deadline = Instant::now() + self.timeout;
    }

    fn kick(&mut self) {
        self.deadline = Instant::now();
    }

    fn timed_out(&self) -> bool {
        Instant::now() >= self.deadline
    }
}

pub struct FlagMaker {
    config: FlagMakerConfig,
    layout: Layout,
    writer: FlagFileWriter,
    distributors: HashMap<String, Box<dyn FlagDistributor>>,
    states: HashMap<String, DataTypeState>,
    control_rx: mpsc::Receiver<ControlCommand>,
    running: bool,
}

impl FlagMaker {
    /// Maker with the bundled greedy distributor per data type.
    pub fn new(config: FlagMakerConfig, control_rx: mpsc::Receiver<ControlCommand>) -> Self {
        let distributors = config
            .data_types
            .iter()
            .map(|dt| {
                let dist: Box<dyn FlagDistributor> =
                    Box::new(GreedyDistributor::new(config.clone(), dt.clone()));
                (dt.name.clone(), dist)
            })
            .collect();
        Self::with_distributors(config, control_rx, distributors)
    }

    /// Maker with externally supplied distributors.
    pub fn with_distributors(
        config: FlagMakerConfig,
        control_rx: mpsc::Receiver<ControlCommand>,
        distributors: HashMap<String, Box<dyn FlagDistributor>>,
    ) -> Self {
        let layout = config.layout();
        let writer = FlagFileWriter::new(config.clone());
        let states = config
            .data_types
            .iter()
            .map(|dt| {
                (
                    dt.name.clone(),
                    DataTypeState::new(Duration::from_secs(dt.timeout_secs)),
                )
            })
            .collect();
        Self {
            config,
            layout,
            writer,
            distributors,
            states,
            control_rx,
            running: true,
        }
    }

    /// Run until a shutdown command arrives or a fatal error surfaces.
    pub fn run(&mut self) -> Result<()> {
        self.recover()?;
        info!(
            pool = %self.config.pool,
            data_types = self.config.data_types.len(),
            "flag maker loop started"
        );

        while self.running {
            self.poll_once()?;
            if self.running {
                thread::sleep(Duration::from_secs(self.config.poll_interval_secs));
            }
        }

        info!("flag maker loop stopped");
        Ok(())
    }

    /// One full sweep: drain control, then visit every data type.
    pub fn poll_once(&mut self) -> Result<()> {
        self.drain_control();
        if !self.running {
            return Ok(());
        }
        let data_types = self.config.data_types.clone();
        for dt in &data_types {
            if !self.running {
                break;
            }
            if let Err(err) = self.sweep_data_type(dt) {
                match err {
                    // A broken configuration would retry without bound;
                    // stop the loop instead
                    FlagError::Distributor(_) | FlagError::Config(_) | FlagError::InvalidState(_) => {
                        error!(data_type = %dt.name, error = %err, "fatal error, stopping loop");
                        return Err(err);
                    }
                    other => {
                        error!(
                            data_type = %dt.name,
                            error = %other,
                            "sweep failed, will retry next poll"
                        );
                    }
                }
            }
        }
        Ok(())
    }

    /// Drain the mover pool; call after `run` returns.
    pub fn shutdown(self) {
        self.writer.shutdown();
    }

    fn drain_control(&mut self) {
        loop {
            match self.control_rx.try_recv() {
                Ok(ControlCommand::Shutdown) => {
                    info!("shutdown command received");
                    self.running = false;
                }
                Ok(ControlCommand::Kick(name)) => match self.states.get_mut(&name) {
                    Some(state) => {
                        info!(data_type = %name, "deadline kicked into the past");
                        state.kick();
                    }
                    None => warn!(data_type = %name, "kick for unknown data type"),
                },
                Err(mpsc::TryRecvError::Empty) | Err(mpsc::TryRecvError::Disconnected) => break,
            }
        }
    }

    fn sweep_data_type(&mut self, dt: &FlagDataTypeConfig) -> Result<()> {
        let dist = self
            .distributors
            .get_mut(&dt.name)
            .ok_or_else(|| FlagError::InvalidState(format!("no distributor for '{}'", dt.name)))?;
        let state = self
            .states
            .get_mut(&dt.name)
            .ok_or_else(|| FlagError::InvalidState(format!("no state for '{}'", dt.name)))?;

        dist.refresh()?;

        let timed_out = state.timed_out();
        let backlog = backlog_count(&self.config.flag_dir, &self.config.pool, &dt.name);
        let backlog_excessive = dt.max_backlog.is_some_and(|threshold| backlog >= threshold);
        let full_only = !timed_out || backlog_excessive;
        debug!(
            data_type = %dt.name,
            timed_out,
            backlog,
            full_only,
            "sweeping data type"
        );

        loop {
            match dist.next_batch(full_only)? {
                None => break,
                Some(batch) if batch.is_empty() => {
                    return Err(FlagError::Distributor(format!(
                        "data type '{}': distributor claimed availability but returned an empty batch",
                        dt.name
                    )));
                }
                Some(batch) => match self.writer.write_flag(dt, batch) {
                    Ok(written) => {
                        if written.flag_path.is_some() {
                            state.reset();
                        }
                    }
                    Err(err) => {
                        // Rollback already ran; give this type up until the
                        // next poll
                        error!(data_type = %dt.name, error = %err, "batch write failed");
                        break;
                    }
                },
            }
        }
        Ok(())
    }

    /// Startup recovery sweep: replay rollback logic for whatever a crash
    /// left behind. Staged files without a finalized flag are mid-batch
    /// leftovers and go back to origin; `.generating` artifacts are partial
    /// by definition and are deleted.
    pub fn recover(&self) -> Result<()> {
        let staging_root = self.layout.role_root(TrackedDir::Staging);
        let origin_root = self.layout.role_root(TrackedDir::Origin);
        let mut restored = 0u64;

        if staging_root.is_dir() {
            for item in WalkDir::new(&staging_root).follow_links(false) {
                let item = match item {
                    Ok(item) => item,
                    Err(err) => {
                        warn!(error = %err, "walk error during recovery sweep");
                        continue;
                    }
                };
                if !item.file_type().is_file() {
                    continue;
                }
                let rel = match item.path().strip_prefix(&staging_root) {
                    Ok(rel) => rel,
                    Err(_) => continue,
                };
                let origin = origin_root.join(rel);
                if origin.exists() {
                    warn!(
                        staged = %item.path().display(),
                        "leftover staged file conflicts with origin, leaving in place"
                    );
                    continue;
                }
                if let Some(parent) = origin.parent() {
                    let _ = fs::create_dir_all(parent);
                }
                match fs::rename(item.path(), &origin) {
                    Ok(()) => restored += 1,
                    Err(err) => error!(
                        staged = %item.path().display(),
                        error = %err,
                        "failed to restore staged leftover"
                    ),
                }
            }
        }

        let mut deleted = 0u64;
        if self.config.flag_dir.is_dir() {
            for item in fs::read_dir(&self.config.flag_dir)?.flatten() {
                let name = item.file_name();
                let Some(name) = name.to_str() else { continue };
                if name.ends_with(content::GENERATING_SUFFIX) {
                    match fs::remove_file(item.path()) {
                        Ok(()) => deleted += 1,
                        Err(err) => warn!(
                            artifact = %item.path().display(),
                            error = %err,
                            "failed to delete orphan generating artifact"
                        ),
                    }
                }
            }
        }

        if restored > 0 || deleted > 0 {
            info!(restored, deleted, "startup recovery sweep cleaned up leftovers");
        }
        Ok(())
    }
}

/// Finalized, not-yet-consumed flag files for one data type.
fn backlog_count(flag_dir: &Path, pool: &str, data_type: &str) -> u64 {
    let Ok(read) = fs::read_dir(flag_dir) else {
        return 0;
    };
    read.flatten()
        .filter(|entry| {
            entry
                .file_name()
                .to_str()
                .is_some_and(|name| content::is_flag_for(name, pool, data_type))
        })
        .count() as u64
}
