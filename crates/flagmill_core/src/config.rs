//! Configuration for the flag maker
//!
//! Loaded from TOML. One global section plus one `[[data_types]]` table per
//! ingest data type. The tracked-directory roles are fixed; only the data
//! root they hang off is configurable (see [`Layout`]).

use crate::entry::TrackedDir;
use crate::error::{FlagError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default control socket bind address.
pub const DEFAULT_CONTROL_ADDR: &str = "127.0.0.1:7851";

/// Sort order used when rendering a batch into flag content.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlagOrder {
    /// Oldest discovery first.
    #[default]
    Fifo,
    /// Newest discovery first.
    Lifo,
}

/// Per-data-type configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlagDataTypeConfig {
    /// Data type name, used in flag file names and control commands
    pub name: String,
    /// Origin folders (relative to the origin root) watched for this type
    pub folders: Vec<String>,
    /// Ingest script invoked by the consumer, appended to `home`
    pub script: String,
    /// Reducers token placed after the input list on the command line
    pub reducers: String,
    /// Input format passed as `-inputFormat`
    pub input_format: String,
    /// When set, input files are listed after the command line behind this
    /// marker instead of inline
    #[serde(default)]
    pub file_list_marker: Option<String>,
    /// Extra arguments appended verbatim to the command line
    #[serde(default)]
    pub extra_args: Option<String>,
    /// Maximum rendered flag content length in bytes
    #[serde(default = "default_max_flag_bytes")]
    pub max_flag_size_bytes: u64,
    /// Ceiling on result-tracking counters (`2 * files + 2`); None = unbounded
    #[serde(default)]
    pub max_counters: Option<u64>,
    /// Emission timeout: a partial batch may be flagged once this has elapsed
    /// since the last emission
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Backlog threshold: at or above this many unconsumed flag files, only
    /// full batches are admitted; None = backlog is never considered excessive
    #[serde(default)]
    pub max_backlog: Option<u64>,
    /// A batch with this many files is considered full
    #[serde(default = "default_batch_max_files")]
    pub batch_max_files: usize,
    /// FIFO or LIFO content ordering
    #[serde(default)]
    pub order: FlagOrder,
}

fn default_max_flag_bytes() -> u64 {
    1024 * 1024
}

fn default_timeout_secs() -> u64 {
    600
}

fn default_batch_max_files() -> usize {
    100
}

/// Top-level flag maker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlagMakerConfig {
    /// Root under which the tracked directories live
    pub data_dir: PathBuf,
    /// Directory where flag files are emitted
    pub flag_dir: PathBuf,
    /// Pool name embedded in flag file names
    pub pool: String,
    /// Command home prefix (first token of the rendered command line)
    pub home: String,
    /// Separator between `home` and the script
    #[serde(default = "default_separator")]
    pub separator: String,
    /// Seconds between polling sweeps across all data types
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// Worker threads for parallel filesystem moves
    #[serde(default = "default_worker_threads")]
    pub worker_threads: usize,
    /// Control socket bind address
    #[serde(default = "default_control_addr")]
    pub control_addr: String,
    /// Directory-existence cache capacity
    #[serde(default = "default_dir_cache_capacity")]
    pub dir_cache_capacity: usize,
    /// Directory-existence cache entry TTL in seconds
    #[serde(default = "default_dir_cache_ttl_secs")]
    pub dir_cache_ttl_secs: u64,
    /// Stamp flag artifacts with the batch's max discovery timestamp
    #[serde(default = "default_true")]
    pub stamp_mtime: bool,
    /// Filesystem block size used to estimate parallel work units
    #[serde(default = "default_block_size")]
    pub block_size: u64,
    /// Watched data types
    pub data_types: Vec<FlagDataTypeConfig>,
}

fn default_separator() -> String {
    "/".to_string()
}

fn default_poll_interval_secs() -> u64 {
    30
}

fn default_worker_threads() -> usize {
    4
}

fn default_control_addr() -> String {
    DEFAULT_CONTROL_ADDR.to_string()
}

fn default_dir_cache_capacity() -> usize {
    1024
}

fn default_dir_cache_ttl_secs() -> u64 {
    300
}

fn default_true() -> bool {
    true
}

fn default_block_size() -> u64 {
    128 * 1024 * 1024
}

impl FlagMakerConfig {
    /// Load and validate a configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate invariants that serde defaults cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.pool.is_empty() {
            return Err(FlagError::Config("pool name must not be empty".into()));
        }
        if self.worker_threads == 0 {
            return Err(FlagError::Config("worker_threads must be at least 1".into()));
        }
        if self.block_size == 0 {
            return Err(FlagError::Config("block_size must be positive".into()));
        }
        if self.data_types.is_empty() {
            return Err(FlagError::Config("at least one data type is required".into()));
        }
        for dt in &self.data_types {
            if dt.name.is_empty() {
                return Err(FlagError::Config("data type name must not be empty".into()));
            }
            if dt.folders.is_empty() {
                return Err(FlagError::Config(format!(
                    "data type '{}' has no watched folders",
                    dt.name
                )));
            }
            if dt.batch_max_files == 0 {
                return Err(FlagError::Config(format!(
                    "data type '{}': batch_max_files must be at least 1",
                    dt.name
                )));
            }
            if dt.max_flag_size_bytes == 0 {
                return Err(FlagError::Config(format!(
                    "data type '{}': max_flag_size_bytes must be positive",
                    dt.name
                )));
            }
        }
        Ok(())
    }

    /// Tracked-directory layout derived from this config.
    pub fn layout(&self) -> Layout {
        Layout::new(self.data_dir.clone())
    }

    /// Directory cache TTL as a duration.
    pub fn dir_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.dir_cache_ttl_secs)
    }

    /// Look up a data type by name.
    pub fn data_type(&self, name: &str) -> Option<&FlagDataTypeConfig> {
        self.data_types.iter().find(|dt| dt.name == name)
    }
}

/// Maps tracked-directory roles to real filesystem paths.
///
/// Every role root mirrors the discovered file's relative folder structure:
/// `<data_dir>/<role>/<folder>/<file>`.
#[derive(Debug, Clone)]
pub struct Layout {
    data_dir: PathBuf,
}

impl Layout {
    pub fn new(data_dir: PathBuf) -> Self {
        Self { data_dir }
    }

    /// Root directory for a tracked role.
    pub fn role_root(&self, role: TrackedDir) -> PathBuf {
        self.data_dir.join(role.dir_name())
    }

    /// Full path of a file under a tracked role.
    pub fn path_for(&self, role: TrackedDir, folder: &str, file_name: &str) -> PathBuf {
        self.role_root(role).join(folder).join(file_name)
    }
}
