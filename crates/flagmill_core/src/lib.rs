//! Flagmill core
//!
//! Crash-recoverable batch staging for a distributed filesystem ingest
//! pipeline. Discovered input files are tracked through a lifecycle of
//! role directories (origin, staging, completed, loaded), grouped into
//! size-validated batches, and announced to downstream consumers via flag
//! files written under a five-phase protocol with full rollback.
//!
//! The [`maker::FlagMaker`] polling loop is the entry point; everything
//! else is a collaborator it drives.

pub mod config;
pub mod content;
pub mod control;
pub mod dir_cache;
pub mod distributor;
pub mod entry;
pub mod error;
pub mod maker;
pub mod metrics;
pub mod mover;
pub mod pool;
pub mod scanner;
pub mod validator;
pub mod writer;

pub use config::{FlagDataTypeConfig, FlagMakerConfig, FlagOrder, Layout};
pub use control::{send_command, spawn_listener, ControlCommand, ControlListener};
pub use distributor::{FlagDistributor, GreedyDistributor};
pub use entry::{TrackedDir, TrackedEntry};
pub use error::{FlagError, Result};
pub use maker::FlagMaker;
pub use metrics::{MetricsSnapshot, METRICS};
pub use validator::SizeValidator;
pub use writer::{FlagFileWriter, WrittenFlag};
