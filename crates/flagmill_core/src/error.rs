//! Error types for the flag staging pipeline

use std::io;
use thiserror::Error;

/// Flagmill error type
#[derive(Error, Debug)]
pub enum FlagError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Distributor error: {0}")]
    Distributor(String),

    #[error("Batch aborted for '{data_type}': {reason}")]
    BatchAborted { data_type: String, reason: String },

    #[error("Worker pool error: {0}")]
    WorkerPool(String),

    #[error("Control channel error: {0}")]
    Control(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, FlagError>;
