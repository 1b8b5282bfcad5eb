//! Error types for init supervisor operations

use std::io;
use thiserror::Error;

/// Result type for supervisor operations
pub type Result<T> = std::result::Result<T, InitError>;

/// Errors that can occur while supervising a workload
#[derive(Error, Debug)]
pub enum InitError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Signal setup error: {0}")]
    SignalSetup(String),

    #[error("Spawn error: {0}")]
    Spawn(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Syscall error: {0}")]
    Syscall(String),
}
