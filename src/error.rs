//! Error handling module for modsys
//!
//! Provides the error type for the pipeline runner using thiserror.
//! Per-module problems are *not* errors in this sense: bad descriptors are
//! skipped during discovery and load failures are aggregated by the manager
//! and reported through events. What remains is settings trouble and
//! failing to write the report.

use thiserror::Error;

/// Main error type for modsys
#[derive(Error, Debug)]
pub enum ModsysError {
    /// IO errors (writing the report)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Settings errors (loading, parsing, validation)
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type alias for modsys operations
pub type Result<T> = std::result::Result<T, ModsysError>;

impl From<anyhow::Error> for ModsysError {
    fn from(err: anyhow::Error) -> Self {
        Self::Config(format!("{:#}", err))
    }
}
