//! CLI error types and conversions

use crate::error::ClientError;
use crate::output::OutputError;
use crate::resume::ResumeError;

/// CLI errors
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    /// Catalog or download error
    #[error(transparent)]
    Client(#[from] ClientError),

    /// Output error
    #[error("output error: {0}")]
    OutputError(#[from] OutputError),

    /// Resume error
    #[error("resume error: {0}")]
    ResumeError(#[from] ResumeError),

    /// Invalid argument
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    ConfigurationError(String),

    /// Some products did not complete
    #[error("{failed} product(s) failed, {unfinished} left resumable or pending")]
    Incomplete {
        /// Products that failed
        failed: usize,
        /// Products left RESUMING or PENDING
        unfinished: usize,
    },
}
