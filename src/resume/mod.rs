//! Resume capability for product transfers
//!
//! Every in-flight product owns three files next to its destination:
//!
//! | File                     | Contents                                       |
//! |--------------------------|------------------------------------------------|
//! | `<dest>.partial`         | Bytes received so far                          |
//! | `<dest>.resume.json`     | [`TransferMarker`] describing those bytes      |
//! | `<dest>.lock`            | Advisory lock held by the transferring process |
//!
//! The marker is rewritten atomically at every checkpoint, so after a crash
//! or cancellation the next run continues from `byte_range_completed`. The
//! lock file outlives the transfer and is reused by later runs.

pub mod lock;
pub mod marker;

pub use lock::TransferLock;
pub use marker::{TransferMarker, MAX_MARKER_FILE_SIZE};

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use crate::error::ClientError;

/// Errors related to resume state
#[derive(Debug, thiserror::Error)]
pub enum ResumeError {
    /// Schema version mismatch
    #[error("schema version mismatch: expected {expected}, found {found}")]
    SchemaVersionMismatch {
        /// Expected schema version
        expected: u32,
        /// Found schema version
        found: u32,
    },

    /// Marker file too large
    #[error("marker file too large: {size} bytes (max: {max} bytes)")]
    MarkerTooLarge {
        /// Actual file size
        size: u64,
        /// Maximum allowed size
        max: u64,
    },

    /// IO error
    #[error("IO error: {0}")]
    IoError(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    SerializationError(String),

    /// Deserialization error
    #[error("deserialization error: {0}")]
    DeserializationError(String),

    /// Lock error
    #[error("lock error: {0}")]
    LockError(String),
}

impl ResumeError {
    /// Attach the file involved and convert into a [`ClientError::Io`].
    pub fn at(self, path: &Path) -> ClientError {
        ClientError::io(path, self)
    }
}

/// Files backing one product transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferPaths {
    /// Final, verified archive
    pub destination: PathBuf,
    /// Bytes received so far
    pub partial: PathBuf,
    /// Transfer marker
    pub marker: PathBuf,
    /// Advisory lock file
    pub lock: PathBuf,
}

impl TransferPaths {
    /// Derive the sibling files of `destination`.
    pub fn for_destination(destination: impl Into<PathBuf>) -> Self {
        let destination = destination.into();
        Self {
            partial: with_suffix(&destination, ".partial"),
            marker: with_suffix(&destination, ".resume.json"),
            lock: with_suffix(&destination, ".lock"),
            destination,
        }
    }

    /// Remove the marker, ignoring one already gone.
    ///
    /// The lock file is never removed: another process may be waiting on
    /// that inode, and unlinking it would let a third lock a fresh one.
    pub fn remove_marker(&self) {
        if let Err(e) = std::fs::remove_file(&self.marker) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(path = %self.marker.display(), error = %e, "Failed to remove transfer marker");
            }
        }
    }
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name: OsString = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}
