//! Transfer marker persistence
//!
//! A marker records how many leading bytes of the partial file are durable
//! and which remote object they belong to. It is written with the
//! temp-file-then-rename pattern so a crash mid-write leaves either the old
//! marker or the new one, never a torn file.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::Path;
use tracing::{debug, warn};

use super::ResumeError;
use crate::downloader::task::TaskState;
use crate::{Checksum, ProductRecord};

/// Current marker schema version
const SCHEMA_VERSION: u32 = 1;

/// Maximum accepted marker size (64 KiB); markers are a few hundred bytes
pub const MAX_MARKER_FILE_SIZE: u64 = 64 * 1024;

/// Durable progress of one product transfer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferMarker {
    schema_version: u32,
    /// Product identifier
    pub product_id: String,
    /// URI the bytes are fetched from
    pub download_uri: String,
    /// Size announced by the catalog, if known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected_size: Option<u64>,
    /// Digest the finished file must match
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checksum: Option<Checksum>,
    /// Leading bytes of the partial file known to be on disk
    pub byte_range_completed: u64,
    /// Transfer attempts across runs
    pub attempt_count: u32,
    /// State at the time of the last write
    pub state: TaskState,
    /// Last error message
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// When the transfer first started
    pub created_at: DateTime<Utc>,
    /// When the marker was last written
    pub updated_at: DateTime<Utc>,
}

impl TransferMarker {
    /// Fresh marker for `product` with no bytes transferred.
    pub fn new(product: &ProductRecord) -> Self {
        let now = Utc::now();
        Self {
            schema_version: SCHEMA_VERSION,
            product_id: product.id.clone(),
            download_uri: product.download_uri.clone(),
            expected_size: product.size_bytes,
            checksum: product.checksum.clone(),
            byte_range_completed: 0,
            attempt_count: 0,
            state: TaskState::Pending,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether this marker describes the same remote object as `product`.
    ///
    /// A changed size or checksum means the bytes on disk belong to a
    /// different object and must not be resumed.
    pub fn matches(&self, product: &ProductRecord) -> bool {
        self.product_id == product.id
            && self.expected_size == product.size_bytes
            && self.checksum == product.checksum
    }

    /// Record progress and bump `updated_at`.
    pub fn checkpoint(&mut self, byte_range_completed: u64, state: TaskState) {
        self.byte_range_completed = byte_range_completed;
        self.state = state;
        self.updated_at = Utc::now();
    }

    /// Write the marker atomically to `path`.
    pub fn save(&self, path: &Path) -> Result<(), ResumeError> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| ResumeError::SerializationError(e.to_string()))?;

        let parent_dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(parent_dir).map_err(|e| ResumeError::IoError(e.to_string()))?;

        let mut temp_file = tempfile::NamedTempFile::new_in(parent_dir)
            .map_err(|e| ResumeError::IoError(format!("Failed to create temp file: {e}")))?;
        temp_file
            .write_all(json.as_bytes())
            .map_err(|e| ResumeError::IoError(format!("Failed to write to temp file: {e}")))?;
        temp_file
            .flush()
            .map_err(|e| ResumeError::IoError(format!("Failed to flush temp file: {e}")))?;
        temp_file
            .as_file()
            .sync_all()
            .map_err(|e| ResumeError::IoError(format!("Failed to sync temp file: {e}")))?;
        temp_file
            .persist(path)
            .map_err(|e| ResumeError::IoError(format!("Failed to persist temp file: {e}")))?;

        if let Ok(dir) = std::fs::File::open(parent_dir) {
            let _ = dir.sync_all();
        }

        debug!(
            path = %path.display(),
            product_id = %self.product_id,
            bytes = self.byte_range_completed,
            state = %self.state,
            "Transfer marker saved"
        );
        Ok(())
    }

    /// Read a marker from `path`.
    pub fn load(path: &Path) -> Result<Self, ResumeError> {
        let metadata = std::fs::metadata(path).map_err(|e| ResumeError::IoError(e.to_string()))?;
        if metadata.len() > MAX_MARKER_FILE_SIZE {
            return Err(ResumeError::MarkerTooLarge {
                size: metadata.len(),
                max: MAX_MARKER_FILE_SIZE,
            });
        }

        let contents =
            std::fs::read_to_string(path).map_err(|e| ResumeError::IoError(e.to_string()))?;
        let marker: TransferMarker = serde_json::from_str(&contents).map_err(|e| {
            warn!(path = %path.display(), error = %e, "Failed to deserialize transfer marker");
            ResumeError::DeserializationError(e.to_string())
        })?;

        if marker.schema_version != SCHEMA_VERSION {
            return Err(ResumeError::SchemaVersionMismatch {
                expected: SCHEMA_VERSION,
                found: marker.schema_version,
            });
        }
        Ok(marker)
    }

    /// Read the marker at `path` if one exists.
    ///
    /// An unreadable or incompatible marker is logged and treated as absent,
    /// which restarts the transfer from byte zero.
    pub fn load_if_present(path: &Path) -> Option<Self> {
        if !path.exists() {
            return None;
        }
        match Self::load(path) {
            Ok(marker) => Some(marker),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Ignoring unusable transfer marker");
                None
            }
        }
    }
}
