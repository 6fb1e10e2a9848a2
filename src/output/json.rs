//! JSON output: line-delimited product listings and download reports

use crate::downloader::DownloadSummary;
use crate::ProductRecord;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use tracing::{debug, info};

use super::{OutputError, OutputResult, OutputWriter, ProductWriter};

/// Writes one JSON object per product per line
pub struct JsonLinesProductWriter {
    writer: BufWriter<File>,
    products_written: u64,
}

impl JsonLinesProductWriter {
    /// Create a JSON-lines writer at `path`, creating parent directories.
    pub fn new<P: AsRef<Path>>(path: P) -> OutputResult<Self> {
        let path = path.as_ref();
        info!("Creating JSON lines writer: path={}", path.display());

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| OutputError::IoError(format!("Failed to create directory: {e}")))?;
        }
        let file = File::create(path)
            .map_err(|e| OutputError::IoError(format!("Failed to create file: {e}")))?;

        Ok(Self {
            writer: BufWriter::new(file),
            products_written: 0,
        })
    }
}

impl ProductWriter for JsonLinesProductWriter {
    fn write_product(&mut self, product: &ProductRecord) -> OutputResult<()> {
        serde_json::to_writer(&mut self.writer, product)
            .map_err(|e| OutputError::SerializationError(e.to_string()))?;
        self.writer
            .write_all(b"\n")
            .map_err(|e| OutputError::IoError(e.to_string()))?;
        self.products_written += 1;
        Ok(())
    }

    fn products_written(&self) -> u64 {
        self.products_written
    }
}

impl OutputWriter for JsonLinesProductWriter {
    fn flush(&mut self) -> OutputResult<()> {
        self.writer
            .flush()
            .map_err(|e| OutputError::FlushError(format!("Failed to flush: {e}")))
    }

    fn close(mut self) -> OutputResult<()> {
        self.flush()?;
        let file = self
            .writer
            .into_inner()
            .map_err(|e| OutputError::IoError(format!("Failed to get file handle: {e}")))?;
        file.sync_all()
            .map_err(|e| OutputError::IoError(format!("Failed to sync file: {e}")))?;
        debug!(
            "JSON lines writer closed: {} products written",
            self.products_written
        );
        Ok(())
    }
}

/// Write a download summary as pretty-printed JSON.
pub fn write_summary_report(path: &Path, summary: &DownloadSummary) -> OutputResult<()> {
    let json = serde_json::to_string_pretty(summary)
        .map_err(|e| OutputError::SerializationError(e.to_string()))?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .map_err(|e| OutputError::IoError(format!("Failed to create directory: {e}")))?;
    }
    std::fs::write(path, json).map_err(|e| OutputError::IoError(e.to_string()))?;
    info!(path = %path.display(), "Download report written");
    Ok(())
}
