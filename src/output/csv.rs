//! CSV product listing writer

use crate::ProductRecord;
use csv::Writer;
use serde::Serialize;
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use tracing::{debug, info};

use super::{OutputError, OutputResult, OutputWriter, ProductWriter};

const DEFAULT_BUFFER_SIZE: usize = 8192; // 8KB buffer

/// One CSV row; `extra` attributes are kept as a JSON object
#[derive(Debug, Serialize)]
struct ProductRow<'a> {
    id: &'a str,
    title: &'a str,
    collection: String,
    acquired_at: String,
    size_bytes: Option<u64>,
    status: String,
    checksum_algorithm: String,
    checksum: &'a str,
    download_uri: &'a str,
    extra: String,
}

impl<'a> ProductRow<'a> {
    fn from_record(product: &'a ProductRecord) -> OutputResult<Self> {
        let extra = serde_json::to_string(&product.extra)
            .map_err(|e| OutputError::SerializationError(e.to_string()))?;
        Ok(Self {
            id: &product.id,
            title: &product.title,
            collection: product
                .collection
                .map(|c| c.to_string())
                .unwrap_or_default(),
            acquired_at: product
                .acquired_at
                .to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
            size_bytes: product.size_bytes,
            status: product.status.to_string(),
            checksum_algorithm: product
                .checksum
                .as_ref()
                .map(|c| c.algorithm.to_string())
                .unwrap_or_default(),
            checksum: product
                .checksum
                .as_ref()
                .map(|c| c.value.as_str())
                .unwrap_or_default(),
            download_uri: &product.download_uri,
            extra,
        })
    }
}

/// CSV writer for product listings
pub struct CsvProductWriter {
    writer: Writer<BufWriter<File>>,
    products_written: u64,
}

impl CsvProductWriter {
    /// Create a CSV writer at `path`, creating parent directories.
    pub fn new<P: AsRef<Path>>(path: P) -> OutputResult<Self> {
        let path = path.as_ref();
        info!("Creating CSV writer: path={}", path.display());

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| OutputError::IoError(format!("Failed to create directory: {e}")))?;
        }

        let file = File::create(path)
            .map_err(|e| OutputError::IoError(format!("Failed to create file: {e}")))?;
        let buf_writer = BufWriter::with_capacity(DEFAULT_BUFFER_SIZE, file);

        // Headers are written by csv::Writer on the first serialize().
        Ok(Self {
            writer: Writer::from_writer(buf_writer),
            products_written: 0,
        })
    }
}

impl ProductWriter for CsvProductWriter {
    fn write_product(&mut self, product: &ProductRecord) -> OutputResult<()> {
        let row = ProductRow::from_record(product)?;
        self.writer
            .serialize(&row)
            .map_err(|e| OutputError::CsvError(format!("Failed to write product: {e}")))?;
        self.products_written += 1;
        Ok(())
    }

    fn products_written(&self) -> u64 {
        self.products_written
    }
}

impl OutputWriter for CsvProductWriter {
    fn flush(&mut self) -> OutputResult<()> {
        self.writer
            .flush()
            .map_err(|e| OutputError::FlushError(format!("Failed to flush: {e}")))
    }

    fn close(mut self) -> OutputResult<()> {
        debug!(
            "Closing CSV writer: {} total products written",
            self.products_written
        );
        self.flush()?;

        let buf_writer = self
            .writer
            .into_inner()
            .map_err(|e| OutputError::IoError(format!("Failed to get inner writer: {e}")))?;
        let file = buf_writer
            .into_inner()
            .map_err(|e| OutputError::IoError(format!("Failed to get file handle: {e}")))?;
        file.sync_all()
            .map_err(|e| OutputError::IoError(format!("Failed to sync file: {e}")))?;

        info!(
            "CSV writer closed successfully: {} products written",
            self.products_written
        );
        Ok(())
    }
}
