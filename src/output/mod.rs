//! Product listing and run report writers

use crate::ProductRecord;

pub mod csv;
pub mod json;

pub use self::csv::CsvProductWriter;
pub use self::json::{write_summary_report, JsonLinesProductWriter};

/// Output writer errors
#[derive(Debug, thiserror::Error)]
pub enum OutputError {
    /// IO error
    #[error("IO error: {0}")]
    IoError(String),

    /// CSV write error
    #[error("CSV error: {0}")]
    CsvError(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    SerializationError(String),

    /// Buffer flush error
    #[error("flush error: {0}")]
    FlushError(String),
}

/// Result type for output operations
pub type OutputResult<T> = Result<T, OutputError>;

/// Generic output writer
pub trait OutputWriter {
    /// Flush any buffered data to disk
    fn flush(&mut self) -> OutputResult<()>;

    /// Close the writer and finalize output
    fn close(self) -> OutputResult<()>;
}

/// Writer for product listings
pub trait ProductWriter: OutputWriter {
    /// Write a single product
    fn write_product(&mut self, product: &ProductRecord) -> OutputResult<()>;

    /// Write several products at once
    fn write_products(&mut self, products: &[ProductRecord]) -> OutputResult<()> {
        for product in products {
            self.write_product(product)?;
        }
        Ok(())
    }

    /// Products written so far
    fn products_written(&self) -> u64;
}

/// Listing format, chosen from the output file extension
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListingFormat {
    /// Comma-separated values, one row per product
    Csv,
    /// One JSON object per line
    JsonLines,
}

impl ListingFormat {
    /// `.csv` → CSV; `.json`/`.jsonl`/`.ndjson` → JSON lines.
    pub fn from_path(path: &std::path::Path) -> Option<Self> {
        let extension = path.extension()?.to_str()?.to_ascii_lowercase();
        match extension.as_str() {
            "csv" => Some(ListingFormat::Csv),
            "json" | "jsonl" | "ndjson" => Some(ListingFormat::JsonLines),
            _ => None,
        }
    }
}

/// Open a writer for `path` in the format its extension names.
pub fn create_product_writer(
    path: &std::path::Path,
) -> OutputResult<Box<dyn ProductWriterBox>> {
    match ListingFormat::from_path(path) {
        Some(ListingFormat::Csv) => Ok(Box::new(CsvProductWriter::new(path)?)),
        Some(ListingFormat::JsonLines) => Ok(Box::new(JsonLinesProductWriter::new(path)?)),
        None => Err(OutputError::IoError(format!(
            "unsupported listing extension for {} (expected .csv, .json, .jsonl or .ndjson)",
            path.display()
        ))),
    }
}

/// Object-safe counterpart of [`ProductWriter`] for writers chosen at runtime
pub trait ProductWriterBox {
    /// Write a single product
    fn write_product(&mut self, product: &ProductRecord) -> OutputResult<()>;

    /// Products written so far
    fn products_written(&self) -> u64;

    /// Flush and sync the output
    fn finish(self: Box<Self>) -> OutputResult<()>;
}

impl<W: ProductWriter> ProductWriterBox for W {
    fn write_product(&mut self, product: &ProductRecord) -> OutputResult<()> {
        ProductWriter::write_product(self, product)
    }

    fn products_written(&self) -> u64 {
        ProductWriter::products_written(self)
    }

    fn finish(self: Box<Self>) -> OutputResult<()> {
        (*self).close()
    }
}
