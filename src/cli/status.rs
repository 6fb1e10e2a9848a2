//! Status command: inspect interrupted transfers

use clap::Parser;
use std::path::Path;
use tracing::warn;

use super::CliError;
use crate::downloader::progress::format_bytes;
use crate::resume::TransferMarker;

const MARKER_SUFFIX: &str = ".resume.json";

/// Status command arguments
#[derive(Parser, Debug)]
pub struct StatusArgs {
    /// Fail when a marker cannot be read
    #[arg(long, default_value_t = false)]
    pub strict: bool,
}

/// One marker found in the destination directory
#[derive(Debug)]
pub struct MarkerReport {
    /// Marker file name
    pub file_name: String,
    /// Parsed marker, or the reason it could not be read
    pub marker: Result<TransferMarker, String>,
}

/// Read every transfer marker in `dir`, sorted by file name.
pub fn scan_markers(dir: &Path) -> Result<Vec<MarkerReport>, CliError> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    if !dir.is_dir() {
        return Err(CliError::InvalidArgument(format!(
            "{} is not a directory",
            dir.display()
        )));
    }

    let entries = std::fs::read_dir(dir).map_err(|e| {
        CliError::InvalidArgument(format!("Failed to read {}: {e}", dir.display()))
    })?;

    let mut reports: Vec<MarkerReport> = entries
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| {
            let file_name = entry.file_name().to_string_lossy().into_owned();
            file_name.ends_with(MARKER_SUFFIX).then(|| MarkerReport {
                marker: TransferMarker::load(&entry.path()).map_err(|e| e.to_string()),
                file_name,
            })
        })
        .collect();
    reports.sort_by(|a, b| a.file_name.cmp(&b.file_name));
    Ok(reports)
}

impl StatusArgs {
    /// Execute the status command for `dest`.
    pub fn execute(&self, dest: &Path) -> Result<(), CliError> {
        let reports = scan_markers(dest)?;
        if reports.is_empty() {
            println!("No interrupted transfers in {}", dest.display());
            return Ok(());
        }

        let mut invalid = 0;
        for report in &reports {
            match &report.marker {
                Ok(marker) => {
                    let progress = match marker.expected_size {
                        Some(total) if total > 0 => format!(
                            "{} of {} ({:.1}%)",
                            format_bytes(marker.byte_range_completed),
                            format_bytes(total),
                            marker.byte_range_completed as f64 / total as f64 * 100.0
                        ),
                        _ => format_bytes(marker.byte_range_completed),
                    };
                    println!(
                        "{}  {}  {}  attempts={}{}",
                        marker.product_id,
                        marker.state,
                        progress,
                        marker.attempt_count,
                        marker
                            .last_error
                            .as_deref()
                            .map(|e| format!("  last_error={e}"))
                            .unwrap_or_default()
                    );
                }
                Err(reason) => {
                    warn!(file = %report.file_name, error = %reason, "Unreadable transfer marker");
                    println!("{}  unreadable: {reason}", report.file_name);
                    invalid += 1;
                }
            }
        }

        if self.strict && invalid > 0 {
            return Err(CliError::InvalidArgument(format!(
                "{invalid} unreadable transfer marker(s) in {}",
                dest.display()
            )));
        }
        Ok(())
    }
}
