//! Download command

use clap::Parser;
use std::path::PathBuf;
use tracing::{info, warn};

use super::{Cli, CliError, SearchArgs, Session};
use crate::downloader::{DownloadCoordinator, DownloadSummary, TaskState};
use crate::output::write_summary_report;

/// Download command arguments
#[derive(Parser, Debug)]
pub struct DownloadArgs {
    /// Product id to download (repeatable); skips the search
    #[arg(long = "id")]
    pub ids: Vec<String>,

    /// Write a JSON report of every task's final state
    #[arg(long)]
    pub report: Option<PathBuf>,

    /// Search filters selecting the products to download
    #[command(flatten)]
    pub search: SearchArgs,
}

impl DownloadArgs {
    /// Execute the download command.
    pub async fn execute(&self, cli: &Cli, session: &Session) -> Result<(), CliError> {
        let coordinator = DownloadCoordinator::new(session.config.clone(), session.http.clone());

        let summary = if !self.ids.is_empty() {
            if self.search.has_filters() {
                warn!("--id given; search filters are ignored");
            }
            coordinator
                .download_ids(&session.search, &self.ids, &cli.dest, cli.concurrency)
                .await?
        } else {
            if !self.search.has_filters() {
                return Err(CliError::InvalidArgument(
                    "give at least one search filter or --id".to_string(),
                ));
            }
            let products = self.search.collect(&session.search).await?;
            info!(products = products.len(), "Products selected for download");
            coordinator
                .download_all(products, &cli.dest, cli.concurrency)
                .await?
        };

        if let Some(path) = &self.report {
            write_summary_report(path, &summary)?;
        }
        print_summary(&summary);

        if summary.is_success() {
            Ok(())
        } else {
            Err(CliError::Incomplete {
                failed: summary.failed,
                unfinished: summary.resuming + summary.pending,
            })
        }
    }
}

fn print_summary(summary: &DownloadSummary) {
    for task in summary.tasks.values() {
        match task.state {
            TaskState::Completed => {
                println!("[OK]       {}  {}", task.product_id, task.destination_path.display())
            }
            TaskState::Failed => println!(
                "[FAILED]   {}  {}",
                task.product_id,
                task.error.as_deref().unwrap_or("unknown error")
            ),
            TaskState::Resuming | TaskState::InProgress => println!(
                "[RESUME]   {}  {} bytes on disk",
                task.product_id, task.byte_range_completed
            ),
            TaskState::Pending => println!("[PENDING]  {}", task.product_id),
        }
    }
    println!(
        "{} completed, {} failed, {} resumable, {} not started",
        summary.completed, summary.failed, summary.resuming, summary.pending
    );
}
