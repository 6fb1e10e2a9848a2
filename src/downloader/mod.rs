//! Concurrent, resumable product downloads
//!
//! # Overview
//!
//! 1. **Scheduling**: [`DownloadCoordinator`] creates one [`DownloadTask`] per
//!    product and runs a bounded pool of workers
//! 2. **Transfer**: [`TransferWorker`] streams one archive to disk with range
//!    resume and checkpointed progress
//! 3. **Verification**: [`integrity`] checks size and MD5/SHA-256 before a
//!    file is reported complete
//! 4. **Resume**: markers from [`crate::resume`] let the next run continue an
//!    interrupted transfer
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use dataspace_downloader::catalog::{CatalogConfig, CatalogHttpClient};
//! use dataspace_downloader::downloader::DownloadCoordinator;
//! use dataspace_downloader::ProductRecord;
//!
//! # async fn example(
//! #     http: Arc<CatalogHttpClient>,
//! #     products: Vec<ProductRecord>,
//! # ) -> Result<(), Box<dyn std::error::Error>> {
//! let coordinator = DownloadCoordinator::new(Arc::new(CatalogConfig::default()), http);
//! let summary = coordinator
//!     .download_all(products, "./products".as_ref(), 4)
//!     .await?;
//! for (id, state) in summary.states() {
//!     println!("{id}: {state}");
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Components
//!
//! - [`coordinator`] - Bounded worker pool and run summary
//! - [`worker`] - Single-product streaming transfer
//! - [`task`] - Task state machine
//! - [`integrity`] - Digest verification
//! - [`progress`] - Byte progress logging
//! - [`config`] - Retry policy and transfer constants

pub mod config;
pub mod coordinator;
pub mod integrity;
pub mod progress;
pub mod task;
pub mod worker;

pub use config::RetryPolicy;
pub use coordinator::{DownloadCoordinator, DownloadSummary};
pub use task::{DownloadTask, TaskState};
pub use worker::TransferWorker;
