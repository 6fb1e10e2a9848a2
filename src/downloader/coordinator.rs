//! Concurrent download scheduling
//!
//! [`DownloadCoordinator::download_all`] turns products into
//! [`DownloadTask`]s and runs at most `max_concurrency` [`TransferWorker`]s at
//! a time. Each transfer runs in its own tokio task, so one product failing
//! or panicking never affects the others.

use futures_util::stream::{self, StreamExt};
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

use super::task::{DownloadTask, TaskState};
use super::worker::TransferWorker;
use crate::catalog::{CatalogConfig, CatalogHttpClient, SearchClient};
use crate::error::{ClientError, ClientResult};
use crate::resume::{TransferMarker, TransferPaths};
use crate::ProductRecord;

/// Final state of every requested product
#[derive(Debug, Clone, Default, Serialize)]
pub struct DownloadSummary {
    /// Tasks keyed by product id
    pub tasks: BTreeMap<String, DownloadTask>,
    /// Products verified and in place
    pub completed: usize,
    /// Products that failed
    pub failed: usize,
    /// Products interrupted with resumable progress
    pub resuming: usize,
    /// Products never started (cancelled before scheduling)
    pub pending: usize,
}

impl DownloadSummary {
    fn from_tasks(tasks: impl IntoIterator<Item = DownloadTask>) -> Self {
        let mut summary = Self::default();
        for task in tasks {
            summary.insert(task);
        }
        summary
    }

    fn insert(&mut self, task: DownloadTask) {
        match task.state {
            TaskState::Completed => self.completed += 1,
            TaskState::Failed => self.failed += 1,
            TaskState::Resuming | TaskState::InProgress => self.resuming += 1,
            TaskState::Pending => self.pending += 1,
        }
        self.tasks.insert(task.product_id.clone(), task);
    }

    /// Final state per product id
    pub fn states(&self) -> BTreeMap<String, TaskState> {
        self.tasks
            .iter()
            .map(|(id, task)| (id.clone(), task.state))
            .collect()
    }

    /// Whether every product completed
    pub fn is_success(&self) -> bool {
        self.completed == self.tasks.len()
    }
}

/// Schedules product transfers with bounded concurrency
pub struct DownloadCoordinator {
    config: Arc<CatalogConfig>,
    http: Arc<CatalogHttpClient>,
    checkpoint_interval: Option<u64>,
}

impl DownloadCoordinator {
    /// Create a coordinator sharing `http`'s session and cancellation signal.
    pub fn new(config: Arc<CatalogConfig>, http: Arc<CatalogHttpClient>) -> Self {
        Self {
            config,
            http,
            checkpoint_interval: None,
        }
    }

    /// Checkpoint transfers every `bytes` bytes.
    pub fn with_checkpoint_interval(mut self, bytes: u64) -> Self {
        self.checkpoint_interval = Some(bytes);
        self
    }

    fn worker(&self) -> TransferWorker {
        let worker = TransferWorker::new(self.http.clone(), &self.config);
        match self.checkpoint_interval {
            Some(bytes) => worker.with_checkpoint_interval(bytes),
            None => worker,
        }
    }

    /// Download `products` into `destination_dir`, at most `max_concurrency`
    /// at a time.
    ///
    /// Duplicate ids are downloaded once. Products with a transfer marker
    /// next to their destination resume where the last run stopped. After
    /// cancellation no new transfer starts; those tasks are reported in the
    /// state they were loaded in.
    ///
    /// # Errors
    /// [`ClientError::Validation`] when `max_concurrency` is zero and
    /// [`ClientError::Io`] when `destination_dir` cannot be created. Per-product
    /// failures are reported in the summary, never returned.
    pub async fn download_all(
        &self,
        products: Vec<ProductRecord>,
        destination_dir: &Path,
        max_concurrency: usize,
    ) -> ClientResult<DownloadSummary> {
        if max_concurrency == 0 {
            return Err(ClientError::Validation(
                "max_concurrency must be at least 1".to_string(),
            ));
        }
        std::fs::create_dir_all(destination_dir)
            .map_err(|e| ClientError::io(destination_dir, e))?;

        let mut seen = HashSet::new();
        let mut jobs = Vec::new();
        let mut summary = DownloadSummary::default();

        for product in products {
            if !seen.insert(product.id.clone()) {
                continue;
            }
            let mut task = Self::initial_task(&product, destination_dir);
            if let Err(reason) = product.validate() {
                task.fail(&ClientError::Validation(reason));
                summary.insert(task);
                continue;
            }
            jobs.push((product, task));
        }

        info!(
            products = jobs.len(),
            max_concurrency,
            destination = %destination_dir.display(),
            "Starting downloads"
        );

        let worker = Arc::new(self.worker());
        let cancellation = self.http.cancellation().clone();

        let finished: Vec<DownloadTask> = stream::iter(jobs)
            .map(|(product, task)| {
                let worker = worker.clone();
                let cancellation = cancellation.clone();

                async move {
                    if cancellation.is_cancelled() {
                        return task;
                    }

                    let fallback = task.clone();
                    let handle = tokio::spawn(async move {
                        let mut task = task;
                        worker.transfer(&product, &mut task).await;
                        task
                    });
                    match handle.await {
                        Ok(task) => task,
                        Err(join_error) => {
                            let mut task = fallback;
                            let err = ClientError::io(
                                &task.destination_path,
                                format!("transfer task aborted: {join_error}"),
                            );
                            task.fail(&err);
                            task
                        }
                    }
                }
            })
            .buffer_unordered(max_concurrency)
            .collect()
            .await;

        for task in finished {
            info!(
                product_id = %task.product_id,
                state = %task.state,
                bytes = task.byte_range_completed,
                error = task.error.as_deref().unwrap_or(""),
                "Download finished"
            );
            summary.insert(task);
        }

        info!(
            completed = summary.completed,
            failed = summary.failed,
            resuming = summary.resuming,
            pending = summary.pending,
            "Downloads finished"
        );
        Ok(summary)
    }

    /// Resolve `ids` through the catalog, then download them.
    ///
    /// Ids that cannot be resolved are reported FAILED; the rest proceed.
    pub async fn download_ids(
        &self,
        search: &SearchClient,
        ids: &[String],
        destination_dir: &Path,
        max_concurrency: usize,
    ) -> ClientResult<DownloadSummary> {
        if max_concurrency == 0 {
            return Err(ClientError::Validation(
                "max_concurrency must be at least 1".to_string(),
            ));
        }

        let mut products = Vec::new();
        let mut unresolved = Vec::new();
        for id in ids {
            if self.http.cancellation().is_cancelled() {
                unresolved.push(DownloadTask::new(id.clone(), destination_dir.join(id)));
                continue;
            }
            match search.lookup_product(id).await {
                Ok(product) => products.push(product),
                Err(err) => {
                    warn!(product_id = %id, error = %err, "Product lookup failed");
                    let mut task = DownloadTask::new(id.clone(), destination_dir.join(id));
                    task.fail(&err);
                    unresolved.push(task);
                }
            }
        }

        let mut summary = self
            .download_all(products, destination_dir, max_concurrency)
            .await?;
        for task in unresolved {
            if !summary.tasks.contains_key(&task.product_id) {
                summary.insert(task);
            }
        }
        Ok(summary)
    }

    /// Task for `product`, carrying progress from an earlier run if its
    /// marker is still valid.
    fn initial_task(product: &ProductRecord, destination_dir: &Path) -> DownloadTask {
        let destination = destination_dir.join(product.file_name());
        let paths = TransferPaths::for_destination(&destination);
        let mut task = DownloadTask::new(product.id.clone(), destination);

        if let Some(marker) = TransferMarker::load_if_present(&paths.marker) {
            if marker.matches(product) && paths.partial.exists() {
                task.state = TaskState::Resuming;
                task.byte_range_completed = marker.byte_range_completed;
                task.attempt_count = marker.attempt_count;
            }
        }
        task
    }
}
