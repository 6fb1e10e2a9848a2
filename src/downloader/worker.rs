//! Single-product transfer with range resume and verification
//!
//! A transfer streams the archive into `<dest>.partial` through a write
//! buffer. Every [`CHECKPOINT_INTERVAL_BYTES`] the buffer is flushed and
//! fsynced before the marker records the new `byte_range_completed`, so the
//! marker never claims bytes that are not on disk. The partial file is only
//! renamed onto the destination after its size and checksum are verified.

use futures_util::StreamExt;
use reqwest::header::{CONTENT_RANGE, RANGE};
use reqwest::{Response, StatusCode};
use std::io::SeekFrom;
use std::sync::Arc;
use std::time::Duration;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncSeekExt, AsyncWriteExt, BufWriter};
use tracing::{debug, info, info_span, warn, Instrument};

use super::config::{RetryPolicy, CHECKPOINT_INTERVAL_BYTES, WRITE_BUFFER_BYTES};
use super::integrity::verify_file_blocking;
use super::progress::ProgressState;
use super::task::{DownloadTask, TaskState};
use crate::catalog::retry::{FailureClass, RetryContext};
use crate::catalog::{CatalogConfig, CatalogHttpClient};
use crate::error::{ClientError, ClientResult};
use crate::metrics::{record_retry_backoff, DownloadMetrics};
use crate::resume::{TransferLock, TransferMarker, TransferPaths};
use crate::{ProductRecord, ProductStatus};

/// How one streaming attempt ended
enum StreamOutcome {
    /// Every byte is on disk; ready for verification
    Finished,
    /// Cancellation interrupted the stream; progress is checkpointed
    Cancelled,
}

/// Why one streaming attempt failed
enum AttemptError {
    /// Stream-level failure worth another attempt
    Retryable(FailureClass, ClientError),
    /// Anything else; the request layer already retried what it could
    Fatal(ClientError),
}

/// Open partial file plus the bookkeeping that describes it
struct ActiveTransfer<'a> {
    product: &'a ProductRecord,
    paths: TransferPaths,
    marker: TransferMarker,
    writer: BufWriter<File>,
    bytes_written: u64,
    progress: ProgressState,
    metrics: &'a DownloadMetrics,
}

impl ActiveTransfer<'_> {
    /// Flush and fsync the partial file, then record progress in the marker.
    async fn checkpoint(&mut self, task: &mut DownloadTask, state: TaskState) -> ClientResult<()> {
        let partial = &self.paths.partial;
        self.writer
            .flush()
            .await
            .map_err(|e| ClientError::io(partial, e))?;
        self.writer
            .get_ref()
            .sync_data()
            .await
            .map_err(|e| ClientError::io(partial, e))?;

        task.byte_range_completed = self.bytes_written;
        self.marker.attempt_count = task.attempt_count;
        self.marker.checkpoint(self.bytes_written, state);
        self.marker
            .save(&self.paths.marker)
            .map_err(|e| e.at(&self.paths.marker))
    }

    /// Discard received bytes and start over from byte zero.
    async fn restart(&mut self, task: &mut DownloadTask) -> ClientResult<()> {
        let partial = &self.paths.partial;
        self.writer
            .flush()
            .await
            .map_err(|e| ClientError::io(partial, e))?;
        let file = self.writer.get_mut();
        file.set_len(0).await.map_err(|e| ClientError::io(partial, e))?;
        file.seek(SeekFrom::Start(0))
            .await
            .map_err(|e| ClientError::io(partial, e))?;
        self.bytes_written = 0;
        self.progress.reset();
        task.byte_range_completed = 0;
        Ok(())
    }

    async fn write_chunk(&mut self, chunk: &[u8]) -> ClientResult<()> {
        self.writer
            .write_all(chunk)
            .await
            .map_err(|e| ClientError::io(&self.paths.partial, e))?;
        let len = chunk.len() as u64;
        self.bytes_written += len;
        self.metrics.record_bytes(len);
        self.progress.update(len);
        if self.progress.should_emit_update() {
            info!("{}", self.progress.format_progress(&self.product.title));
            self.progress.mark_emitted();
        }
        Ok(())
    }
}

/// Downloads one product at a time into its destination
pub struct TransferWorker {
    http: Arc<CatalogHttpClient>,
    retry: RetryPolicy,
    chunk_read_timeout: Duration,
    checkpoint_interval: u64,
}

impl TransferWorker {
    /// Create a worker using `http` for requests and `config` for timeouts.
    pub fn new(http: Arc<CatalogHttpClient>, config: &CatalogConfig) -> Self {
        Self {
            retry: http.retry_policy(),
            http,
            chunk_read_timeout: config.chunk_read_timeout,
            checkpoint_interval: CHECKPOINT_INTERVAL_BYTES,
        }
    }

    /// Checkpoint every `bytes` bytes instead of the default interval.
    pub fn with_checkpoint_interval(mut self, bytes: u64) -> Self {
        self.checkpoint_interval = bytes.max(1);
        self
    }

    /// Transfer `product` into `task.destination_path`.
    ///
    /// Always returns the state `task` ended in; failures are recorded on
    /// the task rather than returned. Interrupted transfers end RESUMING with
    /// `byte_range_completed` equal to the bytes flushed to disk.
    pub async fn transfer(&self, product: &ProductRecord, task: &mut DownloadTask) -> TaskState {
        let metrics = DownloadMetrics::start(&product.id);
        let span = info_span!("transfer", product_id = %product.id);

        let result = self.run(product, task, &metrics).instrument(span).await;
        match result {
            Ok(()) => {}
            Err(ClientError::Cancelled) => {
                info!(product_id = %product.id, bytes = task.byte_range_completed, "Transfer cancelled");
                if task.state != TaskState::Pending {
                    task.state = TaskState::Resuming;
                }
            }
            Err(err) => {
                warn!(product_id = %product.id, error = %err, "Transfer failed");
                metrics.record_failure(err.kind());
                task.fail(&err);
            }
        }
        task.state
    }

    async fn run(
        &self,
        product: &ProductRecord,
        task: &mut DownloadTask,
        metrics: &DownloadMetrics,
    ) -> ClientResult<()> {
        if product.status == ProductStatus::Offline {
            return Err(ClientError::NotAvailable {
                product_id: product.id.clone(),
            });
        }

        let paths = TransferPaths::for_destination(&task.destination_path);
        if paths.destination.exists() {
            task.transition(TaskState::InProgress)?;
            if let Err(err) = verify_file_blocking(
                paths.destination.clone(),
                product.id.clone(),
                product.size_bytes,
                product.checksum.clone(),
            )
            .await
            {
                warn!(
                    path = %paths.destination.display(),
                    error = %err,
                    "Existing destination does not match the product, leaving it in place"
                );
                return Err(err);
            }
            let size = std::fs::metadata(&paths.destination)
                .map_err(|e| ClientError::io(&paths.destination, e))?
                .len();
            info!(path = %paths.destination.display(), "Destination already present and verified, skipping");
            task.byte_range_completed = size;
            task.transition(TaskState::Completed)?;
            paths.remove_marker();
            return Ok(());
        }

        if self.http.cancellation().is_cancelled() {
            return Err(ClientError::Cancelled);
        }

        let mut lock = TransferLock::open(&paths.lock).map_err(|e| e.at(&paths.lock))?;
        let _guard = lock.try_exclusive().map_err(|e| e.at(&paths.lock))?;

        let (marker, resume_from) = Self::prepare_marker(product, &paths);
        task.attempt_count = task.attempt_count.max(marker.attempt_count);
        task.byte_range_completed = resume_from;

        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(&paths.partial)
            .await
            .map_err(|e| ClientError::io(&paths.partial, e))?;
        file.set_len(resume_from)
            .await
            .map_err(|e| ClientError::io(&paths.partial, e))?;
        file.seek(SeekFrom::Start(resume_from))
            .await
            .map_err(|e| ClientError::io(&paths.partial, e))?;

        if resume_from > 0 {
            info!(resume_from, expected_size = ?product.size_bytes, "Resuming partial transfer");
        }

        let mut active = ActiveTransfer {
            product,
            paths,
            marker,
            writer: BufWriter::with_capacity(WRITE_BUFFER_BYTES, file),
            bytes_written: resume_from,
            progress: ProgressState::new(product.size_bytes, resume_from),
            metrics,
        };

        match self.drive(&mut active, task).await {
            Ok(StreamOutcome::Finished) => {}
            Ok(StreamOutcome::Cancelled) => return Err(ClientError::Cancelled),
            Err(ClientError::Cancelled) => {
                active.checkpoint(task, TaskState::Resuming).await?;
                return Err(ClientError::Cancelled);
            }
            Err(err) => {
                // Progress stays on disk for a later run.
                active.marker.last_error = Some(err.to_string());
                if let Err(save_err) = active.checkpoint(task, TaskState::Failed).await {
                    warn!(error = %save_err, "Failed to record transfer failure in marker");
                }
                return Err(err);
            }
        }

        self.finish(active, task).await
    }

    /// Reuse a marker that still describes `product`, trusting no more bytes
    /// than the partial file actually holds.
    fn prepare_marker(product: &ProductRecord, paths: &TransferPaths) -> (TransferMarker, u64) {
        let Some(marker) = TransferMarker::load_if_present(&paths.marker) else {
            return (TransferMarker::new(product), 0);
        };
        if !marker.matches(product) {
            warn!(
                product_id = %product.id,
                "Transfer marker describes a different object, restarting from zero"
            );
            return (TransferMarker::new(product), 0);
        }

        let on_disk = std::fs::metadata(&paths.partial).map(|m| m.len()).unwrap_or(0);
        let resume_from = marker.byte_range_completed.min(on_disk);
        (marker, resume_from)
    }

    /// Run streaming attempts until the body is complete, retrying
    /// stream-level failures with backoff.
    async fn drive(
        &self,
        active: &mut ActiveTransfer<'_>,
        task: &mut DownloadTask,
    ) -> ClientResult<StreamOutcome> {
        let max_attempts = self.retry.max_attempts.max(1);

        for attempt in 1..=max_attempts {
            task.transition(TaskState::InProgress)?;
            task.attempt_count += 1;
            active.checkpoint(task, TaskState::InProgress).await?;

            match self.stream_once(active, task).await {
                Ok(outcome) => return Ok(outcome),
                Err(AttemptError::Fatal(err)) => return Err(err),
                Err(AttemptError::Retryable(class, err)) => {
                    active.marker.last_error = Some(err.to_string());
                    task.transition(TaskState::Resuming)?;
                    active.checkpoint(task, TaskState::Resuming).await?;

                    let ctx = RetryContext::new(&active.product.id, &active.product.download_uri)
                        .attempt(attempt, max_attempts)
                        .failed_with(class, err.to_string())
                        .waiting(self.retry.backoff(attempt - 1));
                    if attempt >= max_attempts {
                        warn!("{}", ctx.format_failure());
                        return Err(err);
                    }

                    warn!("{}", ctx.format_retry());
                    record_retry_backoff(ctx.backoff_duration, attempt);
                    tokio::select! {
                        _ = tokio::time::sleep(ctx.backoff_duration) => {}
                        _ = self.http.cancellation().cancelled() => {
                            return Ok(StreamOutcome::Cancelled);
                        }
                    }
                }
            }
        }

        Err(ClientError::Validation(
            "retry policy allows no attempts".to_string(),
        ))
    }

    async fn stream_once(
        &self,
        active: &mut ActiveTransfer<'_>,
        task: &mut DownloadTask,
    ) -> Result<StreamOutcome, AttemptError> {
        let offset = active.bytes_written;
        let product = active.product;
        let url = product.download_uri.as_str();

        let response = self
            .http
            .send_authorized("download", &product.id, url, |client| {
                let request = client.get(url);
                if offset > 0 {
                    request.header(RANGE, format!("bytes={offset}-"))
                } else {
                    request
                }
            })
            .await
            .map_err(AttemptError::Fatal)?;

        match response.status() {
            StatusCode::RANGE_NOT_SATISFIABLE => {
                return self.handle_unsatisfiable(active, task, offset).await;
            }
            StatusCode::PARTIAL_CONTENT => {
                if let Some(start) = content_range_start(&response) {
                    if start != offset {
                        warn!(offset, start, "Server answered a different range, restarting from zero");
                        active.restart(task).await.map_err(AttemptError::Fatal)?;
                        return Err(AttemptError::Retryable(
                            FailureClass::TruncatedBody,
                            ClientError::Network {
                                endpoint: url.to_string(),
                                message: format!("expected range starting at {offset}, got {start}"),
                            },
                        ));
                    }
                }
                debug!(offset, "Server honoured range request");
            }
            _ if offset > 0 => {
                warn!(offset, "Server ignored range request, restarting from zero");
                active.restart(task).await.map_err(AttemptError::Fatal)?;
            }
            _ => {}
        }

        self.consume_body(active, task, response).await
    }

    async fn handle_unsatisfiable(
        &self,
        active: &mut ActiveTransfer<'_>,
        task: &mut DownloadTask,
        offset: u64,
    ) -> Result<StreamOutcome, AttemptError> {
        let complete = offset > 0
            && active
                .product
                .size_bytes
                .map_or(true, |expected| expected == offset);
        if complete {
            debug!(offset, "Range starts at end of object, verifying");
            return Ok(StreamOutcome::Finished);
        }

        warn!(offset, "Range not satisfiable, restarting from zero");
        active.restart(task).await.map_err(AttemptError::Fatal)?;
        Err(AttemptError::Retryable(
            FailureClass::Request(416),
            ClientError::Http {
                status: 416,
                endpoint: active.product.download_uri.clone(),
                body: format!("range bytes={offset}- not satisfiable"),
            },
        ))
    }

    async fn consume_body(
        &self,
        active: &mut ActiveTransfer<'_>,
        task: &mut DownloadTask,
        response: Response,
    ) -> Result<StreamOutcome, AttemptError> {
        let endpoint = active.product.download_uri.clone();
        let mut body = response.bytes_stream();
        let mut since_checkpoint: u64 = 0;
        let cancellation = self.http.cancellation().clone();

        loop {
            let next = tokio::select! {
                biased;
                _ = cancellation.cancelled() => {
                    active
                        .checkpoint(task, TaskState::Resuming)
                        .await
                        .map_err(AttemptError::Fatal)?;
                    return Ok(StreamOutcome::Cancelled);
                }
                next = tokio::time::timeout(self.chunk_read_timeout, body.next()) => next,
            };

            let failure = match next {
                Ok(Some(Ok(chunk))) => {
                    active.write_chunk(&chunk).await.map_err(AttemptError::Fatal)?;
                    since_checkpoint += chunk.len() as u64;
                    if since_checkpoint >= self.checkpoint_interval {
                        active
                            .checkpoint(task, TaskState::InProgress)
                            .await
                            .map_err(AttemptError::Fatal)?;
                        since_checkpoint = 0;
                    }
                    continue;
                }
                Ok(None) => break,
                Ok(Some(Err(e))) => (
                    if e.is_timeout() {
                        FailureClass::Timeout
                    } else {
                        FailureClass::Network
                    },
                    e.to_string(),
                ),
                Err(_) => (
                    FailureClass::Timeout,
                    format!("no data received for {:?}", self.chunk_read_timeout),
                ),
            };

            active
                .checkpoint(task, TaskState::InProgress)
                .await
                .map_err(AttemptError::Fatal)?;
            return Err(AttemptError::Retryable(
                failure.0,
                ClientError::Network {
                    endpoint,
                    message: failure.1,
                },
            ));
        }

        active
            .checkpoint(task, TaskState::InProgress)
            .await
            .map_err(AttemptError::Fatal)?;

        if let Some(expected) = active.product.size_bytes {
            if active.bytes_written < expected {
                return Err(AttemptError::Retryable(
                    FailureClass::TruncatedBody,
                    ClientError::Network {
                        endpoint,
                        message: format!(
                            "body ended after {} of {expected} bytes",
                            active.bytes_written
                        ),
                    },
                ));
            }
        }
        Ok(StreamOutcome::Finished)
    }

    /// Verify the partial file and move it onto the destination.
    async fn finish(&self, active: ActiveTransfer<'_>, task: &mut DownloadTask) -> ClientResult<()> {
        let ActiveTransfer {
            product,
            paths,
            writer,
            bytes_written,
            metrics,
            ..
        } = active;
        drop(writer);

        if let Err(err) = verify_file_blocking(
            paths.partial.clone(),
            product.id.clone(),
            product.size_bytes,
            product.checksum.clone(),
        )
        .await
        {
            if matches!(err, ClientError::Integrity { .. }) {
                warn!(error = %err, "Verification failed, discarding partial file");
                let _ = std::fs::remove_file(&paths.partial);
                paths.remove_marker();
                task.byte_range_completed = 0;
            }
            return Err(err);
        }

        std::fs::rename(&paths.partial, &paths.destination)
            .map_err(|e| ClientError::io(&paths.destination, e))?;
        if let Some(parent) = paths.destination.parent() {
            if let Ok(dir) = std::fs::File::open(parent) {
                let _ = dir.sync_all();
            }
        }
        paths.remove_marker();

        task.byte_range_completed = bytes_written;
        task.error = None;
        task.error_kind = None;
        task.transition(TaskState::Completed)?;
        metrics.record_success(bytes_written);
        info!(
            path = %paths.destination.display(),
            bytes = bytes_written,
            verified = product.checksum.is_some(),
            "Product downloaded"
        );
        Ok(())
    }
}

/// First byte position of a `Content-Range: bytes N-M/T` header.
fn content_range_start(response: &Response) -> Option<u64> {
    let value = response.headers().get(CONTENT_RANGE)?.to_str().ok()?;
    let range = value.trim().strip_prefix("bytes")?.trim();
    let (start, _) = range.split_once('-')?;
    start.trim().parse().ok()
}
