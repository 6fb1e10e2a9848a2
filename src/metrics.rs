//! Observability metrics for catalog and transfer traffic
//!
//! Counters and histograms are recorded through the `metrics` facade, so they
//! cost next to nothing until [`init_metrics`] installs the Prometheus
//! exporter. Without an exporter every call is a no-op.
//!
//! ## Metrics
//!
//! | Name                               | Type      | Labels                     |
//! |------------------------------------|-----------|----------------------------|
//! | `http_requests_total`              | counter   | operation, status, attempt |
//! | `http_request_duration_seconds`    | histogram | operation                  |
//! | `http_429_errors_total`            | counter   | operation                  |
//! | `http_retries_total`               | counter   | attempt                    |
//! | `retry_backoff_duration_seconds`   | histogram | attempt                    |
//! | `token_exchanges_total`            | counter   | grant, outcome             |
//! | `search_pages_total`               | counter   |                            |
//! | `search_records_total`             | counter   |                            |
//! | `download_bytes_total`             | counter   |                            |
//! | `downloads_completed_total`        | counter   |                            |
//! | `downloads_failed_total`           | counter   | error                      |
//! | `download_duration_seconds`        | histogram |                            |

use metrics::{counter, describe_counter, describe_histogram, histogram, Unit};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Set once the exporter is installed
static METRICS_INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Correlation ID generator for request tracing
static CORRELATION_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Initialize the Prometheus exporter on `addr`.
///
/// Idempotent: later calls return `Ok(())` without rebinding.
pub fn init_metrics(addr: SocketAddr) -> Result<(), Box<dyn std::error::Error>> {
    if METRICS_INITIALIZED.swap(true, Ordering::SeqCst) {
        debug!("Metrics already initialized, skipping");
        return Ok(());
    }

    info!("Initializing metrics system on {}", addr);

    if let Err(e) = PrometheusBuilder::new().with_http_listener(addr).install() {
        METRICS_INITIALIZED.store(false, Ordering::SeqCst);
        return Err(format!("Failed to install Prometheus exporter: {e}").into());
    }

    describe_counter!(
        "http_requests_total",
        Unit::Count,
        "Total number of HTTP requests made to the catalog and download APIs"
    );
    describe_histogram!(
        "http_request_duration_seconds",
        Unit::Seconds,
        "HTTP request duration in seconds"
    );
    describe_counter!(
        "http_429_errors_total",
        Unit::Count,
        "Total number of 429 rate limit responses received"
    );
    describe_counter!(
        "http_retries_total",
        Unit::Count,
        "Total number of retry attempts"
    );
    describe_histogram!(
        "retry_backoff_duration_seconds",
        Unit::Seconds,
        "Duration of retry backoff in seconds"
    );
    describe_counter!(
        "token_exchanges_total",
        Unit::Count,
        "Token requests sent to the identity provider"
    );
    describe_counter!(
        "search_pages_total",
        Unit::Count,
        "Search result pages fetched"
    );
    describe_counter!(
        "search_records_total",
        Unit::Count,
        "Product records parsed from search pages"
    );
    describe_counter!(
        "download_bytes_total",
        Unit::Bytes,
        "Product bytes written to disk"
    );
    describe_counter!(
        "downloads_completed_total",
        Unit::Count,
        "Products downloaded and verified"
    );
    describe_counter!(
        "downloads_failed_total",
        Unit::Count,
        "Product downloads that failed"
    );
    describe_histogram!(
        "download_duration_seconds",
        Unit::Seconds,
        "Wall time of a product transfer"
    );

    info!("Metrics system initialized successfully on {}", addr);
    Ok(())
}

/// Generate a new correlation ID for request tracing
pub fn generate_correlation_id() -> String {
    let id = CORRELATION_COUNTER.fetch_add(1, Ordering::Relaxed) + 1;
    format!("req-{id:08x}")
}

/// Timing and outcome of one HTTP request
pub struct HttpRequestMetrics {
    operation: String,
    start_time: Instant,
    correlation_id: String,
    attempt: u32,
}

impl HttpRequestMetrics {
    /// Start recording a request for `operation` (`search`, `download`, ...).
    pub fn start(operation: impl Into<String>, attempt: u32) -> Self {
        let operation = operation.into();
        let correlation_id = generate_correlation_id();

        debug!(
            correlation_id = %correlation_id,
            operation = %operation,
            attempt = attempt,
            "Starting HTTP request"
        );

        Self {
            operation,
            start_time: Instant::now(),
            correlation_id,
            attempt,
        }
    }

    /// Record the response status.
    pub fn record_complete(&self, status_code: u16) {
        let duration = self.start_time.elapsed();

        counter!(
            "http_requests_total",
            "operation" => self.operation.clone(),
            "status" => status_code.to_string(),
            "attempt" => self.attempt.to_string(),
        )
        .increment(1);

        histogram!(
            "http_request_duration_seconds",
            "operation" => self.operation.clone(),
        )
        .record(duration.as_secs_f64());

        if status_code == 429 {
            counter!(
                "http_429_errors_total",
                "operation" => self.operation.clone(),
            )
            .increment(1);

            warn!(
                correlation_id = %self.correlation_id,
                operation = %self.operation,
                attempt = self.attempt,
                duration_ms = duration.as_millis(),
                "Rate limit response (429) recorded"
            );
        }

        debug!(
            correlation_id = %self.correlation_id,
            operation = %self.operation,
            status = status_code,
            duration_ms = duration.as_millis(),
            "HTTP request completed"
        );
    }

    /// Record a connection-level failure (no status code).
    pub fn record_network_error(&self) {
        let duration = self.start_time.elapsed();

        counter!(
            "http_requests_total",
            "operation" => self.operation.clone(),
            "status" => "network_error",
            "attempt" => self.attempt.to_string(),
        )
        .increment(1);

        histogram!(
            "http_request_duration_seconds",
            "operation" => self.operation.clone(),
        )
        .record(duration.as_secs_f64());

        warn!(
            correlation_id = %self.correlation_id,
            operation = %self.operation,
            attempt = self.attempt,
            duration_ms = duration.as_millis(),
            "Network error recorded"
        );
    }

    /// Correlation ID of this request
    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }
}

/// Record retry backoff duration
pub fn record_retry_backoff(duration: Duration, attempt: u32) {
    counter!(
        "http_retries_total",
        "attempt" => attempt.to_string(),
    )
    .increment(1);

    histogram!(
        "retry_backoff_duration_seconds",
        "attempt" => attempt.to_string(),
    )
    .record(duration.as_secs_f64());

    debug!(
        attempt = attempt,
        backoff_ms = duration.as_millis(),
        "Retry backoff recorded"
    );
}

/// Record one token request to the identity provider.
pub fn record_token_exchange(grant: &'static str, success: bool) {
    counter!(
        "token_exchanges_total",
        "grant" => grant,
        "outcome" => if success { "success" } else { "failure" },
    )
    .increment(1);
}

/// Record a fetched search page and the records it carried.
pub fn record_search_page(records: usize) {
    counter!("search_pages_total").increment(1);
    counter!("search_records_total").increment(records as u64);
}

/// Metrics for a single product transfer
pub struct DownloadMetrics {
    product_id: String,
    start_time: Instant,
}

impl DownloadMetrics {
    /// Start tracking the transfer of `product_id`.
    pub fn start(product_id: impl Into<String>) -> Self {
        Self {
            product_id: product_id.into(),
            start_time: Instant::now(),
        }
    }

    /// Count bytes written to disk.
    pub fn record_bytes(&self, bytes: u64) {
        counter!("download_bytes_total").increment(bytes);
    }

    /// Record a verified transfer.
    pub fn record_success(&self, total_bytes: u64) {
        let duration = self.start_time.elapsed();

        counter!("downloads_completed_total").increment(1);
        histogram!("download_duration_seconds").record(duration.as_secs_f64());

        debug!(
            product_id = %self.product_id,
            total_bytes,
            duration_secs = duration.as_secs(),
            "Download metrics recorded"
        );
    }

    /// Record a failed transfer, labelled by error class.
    pub fn record_failure(&self, error_kind: &'static str) {
        let duration = self.start_time.elapsed();

        counter!(
            "downloads_failed_total",
            "error" => error_kind,
        )
        .increment(1);
        histogram!("download_duration_seconds").record(duration.as_secs_f64());

        debug!(
            product_id = %self.product_id,
            error = error_kind,
            duration_secs = duration.as_secs(),
            "Download failure recorded"
        );
    }
}
