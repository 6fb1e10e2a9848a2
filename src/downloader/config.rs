//! Retry and transfer configuration constants

use std::time::Duration;

/// Attempts made for a transiently failing request (first try included).
/// Five attempts with exponential backoff ride out short outages and rate-limit
/// windows while bounding the total wait to roughly 15 seconds.
pub const MAX_ATTEMPTS: u32 = 5;

/// Initial backoff delay in milliseconds.
pub const INITIAL_BACKOFF_MS: u64 = 1000; // 1 second

/// Maximum backoff delay in milliseconds.
pub const MAX_BACKOFF_MS: u64 = 30000; // 30 seconds

/// Bytes written between durable checkpoints of a transfer.
/// Every checkpoint flushes, fsyncs and rewrites the transfer marker, so a
/// crash loses at most this much progress.
pub const CHECKPOINT_INTERVAL_BYTES: u64 = 8 * 1024 * 1024;

/// Write buffer in front of the partial file.
pub const WRITE_BUFFER_BYTES: usize = 256 * 1024;

/// Longest silence tolerated between two body chunks before the transfer is
/// treated as stalled and retried.
pub const CHUNK_READ_TIMEOUT: Duration = Duration::from_secs(60);

/// Calculate exponential backoff delay with the default bounds
pub fn calculate_backoff(retry_count: u32) -> Duration {
    RetryPolicy::default().backoff(retry_count)
}

/// Bounded exponential backoff used for catalog requests and transfers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, first try included
    pub max_attempts: u32,
    /// Delay before the first retry
    pub initial_backoff: Duration,
    /// Upper bound for any single delay
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: MAX_ATTEMPTS,
            initial_backoff: Duration::from_millis(INITIAL_BACKOFF_MS),
            max_backoff: Duration::from_millis(MAX_BACKOFF_MS),
        }
    }
}

impl RetryPolicy {
    /// Policy with `max_attempts` and the default delays.
    pub fn with_max_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..Self::default()
        }
    }

    /// Delay before retry number `retry_count` (0-based): `initial * 2^n`, capped.
    pub fn backoff(&self, retry_count: u32) -> Duration {
        let factor = 2u32.checked_pow(retry_count).unwrap_or(u32::MAX);
        self.initial_backoff
            .checked_mul(factor)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }
}
