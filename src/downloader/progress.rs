//! Progress tracking for long-running product transfers.
//!
//! Archives run to several gigabytes, so transfers log a progress line every
//! time another 10% lands on disk, or once a minute when the size is unknown.

use std::time::{Duration, Instant};

const DEFAULT_UPDATE_INTERVAL: Duration = Duration::from_secs(60);
const MIN_DOWNLOAD_DURATION: Duration = Duration::from_secs(30);

/// Progress of one transfer.
#[derive(Debug, Clone)]
pub struct ProgressState {
    /// Bytes on disk, resumed bytes included.
    pub bytes_downloaded: u64,
    /// Bytes present when this run started.
    pub resumed_from: u64,
    /// Total expected bytes (if known).
    pub total_expected: Option<u64>,
    /// When this run started.
    pub start_time: Instant,
    /// Last time progress was reported.
    pub last_update: Instant,
    /// Minimum interval between time-based updates.
    pub update_interval: Duration,
    /// Transfer rate of this run (bytes per second).
    pub current_rate: f64,
    /// Last reported completion percentage.
    pub last_reported_percentage: f64,
    /// Minimum percentage delta required to emit a new update.
    pub min_percentage_step: f64,
}

impl ProgressState {
    /// Start tracking from `resumed_from` bytes.
    pub fn new(total_expected: Option<u64>, resumed_from: u64) -> Self {
        let now = Instant::now();
        let mut state = Self {
            bytes_downloaded: resumed_from,
            resumed_from,
            total_expected,
            start_time: now,
            last_update: now,
            update_interval: DEFAULT_UPDATE_INTERVAL,
            current_rate: 0.0,
            last_reported_percentage: 0.0,
            min_percentage_step: 10.0,
        };
        if let Some(pct) = state.percentage() {
            state.last_reported_percentage = pct;
        }
        state
    }

    /// Count bytes written to disk.
    pub fn update(&mut self, new_bytes: u64) {
        self.bytes_downloaded = self.bytes_downloaded.saturating_add(new_bytes);
        let elapsed = self.start_time.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            self.current_rate = (self.bytes_downloaded - self.resumed_from) as f64 / elapsed;
        }
    }

    /// Restart from zero, e.g. when the server ignored the Range header.
    pub fn reset(&mut self) {
        *self = Self::new(self.total_expected, 0);
    }

    /// Whether a progress line is due.
    pub fn should_emit_update(&self) -> bool {
        if self.bytes_downloaded == self.resumed_from {
            return false;
        }

        let percentage_jump = self
            .percentage()
            .map(|pct| pct - self.last_reported_percentage >= self.min_percentage_step)
            .unwrap_or(false);

        if percentage_jump {
            return true;
        }

        self.start_time.elapsed() >= MIN_DOWNLOAD_DURATION
            && self.last_update.elapsed() >= self.update_interval
    }

    /// Call after logging a progress line.
    pub fn mark_emitted(&mut self) {
        self.last_update = Instant::now();
        if let Some(pct) = self.percentage() {
            self.last_reported_percentage = pct;
        }
    }

    /// Completion percentage (0-100) when the size is known.
    pub fn percentage(&self) -> Option<f64> {
        let total = self.total_expected?;
        if total == 0 {
            return Some(100.0);
        }
        Some((self.bytes_downloaded as f64 / total as f64 * 100.0).min(100.0))
    }

    /// Remaining time at the current rate.
    pub fn estimate_remaining(&self) -> Option<Duration> {
        if self.current_rate <= 0.0 {
            return None;
        }
        let remaining = self.total_expected?.saturating_sub(self.bytes_downloaded);
        if remaining == 0 {
            return None;
        }
        Some(Duration::from_secs_f64(remaining as f64 / self.current_rate))
    }

    /// Human-readable progress line.
    pub fn format_progress(&self, title: &str) -> String {
        let mut parts = vec![format!(
            "[PROGRESS] {title}: {}",
            format_bytes(self.bytes_downloaded)
        )];

        if let Some(total) = self.total_expected {
            parts.push(format!("of {}", format_bytes(total)));
        }
        if let Some(pct) = self.percentage() {
            parts.push(format!("- {pct:.1}% complete"));
        }
        if self.current_rate > 0.0 {
            parts.push(format!("at {}/s", format_bytes(self.current_rate as u64)));
        }
        if let Some(remaining) = self.estimate_remaining() {
            parts.push(format!("- ~{} remaining", format_duration(remaining)));
        }

        parts.join(" ")
    }
}

/// Format a byte count with binary units ("1.5 MiB").
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}

fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs < 60 {
        format!("{secs}s")
    } else if secs < 3600 {
        format!("{}m", secs / 60)
    } else {
        format!("{:.1}h", secs as f64 / 3600.0)
    }
}
