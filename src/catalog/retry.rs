//! Retry message formatting for catalog and object API calls.
//!
//! Every retry logs one line with the attempt counter, the failure class and
//! the wait; the final failure adds actionable suggestions.

use reqwest::{Error as ReqwestError, StatusCode};
use std::fmt::Write as _;
use std::time::Duration;

const STATUS_PAGE: &str = "https://dataspace.copernicus.eu/support";

/// What went wrong on a failed attempt, as shown to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Request timed out, or a transfer stopped sending data
    Timeout,
    /// Connection refused or DNS failure
    Unreachable,
    /// HTTP 429
    RateLimited,
    /// HTTP 5xx
    Server(u16),
    /// HTTP 401/403
    Rejected(u16),
    /// Any other 4xx
    Request(u16),
    /// Body ended before the advertised length
    TruncatedBody,
    /// Nothing more specific applies
    Network,
}

impl FailureClass {
    /// Short phrase used inside retry log lines.
    pub fn label(&self) -> &'static str {
        match *self {
            Self::Timeout => "network timeout",
            Self::Unreachable => "connection failed",
            Self::RateLimited => "rate limit exceeded",
            Self::Server(500) => "internal server error",
            Self::Server(502) => "bad gateway",
            Self::Server(503) => "service unavailable",
            Self::Server(504) => "gateway timeout",
            Self::Server(_) => "server error",
            Self::Rejected(401) => "access token rejected (401)",
            Self::Rejected(403) => "access denied (403)",
            Self::Rejected(_) => "authentication failed",
            Self::Request(404) => "product not found",
            Self::Request(416) => "requested range not satisfiable",
            Self::Request(_) => "client error",
            Self::TruncatedBody => "transfer ended early",
            Self::Network => "network error",
        }
    }

    /// What the user can do about it.
    pub fn remedy(&self) -> &'static str {
        match self {
            Self::Timeout => "Check your network connection and firewall settings",
            Self::Unreachable => "Verify internet connectivity and DNS resolution",
            Self::RateLimited => {
                "Lower --concurrency; the object API limits parallel downloads per user"
            }
            Self::Server(_) => "The Data Space may be experiencing issues, try again later",
            Self::Rejected(_) => "Verify DS_USER / DS_PASS and that the account is active",
            Self::Request(_) => "Check the product id and search parameters",
            Self::TruncatedBody => "Re-run the download; completed bytes are kept and resumed",
            Self::Network => "Check network connectivity and try again",
        }
    }

    /// Whether another attempt can reasonably succeed.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Rejected(_) | Self::Request(_))
    }

    /// Classify a failed exchange from its status or transport error.
    pub fn classify(status: Option<StatusCode>, err: Option<&ReqwestError>) -> Self {
        match status.map(|s| s.as_u16()) {
            Some(code @ (401 | 403)) => return Self::Rejected(code),
            Some(429) => return Self::RateLimited,
            Some(code @ 500..=599) => return Self::Server(code),
            Some(code @ 400..=499) => return Self::Request(code),
            _ => {}
        }

        match err {
            Some(err) if err.is_timeout() => Self::Timeout,
            Some(err) if err.is_connect() => Self::Unreachable,
            _ => Self::Network,
        }
    }
}

/// One failed attempt at fetching `subject` from `endpoint`.
#[derive(Debug, Clone)]
pub struct RetryContext {
    /// Attempt that just failed (1-based)
    pub attempt: u32,
    /// Attempts the policy allows
    pub max_attempts: u32,
    /// Failure class
    pub class: FailureClass,
    /// Wait before the next attempt
    pub backoff_duration: Duration,
    /// What is being fetched, e.g. "page 3" or a product id
    pub subject: String,
    /// Error text of the failed attempt
    pub last_error: String,
    /// URL that failed
    pub endpoint: String,
}

impl RetryContext {
    /// Start a context for `subject` at `endpoint`; the remaining fields
    /// default to a first attempt with no wait.
    pub fn new(subject: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            attempt: 1,
            max_attempts: 1,
            class: FailureClass::Network,
            backoff_duration: Duration::ZERO,
            subject: subject.into(),
            last_error: String::new(),
            endpoint: endpoint.into(),
        }
    }

    /// Set the attempt counter.
    pub fn attempt(mut self, attempt: u32, max_attempts: u32) -> Self {
        self.attempt = attempt;
        self.max_attempts = max_attempts;
        self
    }

    /// Set the failure class and its error text.
    pub fn failed_with(mut self, class: FailureClass, error: impl Into<String>) -> Self {
        self.class = class;
        self.last_error = error.into();
        self
    }

    /// Set the wait before the next attempt.
    pub fn waiting(mut self, backoff: Duration) -> Self {
        self.backoff_duration = backoff;
        self
    }

    /// `Retrying (attempt 2/5) after service unavailable - waiting 2.5 seconds... (page 3)`
    pub fn format_retry(&self) -> String {
        format!(
            "Retrying (attempt {}/{}) after {} - waiting {:.1} seconds...{}",
            self.attempt,
            self.max_attempts,
            self.class.label(),
            self.backoff_duration.as_secs_f64(),
            self.subject_suffix()
        )
    }

    /// Logged when a request succeeds after earlier failures.
    pub fn format_success(&self) -> String {
        format!(
            "Retry attempt {}/{} succeeded{}",
            self.attempt,
            self.max_attempts,
            self.subject_suffix()
        )
    }

    /// Multi-line summary for the attempt that exhausted the policy.
    pub fn format_failure(&self) -> String {
        let subject = if self.subject.is_empty() {
            "unknown"
        } else {
            &self.subject
        };

        let mut out = format!("[FAILED] Request failed after {} attempts", self.attempt);
        let _ = write!(
            out,
            "\n  Last error: {}\n  Subject: {subject}\n  Endpoint: {}\n  Suggestions:",
            self.last_error, self.endpoint
        );
        for suggestion in self.suggestions() {
            let _ = write!(out, "\n    - {suggestion}");
        }
        out
    }

    /// Remedies for the failure class, plus a hint to raise the retry
    /// budget when retrying can help.
    pub fn suggestions(&self) -> Vec<String> {
        let mut suggestions = vec![self.class.remedy().to_string()];
        if self.class.is_retryable() {
            suggestions.push(format!(
                "Try increasing --max-retries (current: {})",
                self.max_attempts
            ));
        }
        suggestions.push(format!("Check service status at {STATUS_PAGE}"));
        suggestions
    }

    fn subject_suffix(&self) -> String {
        if self.subject.is_empty() {
            String::new()
        } else {
            format!(" ({})", self.subject)
        }
    }
}
