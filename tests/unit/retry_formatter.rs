//! Unit tests for retry message formatting

use std::time::Duration;

use dataspace_downloader::catalog::retry::{FailureClass, RetryContext};
use reqwest::StatusCode;

fn context(class: FailureClass) -> RetryContext {
    RetryContext::new(
        "page 3",
        "https://catalogue.dataspace.copernicus.eu/resto/api/collections/search.json",
    )
    .attempt(2, 5)
    .failed_with(class, "HTTP 503 Service Unavailable")
    .waiting(Duration::from_millis(2500))
}

#[test]
fn test_retry_message_includes_attempt_counter_and_wait() {
    let message = context(FailureClass::Server(503)).format_retry();
    assert_eq!(
        message,
        "Retrying (attempt 2/5) after service unavailable - waiting 2.5 seconds... (page 3)"
    );
}

#[test]
fn test_success_message() {
    assert_eq!(
        context(FailureClass::RateLimited).format_success(),
        "Retry attempt 2/5 succeeded (page 3)"
    );
}

#[test]
fn test_failure_summary_lists_suggestions() {
    let summary = context(FailureClass::RateLimited).format_failure();
    assert!(summary.starts_with("[FAILED] Request failed after 2 attempts"));
    assert!(summary.contains("Last error: HTTP 503 Service Unavailable"));
    assert!(summary.contains("Subject: page 3"));
    assert!(summary.contains("Lower --concurrency"));
    assert!(summary.contains("Try increasing --max-retries (current: 5)"));
}

#[test]
fn test_auth_failures_do_not_suggest_more_retries() {
    let suggestions = context(FailureClass::Rejected(401)).suggestions();
    assert!(suggestions.iter().any(|s| s.contains("DS_USER")));
    assert!(!suggestions.iter().any(|s| s.contains("--max-retries")));
}

#[test]
fn test_status_classification() {
    assert_eq!(
        FailureClass::classify(Some(StatusCode::UNAUTHORIZED), None),
        FailureClass::Rejected(401)
    );
    assert_eq!(
        FailureClass::classify(Some(StatusCode::BAD_GATEWAY), None),
        FailureClass::Server(502)
    );
    assert_eq!(
        FailureClass::classify(Some(StatusCode::NOT_FOUND), None),
        FailureClass::Request(404)
    );
    assert_eq!(FailureClass::classify(None, None), FailureClass::Network);
}

#[test]
fn test_retryable_classes() {
    assert!(FailureClass::TruncatedBody.is_retryable());
    assert!(FailureClass::Timeout.is_retryable());
    assert!(!FailureClass::Request(416).is_retryable());
    assert_eq!(
        FailureClass::Request(416).label(),
        "requested range not satisfiable"
    );
}
