//! Integration tests for concurrent downloads

use std::sync::atomic::Ordering;
use std::time::Duration;
use tempfile::TempDir;

use dataspace_downloader::downloader::TaskState;
use dataspace_downloader::resume::TransferPaths;
use dataspace_downloader::ClientError;

use crate::support::{archive_bytes, MockCatalog, MockProduct};

#[tokio::test]
async fn test_downloads_are_verified_and_placed() {
    let mock = MockCatalog::start().await;
    let body = archive_bytes(50_000, 7);
    let record = mock.add_product(MockProduct::new("a", body.clone()));
    let session = mock.session();
    let dir = TempDir::new().unwrap();

    let summary = session
        .coordinator()
        .download_all(vec![record.clone()], dir.path(), 2)
        .await
        .unwrap();

    assert_eq!(summary.completed, 1);
    assert!(summary.is_success());
    let task = &summary.tasks["a"];
    assert_eq!(task.state, TaskState::Completed);
    assert_eq!(task.byte_range_completed, body.len() as u64);
    assert_eq!(task.attempt_count, 1);

    let destination = dir.path().join(record.file_name());
    assert_eq!(std::fs::read(&destination).unwrap(), body);
    let paths = TransferPaths::for_destination(&destination);
    assert!(!paths.partial.exists());
    assert!(!paths.marker.exists());
}

#[tokio::test]
async fn test_integrity_failure_is_isolated() {
    let mock = MockCatalog::start().await;
    let a = mock.add_product(MockProduct::new("a", archive_bytes(20_000, 1)));
    let b = mock.add_product(
        MockProduct::new("b", archive_bytes(20_000, 2))
            .with_declared_md5("00000000000000000000000000000000"),
    );
    let c = mock.add_product(MockProduct::new("c", archive_bytes(20_000, 3)));
    let session = mock.session();
    let dir = TempDir::new().unwrap();

    let summary = session
        .coordinator()
        .download_all(vec![a, b.clone(), c], dir.path(), 3)
        .await
        .unwrap();

    let states = summary.states();
    assert_eq!(states["a"], TaskState::Completed);
    assert_eq!(states["b"], TaskState::Failed);
    assert_eq!(states["c"], TaskState::Completed);
    assert_eq!(summary.tasks["b"].error_kind.as_deref(), Some("integrity"));

    let destination = dir.path().join(b.file_name());
    let paths = TransferPaths::for_destination(&destination);
    assert!(!destination.exists());
    assert!(!paths.partial.exists());
    assert!(!paths.marker.exists());
}

#[tokio::test]
async fn test_offline_product_makes_no_request() {
    let mock = MockCatalog::start().await;
    let record = mock.add_product(MockProduct::new("cold", archive_bytes(1000, 0)).offline());
    let session = mock.session();
    let dir = TempDir::new().unwrap();

    let summary = session
        .coordinator()
        .download_all(vec![record], dir.path(), 1)
        .await
        .unwrap();

    let task = &summary.tasks["cold"];
    assert_eq!(task.state, TaskState::Failed);
    assert_eq!(task.error_kind.as_deref(), Some("not_available"));
    assert!(mock.download_requests().is_empty());
}

#[tokio::test]
async fn test_max_concurrency_is_respected() {
    let mock = MockCatalog::start().await;
    let records: Vec<_> = (0..6)
        .map(|n| {
            mock.add_product(
                MockProduct::new(&format!("p{n}"), archive_bytes(2000, n as u8))
                    .with_response_delay(Duration::from_millis(100)),
            )
        })
        .collect();
    let session = mock.session();
    let dir = TempDir::new().unwrap();

    let summary = session
        .coordinator()
        .download_all(records, dir.path(), 2)
        .await
        .unwrap();

    assert_eq!(summary.completed, 6);
    let peak = mock.state.max_in_flight.load(Ordering::SeqCst);
    assert!(peak <= 2, "peak concurrency {peak}");
    assert!(peak >= 1);
}

#[tokio::test]
async fn test_duplicate_ids_download_once() {
    let mock = MockCatalog::start().await;
    let record = mock.add_product(MockProduct::new("dup", archive_bytes(3000, 9)));
    let session = mock.session();
    let dir = TempDir::new().unwrap();

    let summary = session
        .coordinator()
        .download_all(vec![record.clone(), record], dir.path(), 2)
        .await
        .unwrap();

    assert_eq!(summary.tasks.len(), 1);
    assert_eq!(mock.requests_for("dup").len(), 1);
}

#[tokio::test]
async fn test_existing_destination_is_not_downloaded_again() {
    let mock = MockCatalog::start().await;
    let body = archive_bytes(4000, 4);
    let record = mock.add_product(MockProduct::new("done", body.clone()));
    let session = mock.session();
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join(record.file_name()), &body).unwrap();

    let summary = session
        .coordinator()
        .download_all(vec![record], dir.path(), 1)
        .await
        .unwrap();

    assert_eq!(summary.tasks["done"].state, TaskState::Completed);
    assert_eq!(summary.tasks["done"].byte_range_completed, 4000);
    assert!(mock.download_requests().is_empty());
}

#[tokio::test]
async fn test_foreign_file_at_destination_is_not_reported_complete() {
    let mock = MockCatalog::start().await;
    let truncated = mock.add_product(MockProduct::new("short", archive_bytes(10_000, 1)));
    let body = archive_bytes(2000, 2);
    let mut forged = body.clone();
    forged[0] ^= 0xff;
    let corrupt = mock.add_product(MockProduct::new("forged", body));
    let session = mock.session();
    let dir = TempDir::new().unwrap();
    let junk_path = dir.path().join(truncated.file_name());
    std::fs::write(&junk_path, b"junk").unwrap();
    std::fs::write(dir.path().join(corrupt.file_name()), &forged).unwrap();

    let summary = session
        .coordinator()
        .download_all(vec![truncated, corrupt], dir.path(), 2)
        .await
        .unwrap();

    for id in ["short", "forged"] {
        let task = &summary.tasks[id];
        assert_eq!(task.state, TaskState::Failed, "{id}");
        assert_eq!(task.error_kind.as_deref(), Some("integrity"), "{id}");
    }
    assert!(mock.download_requests().is_empty());
    assert_eq!(std::fs::read(&junk_path).unwrap(), b"junk");
}

#[tokio::test]
async fn test_invalid_record_fails_without_request() {
    let mock = MockCatalog::start().await;
    let mut record = mock.add_product(MockProduct::new("bad", archive_bytes(100, 0)));
    record.download_uri = String::new();
    let session = mock.session();
    let dir = TempDir::new().unwrap();

    let summary = session
        .coordinator()
        .download_all(vec![record], dir.path(), 1)
        .await
        .unwrap();

    assert_eq!(summary.tasks["bad"].error_kind.as_deref(), Some("validation"));
    assert!(mock.download_requests().is_empty());
}

#[tokio::test]
async fn test_zero_concurrency_is_rejected() {
    let mock = MockCatalog::start().await;
    let session = mock.session();
    let dir = TempDir::new().unwrap();

    let err = session
        .coordinator()
        .download_all(Vec::new(), dir.path(), 0)
        .await
        .unwrap_err();

    assert!(matches!(err, ClientError::Validation(_)));
}

#[tokio::test]
async fn test_unknown_product_fails_without_affecting_others() {
    let mock = MockCatalog::start().await;
    let record = mock.add_product(MockProduct::new("gone", archive_bytes(100, 0)));
    // Served ids only; a record pointing elsewhere gets a 404.
    let mut missing = record.clone();
    missing.id = "missing".to_string();
    missing.title = "S2B_missing.SAFE".to_string();
    missing.download_uri = format!("{}/download/v1/Products(missing)/$value", mock.base_url);
    let session = mock.session();
    let dir = TempDir::new().unwrap();

    let summary = session
        .coordinator()
        .download_all(vec![record, missing], dir.path(), 2)
        .await
        .unwrap();

    assert_eq!(summary.tasks["gone"].state, TaskState::Completed);
    let failed = &summary.tasks["missing"];
    assert_eq!(failed.state, TaskState::Failed);
    assert_eq!(failed.error_kind.as_deref(), Some("http"));
    assert!(!summary.is_success());
}
